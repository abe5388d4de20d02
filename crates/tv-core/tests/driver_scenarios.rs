use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use tv_core::crypto::AesKey;
use tv_core::model::{
    DeliveryServiceSslKeys, DnssecKey, DnssecKeyRecord, DnssecKeySet, SslCertificate,
    SslKeyRecord, UrlSigKeyRecord,
};
use tv_core::postgres::PgBackend;
use tv_core::riak::{MemoryCluster, RiakBackend};
use tv_core::{
    run_with, BackendKind, BackendSpec, FixedConfirm, Mode, Outcome, RunConfig, SecretBundle,
    Source, TvBackend,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE sslkey (deliveryservice TEXT NOT NULL, data BLOB NOT NULL, cdn TEXT NOT NULL, \
     version TEXT NOT NULL, provider TEXT, PRIMARY KEY (deliveryservice, cdn, version))",
    "CREATE TABLE dnssec (cdn TEXT PRIMARY KEY, data BLOB NOT NULL)",
    "CREATE TABLE url_sig_key (deliveryservice TEXT PRIMARY KEY, data BLOB NOT NULL)",
    "CREATE TABLE uri_signing_key (deliveryservice TEXT PRIMARY KEY, data BLOB NOT NULL)",
];

fn tls(cdn: &str, ds: &str, version: &str) -> SslKeyRecord {
    SslKeyRecord {
        version: version.to_string(),
        keys: DeliveryServiceSslKeys {
            cdn: cdn.to_string(),
            delivery_service: ds.to_string(),
            key: ds.to_string(),
            hostname: format!("*.{ds}.mycdn.test"),
            version: version.parse().unwrap_or(0),
            certificate: SslCertificate {
                crt: "crt".into(),
                key: "key".into(),
                csr: "csr".into(),
            },
            ..Default::default()
        },
    }
}

fn zone(cdn: &str) -> DnssecKeyRecord {
    let key = DnssecKey {
        name: format!("{cdn}.mycdn.test."),
        ttl: 60,
        status: "new".into(),
        public: "pub".into(),
        private: "priv".into(),
        ..Default::default()
    };
    let mut keys = BTreeMap::new();
    keys.insert(
        cdn.to_string(),
        DnssecKeySet {
            zsk: vec![key.clone()],
            ksk: vec![key],
        },
    );
    DnssecKeyRecord {
        cdn: cdn.to_string(),
        keys,
    }
}

fn url_keys(ds: &str) -> UrlSigKeyRecord {
    UrlSigKeyRecord {
        delivery_service: ds.to_string(),
        keys: (0..16).map(|i| (format!("key{i}"), format!("s{i}"))).collect(),
    }
}

fn small_bundle() -> SecretBundle {
    SecretBundle {
        ssl_keys: vec![tls("cdn1", "ds1", "1")],
        dnssec_keys: vec![zone("cdn1")],
        ..Default::default()
    }
}

fn aes_key() -> AesKey {
    AesKey::from_bytes(&[7u8; 32]).unwrap()
}

/// Empty Traffic Vault tables in a SQLite file.
fn sqlite_vault() -> (TempDir, String) {
    let dir = tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("vault.db").display());
    sqlx::any::install_default_drivers();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap();
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
    });
    (dir, url)
}

fn riak(cluster: &MemoryCluster) -> Box<dyn TvBackend> {
    Box::new(RiakBackend::with_store(
        Box::new(cluster.clone()),
        Arc::new(FixedConfirm::yes()),
    ))
}

fn seeded_riak(bundle: &SecretBundle) -> MemoryCluster {
    let cluster = MemoryCluster::new();
    let mut seed = riak(&cluster);
    seed.from_canonical(bundle).unwrap();
    seed.insert().unwrap();
    cluster
}

fn pg(url: &str) -> Box<dyn TvBackend> {
    Box::new(PgBackend::with_url(url, aes_key()))
}

fn run_config(source: Source, target: BackendKind, mode: Mode, dump_dir: &Path) -> RunConfig {
    RunConfig {
        source,
        target: BackendSpec {
            kind: target,
            config_path: "unused.json".into(),
        },
        mode,
        dump_dir: dump_dir.to_path_buf(),
        no_confirm: true,
        require_valid: true,
    }
}

fn riak_source() -> Source {
    Source::Backend(BackendSpec {
        kind: BackendKind::Riak,
        config_path: "unused.json".into(),
    })
}

#[test]
fn dump_then_fill_restores_the_same_keys() {
    let dir = tempdir().unwrap();
    let dump_dir = dir.path().join("dump");
    let source = seeded_riak(&small_bundle());

    let cfg = run_config(riak_source(), BackendKind::Riak, Mode::Dump, &dump_dir);
    let report = run_with(&cfg, Some(riak(&source)), None, &FixedConfirm::no()).unwrap();
    assert_eq!(report.outcome, Outcome::Dumped(dump_dir.clone()));
    assert!(dump_dir.join("sslkeys.json").exists());
    assert!(dump_dir.join("dnsseckeys.json").exists());

    let restored = MemoryCluster::new();
    let cfg = run_config(
        Source::Directory(dump_dir.clone()),
        BackendKind::Riak,
        Mode::Migrate,
        &dump_dir,
    );
    let report = run_with(&cfg, None, Some(riak(&restored)), &FixedConfirm::no()).unwrap();
    assert_eq!(report.outcome, Outcome::Migrated);
    assert!(report.summaries[0].contains("SSL Keys: 1"));
    assert_eq!(restored.keys("ssl"), vec!["ds1-1"]);
    assert_eq!(restored.keys("dnssec"), vec!["cdn1"]);
}

#[test]
fn riak_to_postgres_migration_compares_equal() {
    let dir = tempdir().unwrap();
    let (_db, url) = sqlite_vault();
    let mut bundle = small_bundle();
    bundle.ssl_keys.push(tls("cdn1", "ds2", "3"));
    bundle.url_sig_keys.push(url_keys("ds2"));
    let source = seeded_riak(&bundle);

    let mut cfg = run_config(riak_source(), BackendKind::Postgres, Mode::Migrate, dir.path());
    let report = run_with(&cfg, Some(riak(&source)), Some(pg(&url)), &FixedConfirm::no()).unwrap();
    assert_eq!(report.outcome, Outcome::Migrated);
    assert!(report.violations.is_empty());

    cfg.mode = Mode::Compare;
    let report = run_with(&cfg, Some(riak(&source)), Some(pg(&url)), &FixedConfirm::no()).unwrap();
    assert_eq!(report.outcome, Outcome::Matched);
    assert!(report.summaries[1].starts_with("PG server"));
}

#[test]
fn compare_ignores_record_order() {
    let dir = tempdir().unwrap();
    let mut forward = small_bundle();
    forward.ssl_keys.push(tls("cdn2", "ds9", "1"));
    forward.dnssec_keys.push(zone("cdn2"));
    let mut reversed = forward.clone();
    reversed.ssl_keys.reverse();
    reversed.dnssec_keys.reverse();

    let cfg = run_config(riak_source(), BackendKind::Riak, Mode::Compare, dir.path());
    let report = run_with(
        &cfg,
        Some(riak(&seeded_riak(&forward))),
        Some(riak(&seeded_riak(&reversed))),
        &FixedConfirm::no(),
    )
    .unwrap();
    assert_eq!(report.outcome, Outcome::Matched);
}

#[test]
fn postgres_dry_run_from_disk_leaves_tables_empty() {
    let dir = tempdir().unwrap();
    let dump_dir = dir.path().join("dump");
    tv_core::snapshot::dump(&small_bundle(), &dump_dir).unwrap();
    let (_db, url) = sqlite_vault();

    let cfg = run_config(
        Source::Directory(dump_dir.clone()),
        BackendKind::Postgres,
        Mode::DryRun,
        &dump_dir,
    );
    let report = run_with(&cfg, None, Some(pg(&url)), &FixedConfirm::yes()).unwrap();
    assert_eq!(report.outcome, Outcome::DryRun);

    let mut reader = pg(&url);
    reader.open().unwrap();
    reader.fetch().unwrap();
    assert!(reader.to_canonical().unwrap().is_empty());
    reader.close().unwrap();
}
