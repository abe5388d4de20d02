//! PostgreSQL adapter.
//!
//! One table per record kind: plain-text key columns plus an AES-GCM
//! encrypted `data` column holding the payload JSON. The public surface is
//! blocking; calls run on a single-threaded Tokio runtime owned by the adapter.
//! The pool goes through sqlx's `Any` driver, so a `sqlite:` URL works too.

mod batch;

use futures::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use sqlx::{Connection, Row};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};
use url::Url;

use self::batch::{Bind, UpsertTable};
use crate::backend::TvBackend;
use crate::config::load_json;
use crate::crypto::{self, AesKey};
use crate::error::{MigrateError, Result};
use crate::model::{
    DeliveryServiceSslKeys, DnssecKeyRecord, DnssecKeys, RecordCounts, SecretBundle,
    SslKeyRecord, UriSignerKeys, UriSigningKeyRecord, UrlSigKeyRecord, UrlSigKeys,
};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct PgConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub sslmode: String,
    pub database: String,
    #[serde(rename = "aesKey")]
    pub aes_key: String,
}

impl PgConfig {
    pub fn connection_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "postgres://{}:{}/{}",
            self.host, self.port, self.database
        ))
        .map_err(|e| MigrateError::Config(format!("invalid PG address: {e}")))?;
        url.set_username(&self.user)
            .and_then(|_| url.set_password(Some(&self.password)))
            .map_err(|_| MigrateError::Config("PG address cannot carry credentials".into()))?;
        if !self.sslmode.is_empty() {
            url.query_pairs_mut().append_pair("sslmode", &self.sslmode);
        }
        Ok(url)
    }
}

/// `url` with any password replaced by `*`.
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("*"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}

// ── Tables ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct SslRow {
    delivery_service: String,
    cdn: String,
    version: String,
    data: Option<Vec<u8>>,
    keys: DeliveryServiceSslKeys,
}

/// Row of a table keyed by a single text column.
#[derive(Debug, Clone, Default)]
struct KeyedRow<K> {
    key: String,
    data: Option<Vec<u8>>,
    payload: K,
}

fn seal<T: Serialize>(key: &AesKey, payload: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(payload)?;
    crypto::encrypt(key, &json).map_err(|e| e.context("encrypt error"))
}

fn unseal<T: DeserializeOwned>(key: &AesKey, data: Option<&[u8]>) -> Result<T> {
    let data = data.ok_or_else(|| MigrateError::Crypto("no encrypted data".into()))?;
    let plain = crypto::decrypt(key, data).map_err(|e| e.context("unable to decrypt"))?;
    if plain.is_empty() {
        return Err(MigrateError::Integrity("decrypted data is empty".into()));
    }
    Ok(serde_json::from_slice(&plain)?)
}

fn keyed_binds<K>(rows: &[KeyedRow<K>], table: &str) -> Result<Vec<Bind>> {
    let mut args = Vec::with_capacity(rows.len() * 2);
    for row in rows {
        let data = row.data.clone().ok_or_else(|| {
            MigrateError::Integrity(format!("{table} '{}': no encrypted data", row.key))
        })?;
        args.push(Bind::Text(row.key.clone()));
        args.push(Bind::Bytes(data));
    }
    Ok(args)
}

fn keyed_violations<K>(
    rows: &[KeyedRow<K>],
    label: &str,
    has_keys: impl Fn(&K) -> bool,
) -> Vec<String> {
    rows.iter()
        .filter(|row| row.data.is_none() && has_keys(&row.payload))
        .map(|row| format!("{label} '{}': DataEncrypted is blank!", row.key))
        .collect()
}

async fn table_size(pool: &AnyPool, table: &str) -> Result<usize> {
    let row = sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(|e| MigrateError::Query(format!("unable to determine size of {table}: {e}")))?;
    let n: i64 = row
        .try_get(0)
        .map_err(|e| MigrateError::Query(format!("reading size of {table}: {e}")))?;
    usize::try_from(n).map_err(|_| MigrateError::Integrity(format!("{table} size {n}")))
}

async fn gather_ssl(pool: &AnyPool) -> Result<Vec<SslRow>> {
    let size = table_size(pool, "sslkey").await?;
    let stream = sqlx::query("SELECT data, deliveryservice, cdn, version from sslkey").fetch(pool);
    collect_counted(stream, size, "PGSSLKey", |index, row| {
        let scan = move |e: sqlx::Error| {
            MigrateError::Query(format!("PGSSLKey gatherKeys unable to scan row {index}: {e}"))
        };
        Ok(SslRow {
            data: Some(row.try_get("data").map_err(scan)?),
            delivery_service: row.try_get("deliveryservice").map_err(scan)?,
            cdn: row.try_get("cdn").map_err(scan)?,
            version: row.try_get("version").map_err(scan)?,
            keys: DeliveryServiceSslKeys::default(),
        })
    })
    .await
}

async fn gather_keyed<K: Default>(
    pool: &AnyPool,
    table: &str,
    key_column: &str,
    label: &str,
) -> Result<Vec<KeyedRow<K>>> {
    let size = table_size(pool, table).await?;
    let sql = format!("SELECT {key_column}, data from {table}");
    let stream = sqlx::query(&sql).fetch(pool);
    collect_counted(stream, size, label, |index, row| {
        let scan = move |e: sqlx::Error| {
            MigrateError::Query(format!("{label} gatherKeys unable to scan row {index}: {e}"))
        };
        Ok(KeyedRow {
            key: row.try_get(0).map_err(scan)?,
            data: Some(row.try_get(1).map_err(scan)?),
            payload: K::default(),
        })
    })
    .await
}

/// Drain `stream`, which must yield at most `size` rows (the count taken
/// just before the query).
async fn collect_counted<R, T, S, F>(
    mut stream: S,
    size: usize,
    label: &str,
    mut convert: F,
) -> Result<Vec<T>>
where
    S: Stream<Item = std::result::Result<R, sqlx::Error>> + Unpin,
    F: FnMut(usize, R) -> Result<T>,
{
    let mut rows = Vec::with_capacity(size);
    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|e| MigrateError::Query(format!("{label} gatherKeys: {e}")))?
    {
        if rows.len() >= size {
            return Err(MigrateError::Integrity(format!(
                "{label} gatherKeys: got more results than expected"
            )));
        }
        rows.push(convert(rows.len(), row)?);
    }
    Ok(rows)
}

// ── Backend ─────────────────────────────────────────────────────────────────

pub struct PgBackend {
    config: Option<PgConfig>,
    url: Option<String>,
    aes_key: Option<AesKey>,
    pool: Option<AnyPool>,
    runtime: Option<Runtime>,
    ssl: Vec<SslRow>,
    dnssec: Vec<KeyedRow<DnssecKeys>>,
    uri: Vec<KeyedRow<UriSignerKeys>>,
    url_sig: Vec<KeyedRow<UrlSigKeys>>,
}

impl Default for PgBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PgBackend {
    pub fn new() -> Self {
        Self {
            config: None,
            url: None,
            aes_key: None,
            pool: None,
            runtime: None,
            ssl: Vec::new(),
            dnssec: Vec::new(),
            uri: Vec::new(),
            url_sig: Vec::new(),
        }
    }

    /// Adapter for an explicit connection URL; `configure` is not needed.
    pub fn with_url(url: impl Into<String>, aes_key: AesKey) -> Self {
        let mut backend = Self::new();
        backend.url = Some(url.into());
        backend.aes_key = Some(aes_key);
        backend
    }

    fn key(&self) -> Result<&AesKey> {
        self.aes_key
            .as_ref()
            .ok_or_else(|| MigrateError::Config("PG backend has no AES key".into()))
    }

    /// Run `fut` to completion on the adapter's runtime.
    fn block_on<F, T>(&self, f: impl FnOnce(AnyPool) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match (&self.runtime, &self.pool) {
            (Some(rt), Some(pool)) => rt.block_on(f(pool.clone())),
            _ => Err(MigrateError::Connection("PG client is not open".into())),
        }
    }

    fn counts(&self) -> RecordCounts {
        RecordCounts {
            ssl_keys: self.ssl.len(),
            dnssec_keys: self.dnssec.len(),
            uri_signing_keys: self.uri.len(),
            url_sig_keys: self.url_sig.len(),
        }
    }

    fn ssl_binds(&self) -> Result<Vec<Bind>> {
        let mut args = Vec::with_capacity(self.ssl.len() * batch::SSL_KEY.stride());
        for row in &self.ssl {
            let data = row.data.clone().ok_or_else(|| {
                MigrateError::Integrity(format!(
                    "PGSSLKey '{}': no encrypted data",
                    row.delivery_service
                ))
            })?;
            args.push(Bind::Text(row.delivery_service.clone()));
            args.push(Bind::Bytes(data));
            args.push(Bind::Text(row.cdn.clone()));
            args.push(Bind::Text(row.version.clone()));
            args.push(Bind::Text(String::new()));
        }
        Ok(args)
    }
}

impl Drop for PgBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing PG client: {e}");
        }
    }
}

impl TvBackend for PgBackend {
    fn name(&self) -> &'static str {
        "PG"
    }

    fn configure(&mut self, path: &Path) -> Result<()> {
        let cfg: PgConfig = load_json(path)?;
        let key = AesKey::from_base64(&cfg.aes_key)
            .map_err(|e| e.context("unable to validate PG AESKey"))?;
        self.url = Some(cfg.connection_url()?.to_string());
        self.aes_key = Some(key);
        self.config = Some(cfg);
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let url = self
            .url
            .clone()
            .ok_or_else(|| MigrateError::Config("PG backend is not configured".into()))?;
        sqlx::any::install_default_drivers();
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MigrateError::Connection(format!("unable to start PG runtime: {e}")))?;
        let pool = runtime
            .block_on(
                AnyPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(&url),
            )
            .map_err(|e| {
                MigrateError::Connection(format!(
                    "unable to start PG client with connection string '{}': {e}",
                    redact(&url)
                ))
            })?;
        debug!(url = %redact(&url), "PG client started");
        self.pool = Some(pool);
        self.runtime = Some(runtime);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let (Some(pool), Some(rt)) = (self.pool.take(), self.runtime.as_ref()) {
            rt.block_on(pool.close());
        }
        self.runtime = None;
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        self.block_on(|pool| async move {
            let mut conn = pool
                .acquire()
                .await
                .map_err(|e| MigrateError::Connection(format!("unable to ping PG: {e}")))?;
            conn.ping()
                .await
                .map_err(|e| MigrateError::Connection(format!("unable to ping PG: {e}")))
        })
    }

    fn fetch(&mut self) -> Result<()> {
        let (ssl, dnssec, url_sig, uri) = self.block_on(|pool| async move {
            let ssl = gather_ssl(&pool).await?;
            let dnssec = gather_keyed(&pool, "dnssec", "cdn", "PGDNSSecKey").await?;
            let url_sig =
                gather_keyed(&pool, "url_sig_key", "deliveryservice", "PGURLSigKey").await?;
            let uri =
                gather_keyed(&pool, "uri_signing_key", "deliveryservice", "PGURISignKey").await?;
            Ok((ssl, dnssec, url_sig, uri))
        })?;
        self.ssl = ssl;
        self.dnssec = dnssec;
        self.url_sig = url_sig;
        self.uri = uri;
        info!(records = self.counts().total(), "fetched PG keys");
        Ok(())
    }

    fn insert(&mut self) -> Result<()> {
        let batches: Vec<(UpsertTable, Vec<Bind>)> = vec![
            (batch::SSL_KEY, self.ssl_binds()?),
            (batch::DNSSEC, keyed_binds(&self.dnssec, "PGDNSSecKey")?),
            (batch::URL_SIG_KEY, keyed_binds(&self.url_sig, "PGURLSigKey")?),
            (batch::URI_SIGNING_KEY, keyed_binds(&self.uri, "PGURISignKey")?),
        ];
        self.block_on(|pool| async move {
            for (target, args) in batches {
                batch::upsert(&pool, &target, args).await?;
            }
            Ok(())
        })?;
        info!(records = self.counts().total(), "inserted PG keys");
        Ok(())
    }

    fn validate(&self) -> Vec<String> {
        let default_keys = DeliveryServiceSslKeys::default();
        let mut errs = Vec::new();
        for row in &self.ssl {
            let problem = if row.keys.delivery_service.is_empty() {
                Some("DS is blank!")
            } else if row.keys == default_keys {
                Some("DS SSL Keys are default!")
            } else if row.keys.key.is_empty() {
                Some("Key is blank!")
            } else if row.keys.cdn.is_empty() {
                Some("CDN is blank!")
            } else if row.data.is_none() {
                Some("DataEncrypted is blank!")
            } else if row.version.is_empty() {
                Some("Version is blank!")
            } else {
                None
            };
            if let Some(problem) = problem {
                errs.push(format!("SSL Key DS '{}': {problem}", row.delivery_service));
            }
        }
        errs.extend(keyed_violations(&self.dnssec, "DNSSEC Key CDN", |k| !k.is_empty()));
        errs.extend(keyed_violations(&self.uri, "URI Signing Key DS", |k| !k.is_empty()));
        errs.extend(keyed_violations(&self.url_sig, "URL Sig Key DS", |k| !k.is_empty()));
        errs
    }

    fn to_canonical(&mut self) -> Result<SecretBundle> {
        let key = self.key()?.clone();
        for row in &mut self.ssl {
            row.keys = unseal(&key, row.data.as_deref())
                .map_err(|e| e.context(format!("PGSSLKey '{}'", row.delivery_service)))?;
        }
        for row in &mut self.dnssec {
            row.payload = unseal(&key, row.data.as_deref())
                .map_err(|e| e.context(format!("PGDNSSecKey '{}'", row.key)))?;
        }
        for row in &mut self.uri {
            row.payload = unseal(&key, row.data.as_deref())
                .map_err(|e| e.context(format!("PGURISignKey '{}'", row.key)))?;
        }
        for row in &mut self.url_sig {
            row.payload = unseal(&key, row.data.as_deref())
                .map_err(|e| e.context(format!("PGURLSigKey '{}'", row.key)))?;
        }

        Ok(SecretBundle {
            ssl_keys: self
                .ssl
                .iter()
                .map(|row| SslKeyRecord {
                    version: row.version.clone(),
                    keys: row.keys.clone(),
                })
                .collect(),
            dnssec_keys: self
                .dnssec
                .iter()
                .map(|row| DnssecKeyRecord {
                    cdn: row.key.clone(),
                    keys: row.payload.clone(),
                })
                .collect(),
            uri_signing_keys: self
                .uri
                .iter()
                .map(|row| UriSigningKeyRecord {
                    delivery_service: row.key.clone(),
                    keys: row.payload.clone(),
                })
                .collect(),
            url_sig_keys: self
                .url_sig
                .iter()
                .map(|row| UrlSigKeyRecord {
                    delivery_service: row.key.clone(),
                    keys: row.payload.clone(),
                })
                .collect(),
        })
    }

    fn from_canonical(&mut self, bundle: &SecretBundle) -> Result<()> {
        let key = self.key()?.clone();
        self.ssl = bundle
            .ssl_keys
            .iter()
            .map(|r| {
                Ok(SslRow {
                    delivery_service: r.keys.delivery_service.clone(),
                    cdn: r.keys.cdn.clone(),
                    version: r.version.clone(),
                    data: Some(seal(&key, &r.keys)?),
                    keys: r.keys.clone(),
                })
            })
            .collect::<Result<_>>()?;
        self.dnssec = bundle
            .dnssec_keys
            .iter()
            .map(|r| {
                Ok(KeyedRow {
                    key: r.cdn.clone(),
                    data: Some(seal(&key, &r.keys)?),
                    payload: r.keys.clone(),
                })
            })
            .collect::<Result<_>>()?;
        self.uri = bundle
            .uri_signing_keys
            .iter()
            .map(|r| {
                Ok(KeyedRow {
                    key: r.delivery_service.clone(),
                    data: Some(seal(&key, &r.keys)?),
                    payload: r.keys.clone(),
                })
            })
            .collect::<Result<_>>()?;
        self.url_sig = bundle
            .url_sig_keys
            .iter()
            .map(|r| {
                Ok(KeyedRow {
                    key: r.delivery_service.clone(),
                    data: Some(seal(&key, &r.keys)?),
                    payload: r.keys.clone(),
                })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn summary(&self) -> String {
        let target = match (&self.config, &self.url) {
            (Some(cfg), _) => format!("{}@{}:{}", cfg.user, cfg.host, cfg.port),
            (None, Some(url)) => redact(url),
            (None, None) => "unconfigured".to_string(),
        };
        format!("PG server {target}\n{}", self.counts())
    }
}
