//! Riak adapter.
//!
//! Each record kind lives in its own bucket. DNSSEC, URI and URL keys are
//! found by listing their bucket; TLS keys are found through the `sslkeys`
//! search index since their `<ds>-<version>` keys cannot be listed cheaply.
//! Payloads are written as plain JSON.

mod client;
mod memory;
mod search;
mod store;

pub use client::HttpCluster;
pub use memory::MemoryCluster;
pub use search::{search_all, LARGE_RESULT_PAGES};
pub use store::{DocumentStore, SearchDoc, SearchPage};

use reqwest::tls::Version;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::backend::{Confirm, TvBackend};
use crate::config::load_json;
use crate::error::{MigrateError, Result};
use crate::model::{
    DeliveryServiceSslKeys, DnssecKeyRecord, DnssecKeys, RecordCounts, SecretBundle,
    SslKeyRecord, UriSignerKeys, UriSigningKeyRecord, UrlSigKeyRecord, UrlSigKeys,
};

pub const BUCKET_SSL: &str = "ssl";
pub const BUCKET_DNSSEC: &str = "dnssec";
pub const BUCKET_URL_SIG: &str = "url_sig_keys";
pub const BUCKET_URI_SIG: &str = "cdn_uri_sig_keys";

pub const SSL_SEARCH_INDEX: &str = "sslkeys";
pub const SSL_SEARCH_QUERY: &str = "cdn:*";
pub const SEARCH_PAGE_SIZE: usize = 1000;

const URL_SIG_PREFIX: &str = "url_sig_";
const URL_SIG_SUFFIX: &str = ".config";

// ── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RiakConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(rename = "tlsVersion", default)]
    pub tls_version: String,
    /// Seconds per command.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    5
}

impl RiakConfig {
    /// Per-command timeout; `0` means the default.
    pub fn request_timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(default_timeout()),
            secs => Duration::from_secs(secs),
        }
    }

    /// Highest TLS version to negotiate; `None` leaves the client default.
    pub fn max_tls_version(&self) -> Result<Option<Version>> {
        match self.tls_version.as_str() {
            "" => Ok(None),
            "10" => Ok(Some(Version::TLS_1_0)),
            "11" => Ok(Some(Version::TLS_1_1)),
            "12" => Ok(Some(Version::TLS_1_2)),
            "13" => Ok(Some(Version::TLS_1_3)),
            other => Err(MigrateError::Config(format!("unknown tls version {other}"))),
        }
    }
}

// ── Tables ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct SslRow {
    version: String,
    keys: DeliveryServiceSslKeys,
}

impl SslRow {
    fn object_key(&self) -> String {
        format!("{}-{}", self.keys.delivery_service, self.version)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DnssecRow {
    cdn: String,
    keys: DnssecKeys,
}

#[derive(Debug, Clone, PartialEq)]
struct UriRow {
    delivery_service: String,
    keys: UriSignerKeys,
}

#[derive(Debug, Clone, PartialEq)]
struct UrlRow {
    delivery_service: String,
    keys: UrlSigKeys,
}

fn url_sig_object_key(delivery_service: &str) -> String {
    format!("{URL_SIG_PREFIX}{delivery_service}{URL_SIG_SUFFIX}")
}

fn url_sig_delivery_service(key: &str) -> &str {
    key.strip_prefix(URL_SIG_PREFIX)
        .and_then(|k| k.strip_suffix(URL_SIG_SUFFIX))
        .unwrap_or(key)
}

/// Text after the last `-`, or the whole key.
fn ssl_version(key: &str) -> &str {
    key.rsplit_once('-').map_or(key, |(_, version)| version)
}

// ── Backend ─────────────────────────────────────────────────────────────────

pub struct RiakBackend {
    config: Option<RiakConfig>,
    store: Option<Box<dyn DocumentStore>>,
    confirm: Arc<dyn Confirm>,
    ssl: Vec<SslRow>,
    dnssec: Vec<DnssecRow>,
    uri: Vec<UriRow>,
    url: Vec<UrlRow>,
}

impl RiakBackend {
    pub fn new(confirm: Arc<dyn Confirm>) -> Self {
        Self {
            config: None,
            store: None,
            confirm,
            ssl: Vec::new(),
            dnssec: Vec::new(),
            uri: Vec::new(),
            url: Vec::new(),
        }
    }

    /// Adapter over an already connected store; `configure` is not needed.
    pub fn with_store(store: Box<dyn DocumentStore>, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(confirm)
        }
    }

    fn store(&self) -> Result<&dyn DocumentStore> {
        self.store
            .as_deref()
            .ok_or_else(|| MigrateError::Connection("riak cluster is not open".into()))
    }

    fn counts(&self) -> RecordCounts {
        RecordCounts {
            ssl_keys: self.ssl.len(),
            dnssec_keys: self.dnssec.len(),
            uri_signing_keys: self.uri.len(),
            url_sig_keys: self.url.len(),
        }
    }

    fn gather_ssl(&mut self) -> Result<()> {
        let store = self.store()?;
        let docs = search_all(
            store,
            SSL_SEARCH_INDEX,
            SSL_SEARCH_QUERY,
            SEARCH_PAGE_SIZE,
            self.confirm.as_ref(),
        )
        .map_err(|e| e.context("RiakSSLKey gatherKeys"))?;

        let mut rows = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut values = store.fetch_values(&doc.bucket, &doc.key)?;
            let raw = match values.len() {
                0 => {
                    return Err(MigrateError::Integrity(format!(
                        "RiakSSLKey gatherKeys unable to find any objects with key {} and bucket {}, but search results were returned",
                        doc.key, doc.bucket
                    )))
                }
                1 => values.remove(0),
                n => {
                    return Err(MigrateError::Integrity(format!(
                        "RiakSSLKey gatherKeys key '{}' more than 1 ssl key record found {n}",
                        doc.key
                    )))
                }
            };
            let keys: DeliveryServiceSslKeys = serde_json::from_slice(&raw).map_err(|e| {
                MigrateError::Query(format!(
                    "RiakSSLKey gatherKeys key '{}' unable to decode object: {e}",
                    doc.key
                ))
            })?;
            rows.push(SslRow {
                version: ssl_version(&doc.key).to_string(),
                keys,
            });
        }
        self.ssl = rows;
        Ok(())
    }

    fn gather_dnssec(&mut self) -> Result<()> {
        let objects = list_objects(self.store()?, BUCKET_DNSSEC)
            .map_err(|e| e.context("RiakDNSSecKey gatherKeys"))?;
        self.dnssec = objects
            .into_iter()
            .map(|(key, raw)| {
                let keys = decode(&raw, "RiakDNSSecKey", &key)?;
                Ok(DnssecRow { cdn: key, keys })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn gather_uri(&mut self) -> Result<()> {
        let objects = list_objects(self.store()?, BUCKET_URI_SIG)
            .map_err(|e| e.context("RiakURISignKey gatherKeys"))?;
        self.uri = objects
            .into_iter()
            .map(|(key, raw)| {
                let keys = decode(&raw, "RiakURISignKey", &key)?;
                Ok(UriRow {
                    delivery_service: key,
                    keys,
                })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn gather_url(&mut self) -> Result<()> {
        let objects = list_objects(self.store()?, BUCKET_URL_SIG)
            .map_err(|e| e.context("RiakURLSigKey gatherKeys"))?;
        self.url = objects
            .into_iter()
            .map(|(key, raw)| {
                let keys = decode(&raw, "RiakURLSigKey", &key)?;
                Ok(UrlRow {
                    delivery_service: url_sig_delivery_service(&key).to_string(),
                    keys,
                })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}

/// Every (key, value) in `bucket`. Listed keys with no value are skipped.
fn list_objects(store: &dyn DocumentStore, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let keys = store.list_keys(bucket)?;
    let mut objects = Vec::with_capacity(keys.len());
    for key in keys {
        let mut values = store.fetch_values(bucket, &key)?;
        match values.len() {
            0 => warn!(bucket, key = %key, "listed key has no object, skipping"),
            1 => objects.push((key, values.remove(0))),
            n => {
                return Err(MigrateError::Integrity(format!(
                    "unexpected number of objects {n} for key '{key}' in bucket '{bucket}'"
                )))
            }
        }
    }
    Ok(objects)
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8], table: &str, key: &str) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| {
        MigrateError::Query(format!(
            "{table} gatherKeys '{key}' unable to decode object: {e}"
        ))
    })
}

fn store_json<T: serde::Serialize>(
    store: &dyn DocumentStore,
    bucket: &str,
    key: &str,
    table: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    store
        .store_value(bucket, key, &raw)
        .map_err(|e| e.context(format!("{table} insertKeys '{key}'")))?;
    trace!(bucket, key, "stored object");
    Ok(())
}

impl TvBackend for RiakBackend {
    fn name(&self) -> &'static str {
        "Riak"
    }

    fn configure(&mut self, path: &Path) -> Result<()> {
        let cfg: RiakConfig = load_json(path)?;
        cfg.max_tls_version()?;
        self.config = Some(cfg);
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.store.is_some() {
            return Ok(());
        }
        let cfg = self
            .config
            .as_ref()
            .ok_or_else(|| MigrateError::Config("riak backend is not configured".into()))?;
        self.store = Some(Box::new(HttpCluster::connect(cfg)?));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.stop()?;
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        self.store()?.ping()
    }

    fn fetch(&mut self) -> Result<()> {
        self.gather_ssl()?;
        self.gather_dnssec()?;
        self.gather_url()?;
        self.gather_uri()?;
        info!(records = self.counts().total(), "fetched riak keys");
        Ok(())
    }

    fn insert(&mut self) -> Result<()> {
        let store = self.store()?;
        for row in &self.ssl {
            store_json(store, BUCKET_SSL, &row.object_key(), "RiakSSLKey", &row.keys)?;
        }
        for row in &self.dnssec {
            store_json(store, BUCKET_DNSSEC, &row.cdn, "RiakDNSSecKey", &row.keys)?;
        }
        for row in &self.url {
            let key = url_sig_object_key(&row.delivery_service);
            store_json(store, BUCKET_URL_SIG, &key, "RiakURLSigKey", &row.keys)?;
        }
        for row in &self.uri {
            store_json(store, BUCKET_URI_SIG, &row.delivery_service, "RiakURISignKey", &row.keys)?;
        }
        debug!(records = self.counts().total(), "stored riak keys");
        Ok(())
    }

    fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        for (i, row) in self.ssl.iter().enumerate() {
            if row.keys.delivery_service.is_empty() {
                errs.push(format!("SSL Key #{i}: Delivery Service is blank!"));
            }
            if row.keys.cdn.is_empty() {
                errs.push(format!("SSL Key #{i}: CDN is blank!"));
            }
            if row.version.is_empty() {
                errs.push(format!("SSL Key #{i}: Version is blank!"));
            }
        }
        for (i, row) in self.dnssec.iter().enumerate() {
            if row.cdn.is_empty() {
                errs.push(format!("DNSSec Key #{i}: CDN is blank!"));
            }
        }
        for (i, row) in self.uri.iter().enumerate() {
            if row.delivery_service.is_empty() {
                errs.push(format!("URI Key #{i}: Delivery Service is blank!"));
            }
        }
        for (i, row) in self.url.iter().enumerate() {
            if row.delivery_service.is_empty() {
                errs.push(format!("URL Key #{i}: Delivery Service is blank!"));
            }
        }
        errs
    }

    fn to_canonical(&mut self) -> Result<SecretBundle> {
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
                    cdn: row.cdn.clone(),
                    keys: row.keys.clone(),
                })
                .collect(),
            uri_signing_keys: self
                .uri
                .iter()
                .map(|row| UriSigningKeyRecord {
                    delivery_service: row.delivery_service.clone(),
                    keys: row.keys.clone(),
                })
                .collect(),
            url_sig_keys: self
                .url
                .iter()
                .map(|row| UrlSigKeyRecord {
                    delivery_service: row.delivery_service.clone(),
                    keys: row.keys.clone(),
                })
                .collect(),
        })
    }

    fn from_canonical(&mut self, bundle: &SecretBundle) -> Result<()> {
        self.ssl = bundle
            .ssl_keys
            .iter()
            .map(|r| SslRow {
                version: r.version.clone(),
                keys: r.keys.clone(),
            })
            .collect();
        self.dnssec = bundle
            .dnssec_keys
            .iter()
            .map(|r| DnssecRow {
                cdn: r.cdn.clone(),
                keys: r.keys.clone(),
            })
            .collect();
        self.uri = bundle
            .uri_signing_keys
            .iter()
            .map(|r| UriRow {
                delivery_service: r.delivery_service.clone(),
                keys: r.keys.clone(),
            })
            .collect();
        self.url = bundle
            .url_sig_keys
            .iter()
            .map(|r| UrlRow {
                delivery_service: r.delivery_service.clone(),
                keys: r.keys.clone(),
            })
            .collect();
        Ok(())
    }

    fn summary(&self) -> String {
        let target = match (&self.config, &self.store) {
            (Some(cfg), _) => format!("{}@{}:{}", cfg.user, cfg.host, cfg.port),
            (None, Some(store)) => store.describe(),
            (None, None) => "unconfigured".to_string(),
        };
        format!("Riak server {target}\n{}", self.counts())
    }
}
