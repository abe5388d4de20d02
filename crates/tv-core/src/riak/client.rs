//! Riak HTTP API client.
//!
//! Every call is a blocking HTTPS round trip with basic auth. Conflicting
//! siblings come back as `300 Multiple Choices` listing their vtags; each
//! sibling is then fetched on its own.

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::store::{DocumentStore, SearchDoc, SearchPage};
use super::RiakConfig;
use crate::error::{MigrateError, Result};

pub struct HttpCluster {
    client: Client,
    base: Url,
    user: String,
    password: String,
}

#[derive(Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    response: SearchBody,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(rename = "numFound")]
    num_found: usize,
    #[serde(default)]
    docs: Vec<RawDoc>,
}

#[derive(Deserialize)]
struct RawDoc {
    #[serde(rename = "_yz_rk")]
    key: String,
    #[serde(rename = "_yz_rb")]
    bucket: String,
}

impl HttpCluster {
    pub fn connect(cfg: &RiakConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(cfg.request_timeout())
            .danger_accept_invalid_certs(cfg.insecure);
        if let Some(version) = cfg.max_tls_version()? {
            builder = builder.max_tls_version(version);
        }
        let client = builder
            .build()
            .map_err(|e| MigrateError::Connection(format!("unable to start riak cluster: {e}")))?;
        let base = Url::parse(&format!("https://{}:{}/", cfg.host, cfg.port))
            .map_err(|e| MigrateError::Config(format!("invalid riak address: {e}")))?;
        Ok(Self {
            client,
            base,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MigrateError::Config(format!("riak address {} has no path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> Result<Response> {
        debug!(%url, "riak GET");
        self.client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .map_err(|e| MigrateError::Query(format!("riak request failed: {e}")))
    }

    fn bytes(resp: Response) -> Result<Vec<u8>> {
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| MigrateError::Query(format!("reading riak response: {e}")))
    }
}

fn check(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().unwrap_or_default();
        Err(MigrateError::Query(format!("{what}: {status}: {}", body.trim())))
    }
}

/// Parse the `Siblings:` body of a 300 response into vtags.
fn sibling_vtags(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "Siblings:")
        .map(str::to_string)
        .collect()
}

impl DocumentStore for HttpCluster {
    fn describe(&self) -> String {
        format!(
            "{}@{}:{}",
            self.user,
            self.base.host_str().unwrap_or_default(),
            self.base.port_or_known_default().unwrap_or_default()
        )
    }

    fn ping(&self) -> Result<()> {
        let resp = self
            .get(self.url(&["ping"])?)
            .map_err(|e| MigrateError::Connection(e.to_string()))?;
        check(resp, "riak ping")
            .map(|_| ())
            .map_err(|e| MigrateError::Connection(e.to_string()))
    }

    fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let mut url = self.url(&["buckets", bucket, "keys"])?;
        url.query_pairs_mut().append_pair("keys", "true");
        let resp = check(self.get(url)?, "listing riak keys")?;
        let list: KeyList = resp
            .json()
            .map_err(|e| MigrateError::Query(format!("decoding key list of '{bucket}': {e}")))?;
        Ok(list.keys)
    }

    fn fetch_values(&self, bucket: &str, key: &str) -> Result<Vec<Vec<u8>>> {
        let url = self.url(&["buckets", bucket, "keys", key])?;
        let resp = self.get(url.clone())?;
        match resp.status() {
            StatusCode::NOT_FOUND => {
                warn!(bucket, key, "got no object");
                Ok(Vec::new())
            }
            StatusCode::MULTIPLE_CHOICES => {
                let body = resp
                    .text()
                    .map_err(|e| MigrateError::Query(format!("reading siblings: {e}")))?;
                sibling_vtags(&body)
                    .into_iter()
                    .map(|vtag| {
                        let mut sibling = url.clone();
                        sibling.query_pairs_mut().append_pair("vtag", &vtag);
                        Self::bytes(check(self.get(sibling)?, "fetching riak sibling")?)
                    })
                    .collect()
            }
            _ => Ok(vec![Self::bytes(check(resp, "fetching riak value")?)?]),
        }
    }

    fn store_value(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let url = self.url(&["buckets", bucket, "keys", key])?;
        debug!(%url, "riak PUT");
        let resp = self
            .client
            .put(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(value.to_vec())
            .send()
            .map_err(|e| MigrateError::Query(format!("riak store failed: {e}")))?;
        check(resp, "storing riak value").map(|_| ())
    }

    fn search(&self, index: &str, query: &str, start: usize, rows: usize) -> Result<SearchPage> {
        let mut url = self.url(&["search", "query", index])?;
        url.query_pairs_mut()
            .append_pair("wt", "json")
            .append_pair("q", query)
            .append_pair("start", &start.to_string())
            .append_pair("rows", &rows.to_string())
            .append_pair("fl", "_yz_rk,_yz_rb");
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| {
                MigrateError::Query(format!(
                    "executing Riak search command index '{index}' query '{query}': {e}"
                ))
            })?;
        let body: SearchResponse = check(resp, "riak search")?
            .json()
            .map_err(|e| MigrateError::Query(format!("decoding search response: {e}")))?;
        Ok(SearchPage {
            num_found: body.response.num_found,
            docs: body
                .response
                .docs
                .into_iter()
                .map(|d| SearchDoc {
                    key: d.key,
                    bucket: d.bucket,
                })
                .collect(),
        })
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
