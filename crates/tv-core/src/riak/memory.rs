//! In-process stand-in for a Riak cluster.
//!
//! Clones share state, so a test can keep a handle while the adapter owns
//! another. Search understands `*:*`, `field:*` and `field:value` against the
//! first sibling of each object, and returns hits in key order.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::store::{DocumentStore, SearchDoc, SearchPage};
use super::{BUCKET_SSL, SSL_SEARCH_INDEX};
use crate::error::{MigrateError, Result};

type Bucket = BTreeMap<String, Vec<Vec<u8>>>;

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, Bucket>,
    indexes: BTreeMap<String, String>,
    search_calls: usize,
    stop_calls: usize,
    offline: bool,
}

#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .indexes
            .insert(SSL_SEARCH_INDEX.to_string(), BUCKET_SSL.to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Store `value` as the only sibling of `key`.
    pub fn put(&self, bucket: &str, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), vec![value.into()]);
    }

    /// Add a conflicting sibling next to whatever `key` already holds.
    pub fn add_sibling(&self, bucket: &str, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    /// List `key` without any stored value, as a lagging key listing would.
    pub fn add_phantom_key(&self, bucket: &str, key: &str) {
        let mut state = self.state.lock();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), Vec::new());
    }

    pub fn values(&self, bucket: &str, key: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().search_calls
    }

    /// Whether any handle has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stop_calls > 0
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    /// Make every ping fail, as an unreachable cluster would.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }
}

impl DocumentStore for MemoryCluster {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn ping(&self) -> Result<()> {
        if self.state.lock().offline {
            return Err(MigrateError::Connection("cluster is unreachable".into()));
        }
        Ok(())
    }

    fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        Ok(self.keys(bucket))
    }

    fn fetch_values(&self, bucket: &str, key: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.values(bucket, key))
    }

    fn store_value(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        self.put(bucket, key, value.to_vec());
        Ok(())
    }

    fn search(&self, index: &str, query: &str, start: usize, rows: usize) -> Result<SearchPage> {
        let mut state = self.state.lock();
        state.search_calls += 1;
        let bucket_name = state
            .indexes
            .get(index)
            .cloned()
            .ok_or_else(|| MigrateError::Query(format!("no such index '{index}'")))?;
        let matcher = Matcher::parse(query)?;

        let hits: Vec<SearchDoc> = state
            .buckets
            .get(&bucket_name)
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .filter_map(|(key, values)| values.first().map(|v| (key, v)))
            .filter(|(_, value)| matcher.matches(value))
            .map(|(key, _)| SearchDoc {
                key: key.clone(),
                bucket: bucket_name.clone(),
            })
            .collect();

        let num_found = hits.len();
        let docs = hits.into_iter().skip(start).take(rows).collect();
        Ok(SearchPage { num_found, docs })
    }

    fn stop(&self) -> Result<()> {
        self.state.lock().stop_calls += 1;
        Ok(())
    }
}

enum Matcher {
    All,
    Present(String),
    Equals(String, String),
}

impl Matcher {
    fn parse(query: &str) -> Result<Self> {
        let (field, value) = query
            .split_once(':')
            .ok_or_else(|| MigrateError::Query(format!("malformed query '{query}'")))?;
        Ok(match (field, value) {
            ("*", "*") => Matcher::All,
            (field, "*") => Matcher::Present(field.to_string()),
            (field, value) => Matcher::Equals(field.to_string(), value.to_string()),
        })
    }

    fn matches(&self, raw: &[u8]) -> bool {
        if let Matcher::All = self {
            return true;
        }
        let Ok(doc) = serde_json::from_slice::<serde_json::Value>(raw) else {
            return false;
        };
        match self {
            Matcher::All => true,
            Matcher::Present(field) => match doc.get(field) {
                None | Some(serde_json::Value::Null) => false,
                Some(serde_json::Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            },
            Matcher::Equals(field, want) => match doc.get(field) {
                Some(serde_json::Value::String(s)) => s == want,
                Some(other) => other.to_string() == *want,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(n: usize) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for i in 0..n {
            cluster.put(
                BUCKET_SSL,
                &format!("ds{i:03}-1"),
                format!(r#"{{"cdn":"cdn{}","deliveryservice":"ds{i:03}"}}"#, i % 2),
            );
        }
        cluster
    }

    #[test]
    fn field_queries_filter_and_page() {
        let cluster = cluster_with(5);
        cluster.put(BUCKET_SSL, "nocdn-1", r#"{"deliveryservice":"nocdn"}"#);

        let all = cluster.search(SSL_SEARCH_INDEX, "cdn:*", 0, 100).unwrap();
        assert_eq!(all.num_found, 5);

        let cdn0 = cluster.search(SSL_SEARCH_INDEX, "cdn:cdn0", 0, 100).unwrap();
        assert_eq!(cdn0.num_found, 3);

        let page = cluster.search(SSL_SEARCH_INDEX, "*:*", 2, 2).unwrap();
        assert_eq!(page.num_found, 6);
        assert_eq!(page.docs.len(), 2);
        assert_eq!(page.docs[0].key, "ds002-1");
        assert_eq!(page.docs[0].bucket, BUCKET_SSL);
        assert_eq!(cluster.search_calls(), 3);
    }

    #[test]
    fn unknown_index_is_query_error() {
        let cluster = MemoryCluster::new();
        assert!(matches!(
            cluster.search("nope", "*:*", 0, 10),
            Err(MigrateError::Query(_))
        ));
    }

    #[test]
    fn siblings_and_phantoms_are_visible() {
        let cluster = MemoryCluster::new();
        cluster.put("dnssec", "cdn1", "a");
        cluster.add_sibling("dnssec", "cdn1", "b");
        cluster.add_phantom_key("dnssec", "cdn2");
        assert_eq!(cluster.fetch_values("dnssec", "cdn1").unwrap().len(), 2);
        assert!(cluster.fetch_values("dnssec", "cdn2").unwrap().is_empty());
        assert!(cluster.fetch_values("dnssec", "cdn3").unwrap().is_empty());
        assert_eq!(cluster.list_keys("dnssec").unwrap(), vec!["cdn1", "cdn2"]);
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryCluster::new();
        let b = a.clone();
        a.store_value("url_sig_keys", "k", b"{}").unwrap();
        assert_eq!(b.keys("url_sig_keys"), vec!["k"]);
        b.stop().unwrap();
        assert!(a.is_stopped());
        a.ping().unwrap();
        b.set_offline(true);
        assert!(a.ping().is_err());
    }
}
