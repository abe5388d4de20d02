use crate::error::Result;

/// One search hit: the object key and the bucket it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDoc {
    pub key: String,
    pub bucket: String,
}

/// A page of search hits plus the total match count reported by the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub num_found: usize,
    pub docs: Vec<SearchDoc>,
}

/// Transport to a Riak cluster.
///
/// `fetch_values` returns every sibling stored under the key; an absent key is
/// an empty vec, not an error.
pub trait DocumentStore {
    /// `user@host:port`, or another short label.
    fn describe(&self) -> String;

    fn ping(&self) -> Result<()>;

    fn list_keys(&self, bucket: &str) -> Result<Vec<String>>;

    fn fetch_values(&self, bucket: &str, key: &str) -> Result<Vec<Vec<u8>>>;

    fn store_value(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()>;

    fn search(&self, index: &str, query: &str, start: usize, rows: usize) -> Result<SearchPage>;

    fn stop(&self) -> Result<()>;
}
