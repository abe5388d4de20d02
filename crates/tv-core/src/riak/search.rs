use tracing::{debug, warn};

use super::store::{DocumentStore, SearchDoc};
use crate::backend::Confirm;
use crate::error::{MigrateError, Result};

/// Pages past this many multiples of the page size need operator approval.
pub const LARGE_RESULT_PAGES: usize = 10;

/// Run `query` against `index` and return every hit, paging by `page_size`.
///
/// The hits come back in the order the index returned them, page after page,
/// as a single unpaginated query would.
pub fn search_all(
    store: &dyn DocumentStore,
    index: &str,
    query: &str,
    page_size: usize,
    confirm: &dyn Confirm,
) -> Result<Vec<SearchDoc>> {
    if page_size == 0 {
        return Err(MigrateError::Query("search page size must be positive".into()));
    }
    let first = store.search(index, query, 0, page_size)?;
    let total = first.num_found;
    if total <= page_size {
        return Ok(first.docs);
    }

    if total > page_size.saturating_mul(LARGE_RESULT_PAGES) {
        warn!(index, query, total, "search matched a large number of documents");
        if !confirm.confirm_large_result(total)? {
            return Err(MigrateError::Aborted(format!(
                "search of index '{index}' matched {total} documents"
            )));
        }
    }

    let mut docs = Vec::new();
    let mut page = first.docs;
    loop {
        if page.is_empty() {
            return Err(MigrateError::Integrity(format!(
                "search of index '{index}' returned an empty page at offset {} of {total}",
                docs.len()
            )));
        }
        docs.append(&mut page);
        if docs.len() >= total {
            break;
        }
        debug!(index, offset = docs.len(), total, "fetching next search page");
        page = store.search(index, query, docs.len(), page_size)?.docs;
    }

    if docs.len() > total {
        return Err(MigrateError::Integrity(format!(
            "search of index '{index}' returned {} documents, expected {total}",
            docs.len()
        )));
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FixedConfirm;
    use crate::riak::memory::MemoryCluster;
    use crate::riak::store::SearchPage;
    use crate::riak::{BUCKET_SSL, SSL_SEARCH_INDEX};

    fn cluster_with(n: usize) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for i in 0..n {
            cluster.put(
                BUCKET_SSL,
                &format!("ds{i:05}-1"),
                format!(r#"{{"cdn":"cdn1","deliveryservice":"ds{i:05}"}}"#),
            );
        }
        cluster
    }

    #[test]
    fn paging_matches_single_query() {
        let page = 4;
        for n in [0, page, page + 1, page * 3 + 7] {
            let cluster = cluster_with(n);
            let unpaged = cluster
                .search(SSL_SEARCH_INDEX, "cdn:*", 0, usize::MAX)
                .unwrap()
                .docs;
            let paged =
                search_all(&cluster, SSL_SEARCH_INDEX, "cdn:*", page, &FixedConfirm::yes())
                    .unwrap();
            assert_eq!(paged, unpaged, "n = {n}");
            assert_eq!(paged.len(), n);
        }
    }

    #[test]
    fn single_page_needs_one_round_trip() {
        let cluster = cluster_with(4);
        search_all(&cluster, SSL_SEARCH_INDEX, "cdn:*", 4, &FixedConfirm::no()).unwrap();
        assert_eq!(cluster.search_calls(), 1);
    }

    #[test]
    fn large_result_requires_confirmation() {
        let cluster = cluster_with(21);
        let err = search_all(&cluster, SSL_SEARCH_INDEX, "cdn:*", 2, &FixedConfirm::no())
            .unwrap_err();
        assert!(matches!(err, MigrateError::Aborted(_)));
        assert_eq!(cluster.search_calls(), 1);

        let docs =
            search_all(&cluster, SSL_SEARCH_INDEX, "cdn:*", 2, &FixedConfirm::yes()).unwrap();
        assert_eq!(docs.len(), 21);
    }

    /// Reports more matches than it ever returns.
    struct ShrinkingIndex;

    impl DocumentStore for ShrinkingIndex {
        fn describe(&self) -> String {
            "shrinking".into()
        }
        fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn list_keys(&self, _bucket: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn fetch_values(&self, _bucket: &str, _key: &str) -> Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
        fn store_value(&self, _bucket: &str, _key: &str, _value: &[u8]) -> Result<()> {
            Ok(())
        }
        fn search(&self, _index: &str, _q: &str, start: usize, rows: usize) -> Result<SearchPage> {
            let available = 5usize.saturating_sub(start).min(rows);
            Ok(SearchPage {
                num_found: 9,
                docs: (start..start + available)
                    .map(|i| SearchDoc {
                        key: format!("k{i}"),
                        bucket: "ssl".into(),
                    })
                    .collect(),
            })
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_page_before_total_is_integrity_error() {
        let err = search_all(&ShrinkingIndex, "sslkeys", "cdn:*", 2, &FixedConfirm::yes())
            .unwrap_err();
        assert!(matches!(err, MigrateError::Integrity(_)));
    }

    struct HugeIndex;

    impl DocumentStore for HugeIndex {
        fn describe(&self) -> String {
            "huge".into()
        }
        fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn list_keys(&self, _bucket: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn fetch_values(&self, _bucket: &str, _key: &str) -> Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
        fn store_value(&self, _bucket: &str, _key: &str, _value: &[u8]) -> Result<()> {
            Ok(())
        }
        fn search(&self, _index: &str, _q: &str, start: usize, _rows: usize) -> Result<SearchPage> {
            let docs = if start == 0 {
                vec![SearchDoc {
                    key: "k0".into(),
                    bucket: "ssl".into(),
                }]
            } else {
                Vec::new()
            };
            Ok(SearchPage {
                num_found: usize::MAX / 2 + 1,
                docs,
            })
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn huge_page_size_does_not_overflow_threshold() {
        let err = search_all(&HugeIndex, "sslkeys", "cdn:*", usize::MAX / 2, &FixedConfirm::no())
            .unwrap_err();
        assert!(matches!(err, MigrateError::Integrity(_)));
    }
}
