//! The capability set shared by every Traffic Vault storage adapter.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{MigrateError, Result};
use crate::model::SecretBundle;
use crate::postgres::PgBackend;
use crate::riak::RiakBackend;

/// A Traffic Vault storage adapter.
///
/// An adapter owns its own record tables. `fetch` fills them from the backend,
/// `from_canonical` fills them from a bundle, and `insert` writes them back.
pub trait TvBackend {
    /// Display name, as accepted on the command line.
    fn name(&self) -> &'static str;

    /// Parse the backend's JSON config file.
    fn configure(&mut self, path: &Path) -> Result<()>;

    fn open(&mut self) -> Result<()>;

    /// Release the connection. Safe to call more than once, or before `open`.
    fn close(&mut self) -> Result<()>;

    fn ping(&mut self) -> Result<()>;

    fn fetch(&mut self) -> Result<()>;

    /// Upsert the loaded tables.
    fn insert(&mut self) -> Result<()>;

    /// Semantic defects in the loaded tables; advisory.
    fn validate(&self) -> Vec<String>;

    /// Decrypting backends decode their payloads here.
    fn to_canonical(&mut self) -> Result<SecretBundle>;

    fn from_canonical(&mut self, bundle: &SecretBundle) -> Result<()>;

    /// Connection line followed by per-kind loaded counts.
    fn summary(&self) -> String;
}

// ── Backend selection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Riak,
    Postgres,
}

impl BackendKind {
    pub const SUPPORTED: &'static str = "Riak|PG";

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Riak => "Riak",
            BackendKind::Postgres => "PG",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Riak" => Ok(BackendKind::Riak),
            "PG" => Ok(BackendKind::Postgres),
            other => Err(MigrateError::Config(format!(
                "unknown backend type '{other}', supported: {}",
                BackendKind::SUPPORTED
            ))),
        }
    }
}

/// Build an unconfigured adapter of the given kind.
pub fn new_backend(kind: BackendKind, confirm: Arc<dyn Confirm>) -> Box<dyn TvBackend> {
    match kind {
        BackendKind::Riak => Box::new(RiakBackend::new(confirm)),
        BackendKind::Postgres => Box::new(PgBackend::new()),
    }
}

// ── Operator confirmation ───────────────────────────────────────────────────

/// Answers the yes/no questions a run may need to ask.
pub trait Confirm {
    /// Whether to write the staged records into `target`.
    fn confirm_insert(&self, target: &str) -> Result<bool>;

    /// Whether to keep paging a search that matched `found` documents.
    fn confirm_large_result(&self, found: usize) -> Result<bool>;
}

/// Fixed answers, for unattended runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirm {
    pub insert: bool,
    pub large_result: bool,
}

impl FixedConfirm {
    pub fn yes() -> Self {
        Self {
            insert: true,
            large_result: true,
        }
    }

    pub fn no() -> Self {
        Self {
            insert: false,
            large_result: false,
        }
    }
}

impl Confirm for FixedConfirm {
    fn confirm_insert(&self, _target: &str) -> Result<bool> {
        Ok(self.insert)
    }

    fn confirm_large_result(&self, _found: usize) -> Result<bool> {
        Ok(self.large_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_names() {
        assert_eq!("Riak".parse::<BackendKind>().unwrap(), BackendKind::Riak);
        assert_eq!("PG".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!(BackendKind::Postgres.to_string(), "PG");
    }

    #[test]
    fn unknown_name_lists_supported() {
        let err = "Mongo".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.to_string().contains("Riak|PG"));
        assert!("pg".parse::<BackendKind>().is_err());
    }

    #[test]
    fn factory_builds_named_backends() {
        let confirm: Arc<dyn Confirm> = Arc::new(FixedConfirm::yes());
        assert_eq!(new_backend(BackendKind::Riak, confirm.clone()).name(), "Riak");
        assert_eq!(new_backend(BackendKind::Postgres, confirm).name(), "PG");
    }

    #[test]
    fn unopened_backends_close_cleanly() {
        let confirm: Arc<dyn Confirm> = Arc::new(FixedConfirm::no());
        for kind in [BackendKind::Riak, BackendKind::Postgres] {
            let mut backend = new_backend(kind, confirm.clone());
            backend.close().unwrap();
            backend.close().unwrap();
        }
    }
}
