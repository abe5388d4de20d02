//! Traffic Vault secret migration.
//!
//! Moves TLS keys, DNSSEC keys and URL/URI signing keys between the Riak and
//! PostgreSQL Traffic Vault backends, or to and from JSON dumps on disk.

pub mod backend;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod model;
pub mod postgres;
pub mod riak;
pub mod snapshot;

pub use backend::{new_backend, BackendKind, Confirm, FixedConfirm, TvBackend};
pub use driver::{run, run_with, BackendSpec, Mode, Outcome, RunConfig, RunReport, Source};
pub use error::{MigrateError, Result};
pub use model::SecretBundle;
