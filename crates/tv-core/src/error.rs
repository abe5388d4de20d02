use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("validation errors ({backend}):\n{}", .violations.join("\n"))]
    Validation {
        backend: String,
        violations: Vec<String>,
    },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("aborted: {0}")]
    Aborted(String),
}

impl MigrateError {
    /// Prefix the message of a string-carrying variant, keeping its kind.
    pub fn context(self, prefix: impl std::fmt::Display) -> Self {
        match self {
            MigrateError::Config(m) => MigrateError::Config(format!("{prefix}: {m}")),
            MigrateError::Connection(m) => MigrateError::Connection(format!("{prefix}: {m}")),
            MigrateError::Query(m) => MigrateError::Query(format!("{prefix}: {m}")),
            MigrateError::Integrity(m) => MigrateError::Integrity(format!("{prefix}: {m}")),
            MigrateError::Crypto(m) => MigrateError::Crypto(format!("{prefix}: {m}")),
            MigrateError::Aborted(m) => MigrateError::Aborted(format!("{prefix}: {m}")),
            other => other,
        }
    }

    /// Validation violations are the only non-fatal kind.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MigrateError::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = MigrateError::Integrity("2 objects".into()).context("RiakSSLKey gatherKeys");
        match err {
            MigrateError::Integrity(m) => assert_eq!(m, "RiakSSLKey gatherKeys: 2 objects"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validation_lists_every_violation() {
        let err = MigrateError::Validation {
            backend: "PG".into(),
            violations: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "validation errors (PG):\na\nb");
        assert!(!err.is_fatal());
    }
}
