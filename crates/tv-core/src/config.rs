use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Read and decode a JSON config file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).map_err(|e| {
        MigrateError::Config(format!(
            "unable to read config file {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        MigrateError::Config(format!(
            "unable to parse config file {}: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize)]
    struct Sample {
        host: String,
        port: u16,
    }

    #[test]
    fn loads_typed_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"host":"db.local","port":5432}"#).unwrap();
        let cfg: Sample = load_json(&path).unwrap();
        assert_eq!(cfg.host, "db.local");
        assert_eq!(cfg.port, 5432);
    }

    #[test]
    fn missing_and_malformed_files_are_config_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = load_json::<Sample>(&missing).unwrap_err();
        assert!(matches!(err, MigrateError::Config(ref m) if m.contains("unable to read")));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{host:").unwrap();
        let err = load_json::<Sample>(&bad).unwrap_err();
        assert!(matches!(err, MigrateError::Config(ref m) if m.contains("unable to parse")));
    }
}
