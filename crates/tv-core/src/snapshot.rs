//! Disk snapshots of a [`SecretBundle`].
//!
//! One JSON array file per record kind, so a dump can be inspected, edited or
//! filled back kind by kind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::model::{RecordKind, SecretBundle};

pub const SSL_KEYS_FILE: &str = "sslkeys.json";
pub const DNSSEC_KEYS_FILE: &str = "dnsseckeys.json";
pub const URL_SIG_KEYS_FILE: &str = "urlkeys.json";
pub const URI_SIGNING_KEYS_FILE: &str = "urikeys.json";

pub fn file_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::SslKeys => SSL_KEYS_FILE,
        RecordKind::DnssecKeys => DNSSEC_KEYS_FILE,
        RecordKind::UriSigningKeys => URI_SIGNING_KEYS_FILE,
        RecordKind::UrlSigKeys => URL_SIG_KEYS_FILE,
    }
}

/// Write every collection of `bundle` into `dir`, creating it if needed.
pub fn dump(bundle: &SecretBundle, dir: &Path) -> Result<()> {
    create_dir(dir)?;
    write_kind(dir, RecordKind::SslKeys, &bundle.ssl_keys)?;
    write_kind(dir, RecordKind::DnssecKeys, &bundle.dnssec_keys)?;
    write_kind(dir, RecordKind::UriSigningKeys, &bundle.uri_signing_keys)?;
    write_kind(dir, RecordKind::UrlSigKeys, &bundle.url_sig_keys)?;
    info!(dir = %dir.display(), "dumped {} records", bundle.counts().total());
    Ok(())
}

/// Read a bundle previously written by [`dump`].
pub fn fill(dir: &Path) -> Result<SecretBundle> {
    let bundle = SecretBundle {
        ssl_keys: read_kind(dir, RecordKind::SslKeys)?,
        dnssec_keys: read_kind(dir, RecordKind::DnssecKeys)?,
        uri_signing_keys: read_kind(dir, RecordKind::UriSigningKeys)?,
        url_sig_keys: read_kind(dir, RecordKind::UrlSigKeys)?,
    };
    info!(dir = %dir.display(), "filled {} records", bundle.counts().total());
    Ok(bundle)
}

fn create_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o750))?;
    }
    Ok(())
}

fn write_kind<T: Serialize>(dir: &Path, kind: RecordKind, records: &[T]) -> Result<()> {
    let path = dir.join(file_name(kind));
    let json = serde_json::to_vec(records)?;

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(&path).map_err(|e| {
        MigrateError::Io(std::io::Error::new(
            e.kind(),
            format!("writing {}: {e}", path.display()),
        ))
    })?;
    file.write_all(&json)?;
    file.sync_all()?;
    debug!(path = %path.display(), records = records.len(), "wrote {kind}");
    Ok(())
}

fn read_kind<T: DeserializeOwned>(dir: &Path, kind: RecordKind) -> Result<Vec<T>> {
    let path = dir.join(file_name(kind));
    let raw = fs::read(&path).map_err(|e| {
        MigrateError::Io(std::io::Error::new(
            e.kind(),
            format!("reading {}: {e}", path.display()),
        ))
    })?;
    serde_json::from_slice(&raw)
        .map_err(|e| MigrateError::Config(format!("decoding {kind} from {}: {e}", path.display())))
}
