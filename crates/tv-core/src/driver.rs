//! End-to-end migration workflow.
//!
//! A run opens whichever backends its mode needs, obtains one bundle from the
//! source backend or a disk dump, validates it, then dumps it, compares it
//! with the target, or stages and writes it into the target. Every opened
//! backend is closed when the run ends, however it ends.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{new_backend, BackendKind, Confirm, TvBackend};
use crate::error::{MigrateError, Result};
use crate::model::SecretBundle;
use crate::snapshot;

// ── Run configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub kind: BackendKind,
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Backend(BackendSpec),
    /// A directory previously written by a dump.
    Directory(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Migrate,
    DryRun,
    Compare,
    Dump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub source: Source,
    pub target: BackendSpec,
    pub mode: Mode,
    pub dump_dir: PathBuf,
    pub no_confirm: bool,
    /// Treat validation violations as fatal before anything is written.
    pub require_valid: bool,
}

impl RunConfig {
    pub fn fills_from_disk(&self) -> bool {
        matches!(self.source, Source::Directory(_))
    }

    /// Filling always stages into the target; otherwise dump and dry runs
    /// never touch it.
    pub fn uses_target(&self) -> bool {
        self.fills_from_disk() || !matches!(self.mode, Mode::Dump | Mode::DryRun)
    }

    pub fn check(&self) -> Result<()> {
        if self.fills_from_disk() && self.mode == Mode::Dump {
            return Err(MigrateError::Config(
                "cannot dump and fill from disk in the same run".into(),
            ));
        }
        Ok(())
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Dumped(PathBuf),
    Matched,
    DryRun,
    /// The operator answered no to the insert prompt.
    Declined,
    Migrated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    /// One summary per bundle produced during the run.
    pub summaries: Vec<String>,
    /// Advisory violations that did not stop the run.
    pub violations: Vec<String>,
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Closes the wrapped backend when dropped.
struct Opened {
    role: &'static str,
    backend: Box<dyn TvBackend>,
}

impl Opened {
    fn start(role: &'static str, backend: Box<dyn TvBackend>) -> Result<Self> {
        let mut opened = Opened { role, backend };
        info!("Initiating {role} {}...", opened.name());
        opened
            .open()
            .map_err(|e| e.context(format!("issue starting {role}")))?;
        opened
            .ping()
            .map_err(|e| e.context(format!("unable to ping {role}")))?;
        Ok(opened)
    }
}

impl Deref for Opened {
    type Target = dyn TvBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl DerefMut for Opened {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend.as_mut()
    }
}

impl Drop for Opened {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            error!("closing {}: {e}", self.role);
        }
    }
}

/// Build, configure and run the backends named by `config`.
pub fn run(config: &RunConfig, confirm: Arc<dyn Confirm>) -> Result<RunReport> {
    config.check()?;
    let from = match &config.source {
        Source::Backend(spec) => Some(configured(spec, "fromSrv", confirm.clone())?),
        Source::Directory(_) => None,
    };
    let to = if config.uses_target() {
        Some(configured(&config.target, "toSrv", confirm.clone())?)
    } else {
        None
    };
    run_with(config, from, to, confirm.as_ref())
}

fn configured(
    spec: &BackendSpec,
    role: &str,
    confirm: Arc<dyn Confirm>,
) -> Result<Box<dyn TvBackend>> {
    let mut backend = new_backend(spec.kind, confirm);
    backend
        .configure(&spec.config_path)
        .map_err(|e| e.context(format!("unable to read {role} cfg")))?;
    Ok(backend)
}

/// Run the workflow with caller-supplied, configured backends.
///
/// `from` must be present unless `config` fills from disk, and `to` whenever
/// [`RunConfig::uses_target`] holds.
pub fn run_with(
    config: &RunConfig,
    from: Option<Box<dyn TvBackend>>,
    to: Option<Box<dyn TvBackend>>,
    confirm: &dyn Confirm,
) -> Result<RunReport> {
    config.check()?;
    if from.is_none() && !config.fills_from_disk() {
        return Err(MigrateError::Config("no source backend for this run".into()));
    }
    if to.is_none() && config.uses_target() {
        return Err(MigrateError::Config("no target backend for this run".into()));
    }

    let mut from = from.map(|b| Opened::start("fromSrv", b)).transpose()?;
    let mut to = to.map(|b| Opened::start("toSrv", b)).transpose()?;

    let mut summaries = Vec::new();
    let mut violations = Vec::new();

    let (bundle, source_name) = match (&mut from, &config.source) {
        (Some(src), _) => {
            info!("Fetching data from {}...", src.name());
            src.fetch()
                .map_err(|e| e.context("unable to fetch fromSrv data"))?;
            let bundle = src.to_canonical()?;
            let found = src.validate();
            screen("fromSrv", src.name(), found, config.require_valid, &mut violations)?;
            summaries.push(src.summary());
            (bundle, src.name().to_string())
        }
        (None, Source::Directory(dir)) => {
            let bundle = snapshot::fill(dir)
                .map_err(|e| MigrateError::Config(format!("error reading {}: {e}", dir.display())))?;
            screen("fromSrv", "disk", bundle.validate(), config.require_valid, &mut violations)?;
            summaries.push(format!("Disk backup:\n{}", bundle.counts()));
            (bundle, "disk".to_string())
        }
        (None, Source::Backend(_)) => {
            return Err(MigrateError::Config("no source backend for this run".into()))
        }
    };

    let outcome = match config.mode {
        Mode::Dump => {
            info!("Dumping data from {source_name}...");
            snapshot::dump(&bundle, &config.dump_dir)?;
            Outcome::Dumped(config.dump_dir.clone())
        }
        Mode::Compare => {
            let dst = target(&mut to)?;
            compare(dst, bundle, &source_name, &mut summaries)?
        }
        Mode::DryRun if to.is_none() => Outcome::DryRun,
        Mode::Migrate | Mode::DryRun => {
            let dst = target(&mut to)?;
            info!("Setting {} keys...", dst.name());
            dst.from_canonical(&bundle)
                .map_err(|e| e.context(format!("unable to set {} keys", dst.name())))?;
            let found = dst.validate();
            screen("toSrv", dst.name(), found, config.require_valid, &mut violations)?;
            summaries.push(dst.summary());

            if config.mode == Mode::DryRun {
                Outcome::DryRun
            } else if !config.no_confirm && !confirm.confirm_insert(dst.name())? {
                info!("insertion declined, nothing written");
                Outcome::Declined
            } else {
                info!("Inserting data into {}...", dst.name());
                dst.insert()?;
                recheck(dst, &mut violations)?;
                Outcome::Migrated
            }
        }
    };

    for summary in &summaries {
        info!("{summary}");
    }
    Ok(RunReport {
        outcome,
        summaries,
        violations,
    })
}

fn target(to: &mut Option<Opened>) -> Result<&mut Opened> {
    to.as_mut()
        .ok_or_else(|| MigrateError::Config("no target backend for this run".into()))
}

/// Log violations; fail only when `strict`.
fn screen(
    role: &str,
    backend: &str,
    found: Vec<String>,
    strict: bool,
    collected: &mut Vec<String>,
) -> Result<()> {
    if found.is_empty() {
        return Ok(());
    }
    if strict {
        return Err(MigrateError::Validation {
            backend: backend.to_string(),
            violations: found,
        });
    }
    collect(role, backend, found, collected);
    Ok(())
}

/// Record `found` as `<role> <backend>: <violation>`, once each.
fn collect(role: &str, backend: &str, found: Vec<String>, collected: &mut Vec<String>) {
    for v in found {
        let entry = format!("{role} {backend}: {v}");
        if !collected.contains(&entry) {
            warn!("{entry}");
            collected.push(entry);
        }
    }
}

/// Read back what the target now holds and validate that.
fn recheck(dst: &mut Opened, collected: &mut Vec<String>) -> Result<()> {
    info!("Validating stored {} keys...", dst.name());
    dst.fetch()
        .map_err(|e| e.context("unable to re-read toSrv data"))?;
    dst.to_canonical()?;
    let found = dst.validate();
    collect("toSrv", dst.name(), found, collected);
    Ok(())
}

fn compare(
    dst: &mut Opened,
    mut source: SecretBundle,
    source_name: &str,
    summaries: &mut Vec<String>,
) -> Result<Outcome> {
    info!("Fetching data from {}...", dst.name());
    dst.fetch()
        .map_err(|e| e.context("unable to fetch toSrv data"))?;
    let mut other = dst.to_canonical()?;
    info!("Validating {}", dst.name());
    let found = dst.validate();
    if !found.is_empty() {
        return Err(MigrateError::Validation {
            backend: dst.name().to_string(),
            violations: found,
        });
    }
    summaries.push(dst.summary());

    source.sort();
    other.sort();
    let mismatched: Vec<String> = source
        .compare(&other)
        .into_iter()
        .map(|kind| format!("from {0} and to {0} don't match", kind.tag()))
        .collect();
    if !mismatched.is_empty() {
        for m in &mismatched {
            error!("{m}");
        }
        return Err(MigrateError::Validation {
            backend: format!("{source_name} vs {}", dst.name()),
            violations: mismatched,
        });
    }
    info!("Both data sources have the same keys");
    Ok(Outcome::Matched)
}
