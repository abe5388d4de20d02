mod logging;
mod prompt;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tv_core::{BackendKind, BackendSpec, Mode, Outcome, RunConfig, Source};

use crate::logging::{LogConfig, LogLevel};
use crate::prompt::StdinConfirm;

#[derive(Parser, Debug)]
#[command(author, version, about = "Traffic Vault migration tool", long_about = None)]
struct Cli {
    /// Backend to read from (Riak|PG)
    #[arg(short = 't', long = "fromType", default_value = "Riak")]
    from_type: String,
    /// Backend to write to (Riak|PG)
    #[arg(short = 'o', long = "toType", default_value = "PG")]
    to_type: String,
    /// Config file of the source backend
    #[arg(short = 'f', long = "fromCfgPath", default_value = "riak.json")]
    from_cfg_path: PathBuf,
    /// Config file of the target backend
    #[arg(short = 'g', long = "toCfgPath", default_value = "pg.json")]
    to_cfg_path: PathBuf,
    /// Stage and validate, but write nothing
    #[arg(short = 'r', long = "dry", conflicts_with = "compare")]
    dry: bool,
    /// Compare source and target keys instead of migrating
    #[arg(short = 'c', long = "compare")]
    compare: bool,
    /// Don't require confirmation before inserting records
    #[arg(short = 'm', long = "noConfirm")]
    no_confirm: bool,
    /// Write the source keys to disk
    #[arg(short = 'd', long = "dump", conflicts_with = "fill")]
    dump: bool,
    /// Directory the dump is written to
    #[arg(long = "dumpDir", default_value = "dump")]
    dump_dir: PathBuf,
    /// Insert the keys found in this directory into the target
    #[arg(short = 'i', long = "fill", value_name = "DIR")]
    fill: Option<PathBuf>,
    /// Log configuration file
    #[arg(short = 'l', long = "logCfg", value_name = "FILE", conflicts_with = "log_level")]
    log_cfg: Option<PathBuf>,
    /// Log this level and everything more severe (error|warning|info|debug|event)
    #[arg(short = 'e', long = "logLevel", value_name = "LEVEL")]
    log_level: Option<String>,
    /// Fail the run on validation violations instead of warning
    #[arg(long = "requireValid")]
    require_valid: bool,
}

impl Cli {
    fn log_config(&self) -> Result<LogConfig> {
        if let Some(path) = &self.log_cfg {
            return LogConfig::load(path);
        }
        match &self.log_level {
            Some(level) => Ok(LogConfig::at_level(level.parse::<LogLevel>()?)),
            None => Ok(LogConfig::default()),
        }
    }

    fn run_config(&self) -> Result<RunConfig> {
        let source = match &self.fill {
            Some(dir) => Source::Directory(dir.clone()),
            None => Source::Backend(BackendSpec {
                kind: self
                    .from_type
                    .parse::<BackendKind>()
                    .with_context(|| format!("Unknown fromType {}", self.from_type))?,
                config_path: self.from_cfg_path.clone(),
            }),
        };
        let target = BackendSpec {
            kind: self
                .to_type
                .parse::<BackendKind>()
                .with_context(|| format!("Unknown toType {}", self.to_type))?,
            config_path: self.to_cfg_path.clone(),
        };
        let mode = if self.dump {
            Mode::Dump
        } else if self.compare {
            Mode::Compare
        } else if self.dry {
            Mode::DryRun
        } else {
            Mode::Migrate
        };
        Ok(RunConfig {
            source,
            target,
            mode,
            dump_dir: self.dump_dir.clone(),
            no_confirm: self.no_confirm,
            require_valid: self.require_valid,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_config()?)?;
    let config = cli.run_config()?;

    let report = tv_core::run(&config, Arc::new(StdinConfirm))?;
    match report.outcome {
        Outcome::Dumped(dir) => info!("keys written to {}", dir.display()),
        Outcome::Matched => {}
        Outcome::DryRun => info!("dry run complete, nothing written"),
        Outcome::Declined => info!("nothing written"),
        Outcome::Migrated => info!("migration complete"),
    }
    Ok(())
}
