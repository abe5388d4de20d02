//! Leveled log routing.
//!
//! Each of the five levels (error, warning, info, debug, event) goes to its
//! own destination. Core code logs "event" records at `TRACE`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Stdout,
    Stderr,
    Null,
    File(PathBuf),
}

impl From<&str> for Sink {
    fn from(value: &str) -> Self {
        match value {
            "stdout" => Sink::Stdout,
            "stderr" => Sink::Stderr,
            "" | "null" => Sink::Null,
            path => Sink::File(PathBuf::from(path)),
        }
    }
}

impl<'de> Deserialize<'de> for Sink {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Sink::from(raw.as_str()))
    }
}

/// Destination per level, as read from `--logCfg`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub error_log: Sink,
    pub warning_log: Sink,
    pub info_log: Sink,
    pub debug_log: Sink,
    pub event_log: Sink,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            error_log: Sink::Stderr,
            warning_log: Sink::Stdout,
            info_log: Sink::Stdout,
            debug_log: Sink::Null,
            event_log: Sink::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Event,
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "event" => Ok(LogLevel::Event),
            other => Err(anyhow!(
                "unknown logLevel {other} (error|warning|info|debug|event)"
            )),
        }
    }
}

impl LogConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(tv_core::config::load_json(path)?)
    }

    /// `level` and everything more severe goes to stdout, errors to stderr,
    /// the rest is dropped.
    pub fn at_level(level: LogLevel) -> Self {
        let pick = |l: LogLevel| if l <= level { Sink::Stdout } else { Sink::Null };
        Self {
            error_log: Sink::Stderr,
            warning_log: pick(LogLevel::Warning),
            info_log: pick(LogLevel::Info),
            debug_log: pick(LogLevel::Debug),
            event_log: pick(LogLevel::Event),
        }
    }
}

/// Install the global subscriber.
pub fn init(cfg: &LogConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(level_layer(Level::ERROR, &cfg.error_log)?)
        .with(level_layer(Level::WARN, &cfg.warning_log)?)
        .with(level_layer(Level::INFO, &cfg.info_log)?)
        .with(level_layer(Level::DEBUG, &cfg.debug_log)?)
        .with(level_layer(Level::TRACE, &cfg.event_log)?)
        .try_init()
        .map_err(|e| anyhow!("unable to install logger: {e}"))
}

fn level_layer<S>(level: Level, sink: &Sink) -> Result<Option<impl Layer<S>>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = match sink {
        Sink::Null => return Ok(None),
        Sink::Stdout => BoxMakeWriter::new(io::stdout),
        Sink::Stderr => BoxMakeWriter::new(io::stderr),
        Sink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("unable to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };
    Ok(Some(
        tracing_subscriber::fmt::layer::<S>()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_filter(filter_fn(move |meta| *meta.level() == level)),
    ))
}
