//! Where a blobvault node sends its log events
//!
//! A node logs to the console, to a rolling JSONL file, or both. Levels are
//! a default plus per-target overrides; `RUST_LOG` replaces both when set.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::Rotation;

/// Logging setup of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without an override
    pub level: String,

    /// Level overrides, e.g. `blobvault_storage::path = "debug"`
    pub targets: BTreeMap<String, String>,

    /// Console output, `None` to keep the console quiet
    pub console: Option<ConsoleFormat>,

    /// Rolling JSONL file
    pub file: Option<LogFile>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            console: Some(ConsoleFormat::Json),
            file: None,
        }
    }
}

impl LogConfig {
    /// Warnings and errors only, for test binaries
    pub fn warnings() -> Self {
        Self {
            level: "warn".to_string(),
            ..Self::default()
        }
    }

    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directives, the default level first, then overrides by target name
    pub fn directives(&self) -> String {
        self.targets
            .iter()
            .fold(self.level.clone(), |mut out, (target, level)| {
                out.push_str(&format!(",{target}={level}"));
                out
            })
    }
}

/// How events are printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// Same JSON lines as the log file
    Json,
    /// Human-readable, with ANSI colors
    Pretty,
}

/// A log file that rolls over on a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub directory: PathBuf,
    /// Files are named `<prefix>.<date>.log`
    #[serde(default = "LogFile::default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rollover: Rollover,
    /// Old files beyond this many are deleted
    #[serde(default)]
    pub keep: Option<usize>,
}

impl LogFile {
    /// Daily files named `blobvault.<date>.log` in `directory`, all kept
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: Self::default_prefix(),
            rollover: Rollover::default(),
            keep: None,
        }
    }

    fn default_prefix() -> String {
        "blobvault".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rollover {
    #[default]
    Daily,
    Hourly,
    /// One file for the life of the process
    Never,
}

impl From<Rollover> for Rotation {
    fn from(rollover: Rollover) -> Self {
        match rollover {
            Rollover::Daily => Rotation::DAILY,
            Rollover::Hourly => Rotation::HOURLY,
            Rollover::Never => Rotation::NEVER,
        }
    }
}
