//! JSONL and console logging for blobvault nodes
//!
//! The storage crates only emit `tracing` events and spans. This crate
//! decides where they go: JSON lines on stdout by default, a rolling JSONL
//! file for long-running nodes, or pretty console output while debugging.
//!
//! ```ignore
//! use blobvault_logging::{BlobvaultSubscriberBuilder, ConsoleFormat, LogFile};
//!
//! let _guard = BlobvaultSubscriberBuilder::new()
//!     .with_console(Some(ConsoleFormat::Pretty))
//!     .with_file(LogFile::new("/var/log/blobvault"))
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleFormat, LogConfig, LogFile, Rollover};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Base subscriber every output layer is stacked on
type Base = Layered<EnvFilter, Registry>;

/// One output of the subscriber
pub type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Subscriber produced by [`BlobvaultSubscriberBuilder::build`]
pub type BlobvaultSubscriber = Layered<Vec<BoxedLayer>, Base>;

/// Errors from setting up logging
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid filter: {0}")]
    Filter(String),

    #[error("Log file error: {0}")]
    File(#[from] InitError),

    #[error("Subscriber already set: {0}")]
    Init(#[from] TryInitError),
}

/// Builds the subscriber of a node from a [`LogConfig`]
#[derive(Debug)]
pub struct BlobvaultSubscriberBuilder {
    config: LogConfig,
}

impl BlobvaultSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Console format, `None` to turn the console off
    pub fn with_console(mut self, format: Option<ConsoleFormat>) -> Self {
        self.config.console = format;
        self
    }

    pub fn with_file(mut self, file: LogFile) -> Self {
        self.config.file = Some(file);
        self
    }

    /// Build the subscriber without installing it
    ///
    /// The returned guard flushes the file writer when dropped and must be
    /// kept alive as long as file output is wanted.
    pub fn build(self) -> Result<(BlobvaultSubscriber, Option<WorkerGuard>), LogError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.directives())
                .map_err(|e| LogError::Filter(e.to_string()))?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        match self.config.console {
            Some(ConsoleFormat::Json) => layers.push(json_layer(std::io::stdout)),
            Some(ConsoleFormat::Pretty) => layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .boxed(),
            ),
            None => {}
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, file_guard) = file_writer(file)?;
            layers.push(json_layer(writer));
            guard = Some(file_guard);
        }

        let subscriber = Registry::default().with(env_filter).with(layers);
        Ok((subscriber, guard))
    }

    /// Install the subscriber globally
    ///
    /// Fails if a global subscriber has already been set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let (subscriber, guard) = self.build()?;
        subscriber.try_init()?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        }
    }
}

impl Default for BlobvaultSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_layer<W>(writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(writer)
        .boxed()
}

fn file_writer(file: &LogFile) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let mut builder = RollingFileAppender::builder()
        .rotation(file.rollover.into())
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log");
    if let Some(keep) = file.keep {
        builder = builder.max_log_files(keep);
    }
    let appender = builder.build(&file.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Install JSON lines on stdout at `info`
pub fn init_default() {
    BlobvaultSubscriberBuilder::new().init();
}

/// Install warnings-only output for tests
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = BlobvaultSubscriberBuilder::new()
        .with_config(LogConfig::warnings())
        .try_init();
}
