//! Tracing setup for `settle`.
//!
//! Work for each target runs inside a `server` span (see [`crate::app::server_span`]), so the
//! console and file output carry `server{name=..}` on every event.
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use settled_core::config::LoggingConfig;

pub const LOG_DIR_NAME: &str = "settled";

/// Where events go, resolved from the config and `RUST_LOG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSinks {
    pub filter: String,
    pub console: bool,
    pub file: Option<PathBuf>,
}

impl LogSinks {
    /// `None` when logging is disabled. A non-blank `RUST_LOG` replaces the configured level.
    pub fn resolve(logging: &LoggingConfig, rust_log: Option<&str>) -> Result<Option<Self>, String> {
        if !logging.enabled {
            return Ok(None);
        }
        if !logging.console && !logging.file {
            return Err("logging disabled for both console and file".to_string());
        }

        let filter = rust_log
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(logging.level.as_str())
            .to_string();
        let file = logging
            .file
            .then(|| log_dir(logging).join(format!("settle.{}.log", std::process::id())));

        Ok(Some(Self {
            filter,
            console: logging.console,
            file,
        }))
    }
}

/// Configured directory, or `settled` under the OS temp dir when unset or blank.
pub fn log_dir(logging: &LoggingConfig) -> PathBuf {
    match logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        Some(dir) => PathBuf::from(dir),
        None => std::env::temp_dir().join(LOG_DIR_NAME),
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped; hold it until the process is done.
pub fn init(logging: &LoggingConfig) -> Result<Option<WorkerGuard>, String> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let Some(sinks) = LogSinks::resolve(logging, rust_log.as_deref())? else {
        return Ok(None);
    };
    let filter = EnvFilter::try_new(&sinks.filter)
        .map_err(|e| format!("invalid log filter {:?}: {e}", sinks.filter))?;

    let mut guard = None;
    let file_layer = match &sinks.file {
        Some(path) => {
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                return Err(format!("invalid log file path {}", path.display()));
            };
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("create log dir {} failed: {e}", dir.display()))?;
            let (writer, flush) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            guard = Some(flush);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let console_layer = sinks.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(guard)
}
