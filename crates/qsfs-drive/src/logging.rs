use std::path::PathBuf;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogSink {
    /// stderr, keeping stdout clean for the FUSE adapter.
    Console,
    /// Append to a file.
    File(PathBuf),
}

/// Logging setup for the mount process.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Destination of log lines.
    pub sink: LogSink,
    /// Force the `debug` level regardless of `RUST_LOG`.
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            sink: LogSink::Console,
            debug: false,
        }
    }
}

/// Install the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init_logging(config: LoggingConfig) -> std::io::Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (writer, ansi) = match &config.sink {
        LogSink::Console => (BoxMakeWriter::new(std::io::stderr), true),
        LogSink::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(std::sync::Arc::new(file)), false)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .finish()
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            sink: LogSink::File(dir.path().join("logs/qsfs.log")),
            debug: true,
        };
        assert!(init_logging(config.clone()).is_ok());
        assert!(init_logging(config).is_ok());
    }
}
