//! Logging configuration and subscriber setup for the daemon

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

const LOG_FILE_PREFIX: &str = "dmxbusd_";
const LOG_FILE_SUFFIX: &str = ".log";

/// `[log]` section of the daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
    /// Log files kept in `log_dir`, oldest removed first
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
            max_log_files: 10,
        }
    }
}

impl LogConfig {
    /// Configured level, INFO when unparsable
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    /// Whether `level` names a real level
    pub fn is_valid_level(&self) -> bool {
        self.level.parse::<LevelFilter>().is_ok()
    }

    /// Log file of the current day
    pub fn current_log_path(&self) -> PathBuf {
        let date = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir
            .join(format!("{}{}{}", LOG_FILE_PREFIX, date, LOG_FILE_SUFFIX))
    }

    pub fn ensure_log_directory(&self) -> std::io::Result<()> {
        if self.file_output {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Delete the oldest daemon log files beyond `max_log_files`.
    ///
    /// File names embed the date, so name order is age order.
    pub fn cleanup_old_logs(&self) -> std::io::Result<usize> {
        if !self.log_dir.is_dir() {
            return Ok(0);
        }
        let mut logs: Vec<PathBuf> = std::fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(LOG_FILE_SUFFIX))
            })
            .collect();
        if logs.len() <= self.max_log_files {
            return Ok(0);
        }
        logs.sort();
        let excess = logs.len() - self.max_log_files;
        for path in &logs[..excess] {
            std::fs::remove_file(path)?;
        }
        Ok(excess)
    }
}

/// Handle to keep the logging worker thread alive
pub struct LogGuard {
    _guard: WorkerGuard,
}

impl LogConfig {
    /// Configured level as the default directive; `RUST_LOG` refines it
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.parse_level().into())
            .from_env_lossy()
    }

    /// Today's log file, appended to across daemon restarts
    fn open_log_file(&self) -> Result<File> {
        let path = self.current_log_path();
        File::options()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {:?}", path))
    }
}

/// Install the global subscriber.
///
/// The console gets compact lines on stderr. The file, when enabled, is
/// written from a background worker and carries thread names, so ticks of
/// the periodic tasks can be told apart; the returned guard flushes it.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    config
        .ensure_log_directory()
        .context("Failed to create log directory")?;
    let pruned = config.cleanup_old_logs();

    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(config.env_filter())
    });

    let (file_layer, guard) = if config.file_output {
        let (writer, worker_guard) = tracing_appender::non_blocking(config.open_log_file()?);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_filter(config.env_filter());
        (Some(layer), Some(LogGuard { _guard: worker_guard }))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        file = ?config.file_output.then(|| config.current_log_path()),
        "dmxbusd logging started"
    );
    match pruned {
        Ok(0) => {}
        Ok(n) => tracing::debug!(removed = n, dir = ?config.log_dir, "pruned old log files"),
        Err(e) => tracing::warn!(dir = ?config.log_dir, "Failed to prune old log files: {}", e),
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_falls_back_to_info() {
        let mut config = LogConfig::default();
        assert_eq!(config.parse_level(), LevelFilter::INFO);
        config.level = "debug".to_string();
        assert_eq!(config.parse_level(), LevelFilter::DEBUG);
        config.level = "chatty".to_string();
        assert_eq!(config.parse_level(), LevelFilter::INFO);
        assert!(!config.is_valid_level());
    }

    #[test]
    fn test_current_log_path_in_log_dir() {
        let config = LogConfig {
            log_dir: PathBuf::from("/var/log/dmxbus"),
            ..LogConfig::default()
        };
        let path = config.current_log_path();
        assert!(path.starts_with("/var/log/dmxbus"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(LOG_FILE_PREFIX));
        assert!(name.ends_with(LOG_FILE_SUFFIX));
    }

    #[test]
    fn test_log_file_is_appended() {
        use std::io::Write;

        let dir = tempfile::TempDir::new().unwrap();
        let config = LogConfig {
            file_output: true,
            log_dir: dir.path().to_path_buf(),
            ..LogConfig::default()
        };
        config.open_log_file().unwrap().write_all(b"first\n").unwrap();
        config.open_log_file().unwrap().write_all(b"second\n").unwrap();

        let content = std::fs::read_to_string(config.current_log_path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
