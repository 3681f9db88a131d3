use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging setup for the host process.
///
/// stdout carries the JSON-RPC stream, so logs go to stderr or a file.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "ext_host::rpc=trace"
    pub level: String,
    /// Optional log file. If None, logs go to stderr only
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read `RUST_LOG`, `EXT_HOST_LOG_FILE`, `EXT_HOST_LOG_UNIQUE` and `EXT_HOST_LOG_JSON`
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let unique = env::var("EXT_HOST_LOG_UNIQUE").unwrap_or_default() == "true";

        let file_path = env::var("EXT_HOST_LOG_FILE").ok().map(|path| {
            let path = PathBuf::from(path);
            if unique {
                with_pid_suffix(path, std::process::id())
            } else {
                path
            }
        });

        let json_format = env::var("EXT_HOST_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// CLI flags win over environment
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// `host.log` -> `host.<pid>.log`, so several hosts can share a log directory
fn with_pid_suffix(mut path: PathBuf, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path;
    };
    let file_name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) if !extension.is_empty() => format!("{stem}.{pid}.{extension}"),
        _ => format!("{stem}.{pid}"),
    };
    path.set_file_name(file_name);
    path
}

/// Append-mode log file, creating missing parent directories
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    // ANSI colours only make sense on a terminal-facing stderr
    let (writer, ansi) = match config.file_path.as_deref() {
        Some(path) => (BoxMakeWriter::new(open_log_file(path)?), false),
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        registry
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()?;
    }
    Ok(())
}

/// One structured line per JSON-RPC message crossing the host boundary
#[macro_export]
macro_rules! log_rpc_message {
    ($level:expr, $direction:expr, $method:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            method = $method,
            data = ?$data,
            pid = std::process::id(),
            "RPC message"
        );
    };
}

/// Elapsed time of a named host operation
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Operation timing"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_suffix_keeps_extension() {
        assert_eq!(
            with_pid_suffix(PathBuf::from("/tmp/host.log"), 42),
            PathBuf::from("/tmp/host.42.log")
        );
        assert_eq!(
            with_pid_suffix(PathBuf::from("/tmp/host"), 42),
            PathBuf::from("/tmp/host.42")
        );
    }

    #[test]
    fn test_open_log_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/host.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = LogConfig::default()
            .with_overrides(Some("debug".to_string()), Some(PathBuf::from("x.log")));
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("x.log")));

        let untouched = LogConfig::default().with_overrides(None, None);
        assert_eq!(untouched.level, "info");
        assert!(untouched.file_path.is_none());
    }
}
