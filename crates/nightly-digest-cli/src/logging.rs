use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/nightly-digest.log";

/// Where and how much the binary logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `nightly_digest_core=debug`.
    pub directive: String,
    /// `None` disables the file sink.
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// `TRACING_LEVEL` and `LOG_FILE_PATH`; `--verbose` wins over the level.
    /// An empty `LOG_FILE_PATH` or `-` turns file logging off.
    pub fn from_env(verbose: bool) -> Self {
        Self::resolve(verbose, |key| env::var(key).ok())
    }

    fn resolve(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let directive = if verbose {
            "debug".to_string()
        } else {
            lookup("TRACING_LEVEL")
                .filter(|level| !level.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
        };
        let file = match lookup("LOG_FILE_PATH") {
            Some(path) if path.trim().is_empty() || path.trim() == "-" => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        };
        Self { directive, file }
    }
}

/// Install the subscriber: a compact stderr layer, plus a plain-text file
/// layer when one is configured. Keep the returned guard alive until exit
/// so buffered file lines get flushed.
pub fn init_logger(settings: &LogSettings) -> Option<WorkerGuard> {
    let (file_layer, guard) = match settings.file.as_deref().and_then(open_log_file) {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(&settings.directive))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .without_time()
                .with_target(false),
        )
        .with(file_layer)
        .init();

    debug!(
        "Logging at '{}', file sink {:?}",
        settings.directive, settings.file
    );
    guard
}

fn open_log_file(
    path: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path.file_name()?;
    if let Err(err) = fs::create_dir_all(dir) {
        eprintln!("Not logging to {}: {}", path.display(), err);
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, name);
    Some(tracing_appender::non_blocking(appender))
}
