//! Tracing configuration and log routing.
//!
//! Every process logs to stdout through a compact formatter. A second, non-blocking file layer
//! is added when a log destination is available: `FINRAG_LOG_FILE` appends to an explicit path,
//! otherwise production deployments roll daily files under `logs/` and local runs write a
//! single `logs/finrag.log`.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::Environment;

const LOG_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "finrag.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file layer should write.
#[derive(Debug, PartialEq, Eq)]
enum FileTarget {
    /// Append to a caller-provided file.
    Explicit(String),
    /// One file per day under [`LOG_DIR`].
    DailyRolling,
    /// A single growing file under [`LOG_DIR`].
    Single,
}

impl FileTarget {
    fn resolve(environment: Environment, explicit: Option<String>) -> Self {
        match explicit {
            Some(path) => Self::Explicit(path),
            None if environment.is_production() => Self::DailyRolling,
            None => Self::Single,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` controls filtering and defaults to `info`. ANSI colouring is disabled in
/// production so aggregated logs stay clean.
pub fn init_tracing(environment: Environment) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer()
        .with_target(environment.is_production())
        .with_ansi(!environment.is_production())
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = FileTarget::resolve(
        environment,
        std::env::var("FINRAG_LOG_FILE")
            .ok()
            .filter(|path| !path.trim().is_empty()),
    );

    match open_file_writer(&target) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Returns `None` when the destination cannot be opened; stdout logging keeps working.
fn open_file_writer(target: &FileTarget) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        FileTarget::Explicit(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {path}: {err}"))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        FileTarget::DailyRolling | FileTarget::Single => {
            if let Err(err) = std::fs::create_dir_all(Path::new(LOG_DIR)) {
                eprintln!("Failed to create {LOG_DIR} directory: {err}");
                return None;
            }
            let appender = if *target == FileTarget::DailyRolling {
                tracing_appender::rolling::daily(LOG_DIR, LOG_FILE_NAME)
            } else {
                tracing_appender::rolling::never(LOG_DIR, LOG_FILE_NAME)
            };
            tracing_appender::non_blocking(appender)
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_environment_default() {
        assert_eq!(
            FileTarget::resolve(Environment::Production, Some("/tmp/x.log".into())),
            FileTarget::Explicit("/tmp/x.log".into())
        );
        assert_eq!(
            FileTarget::resolve(Environment::Production, None),
            FileTarget::DailyRolling
        );
        assert_eq!(FileTarget::resolve(Environment::Local, None), FileTarget::Single);
    }
}
