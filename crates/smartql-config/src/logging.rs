// Tracing subscriber setup driven by the `[logging]` table.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub target: bool,
}

fn default_level() -> String {
    "warn".into()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
            target: true,
        }
    }
}

/// Filter from `RUST_LOG`, falling back to the configured directives.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Install the global subscriber.
///
/// File logging goes through a non-blocking writer; keep the returned
/// guard alive for as long as logs should be flushed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let (writer, guard) = match &settings.file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| OsStr::new("smartql.log"));
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = if settings.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(settings.target)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(settings.file.is_none())
            .with_target(settings.target)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_table_defaults() {
        let settings: LoggingSettings = toml::from_str("json = true").unwrap();
        assert_eq!(settings.level, "warn");
        assert!(settings.json);
        assert!(settings.target);
        assert!(settings.file.is_none());
    }

    #[test]
    fn test_second_init_reports_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LoggingSettings {
            level: "smartql_core=debug".into(),
            file: Some(dir.path().join("logs").join("smartql.log")),
            ..LoggingSettings::default()
        };

        let _guard = init_tracing(&settings);
        let second = init_tracing(&settings);

        assert!(matches!(second, Err(ConfigError::Logging(_))));
        assert!(dir.path().join("logs").exists());
    }
}
