mod logging;

pub use logging::{JsonFileLayer, JsonFileSink, LogLine};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("cannot open log file {path}: {source}")]
    OpenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("logging already initialised: {0}")]
    AlreadyInitialized(String),
    #[error("unknown log level: {0}")]
    InvalidLevel(String),
}

/// Output format of the stderr layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "diag_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
    /// Mirror every log event as JSON lines into this file.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Text,
            log_file: None,
        }
    }
}

/// Guard that flushes the log file on drop.
pub struct TelemetryGuard {
    file_sink: Option<Arc<JsonFileSink>>,
}

impl TelemetryGuard {
    pub fn log_file(&self) -> Option<&Path> {
        self.file_sink.as_deref().map(JsonFileSink::path)
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(sink) = &self.file_sink {
            sink.flush();
        }
    }
}

/// Parse a level name such as `"debug"` or `"WARN"`.
pub fn parse_level(name: &str) -> Result<Level, TelemetryError> {
    Level::from_str(name.trim()).map_err(|_| TelemetryError::InvalidLevel(name.to_string()))
}

/// Filter directive string built from the configured levels.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)))
}

/// Initialize logging. Call once at startup; a second call fails.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let stderr_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter(&config))
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter(&config))
            .boxed(),
    };

    let file_sink = match &config.log_file {
        Some(path) => Some(Arc::new(JsonFileSink::open(path).map_err(|source| {
            TelemetryError::OpenLog {
                path: path.clone(),
                source,
            }
        })?)),
        None => None,
    };
    let file_layer = file_sink
        .as_ref()
        .map(|sink| JsonFileLayer::new(Arc::clone(sink)).with_filter(env_filter(&config)));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard { file_sink })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("diag_engine".into(), Level::DEBUG),
                ("diag_server".into(), Level::TRACE),
            ],
            ..TelemetryConfig::default()
        };
        assert_eq!(
            filter_directives(&config),
            "warn,diag_engine=debug,diag_server=trace"
        );
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(
            parse_level("loud"),
            Err(TelemetryError::InvalidLevel(_))
        ));
    }

    #[test]
    fn unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let config = TelemetryConfig {
            log_file: Some(blocker.join("nested.jsonl")),
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::OpenLog { .. })
        ));
    }

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        assert!(first.is_ok());
        assert!(matches!(second, Err(TelemetryError::AlreadyInitialized(_))));
    }
}
