use std::path::PathBuf;

/// Host-side failures of a run. Failures of the target itself are reported
/// through [`RunOutcome`](crate::runner::RunOutcome), never as errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source not found: {spec} (searched {} location(s))", searched.len())]
    SourceNotFound { spec: String, searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("execution thread panicked")]
    ThreadPanicked,
}

impl EngineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::ReadSource { .. } => "read_source",
            Self::Spawn(_) => "spawn",
            Self::ThreadPanicked => "thread_panicked",
        }
    }
}

/// A transform could not be built or failed on one event.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid scope pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("{0}")]
    Failed(String),
}
