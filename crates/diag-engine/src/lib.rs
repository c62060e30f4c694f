//! Execution side of hot-diagnose: resolves and runs a target program under
//! a tracer that feeds the session's dual message queue.

pub mod error;
pub mod resolve;
pub mod runner;
pub mod session;
pub mod tracer;
pub mod transforms;

pub use error::{EngineError, TransformError};
pub use resolve::resolve_source;
pub use runner::{RunOutcome, RunReport, RunSummary, Runner, TraceSetup};
pub use session::{join, ExecutionSession, SessionConfig};
pub use tracer::{FilterPredicate, StatsSnapshot, Tracer, TracerConfig, TracerState, TracerStats};
pub use transforms::{EventTransform, PayloadLimit, ScopeFilter, TraceEvent};
