//! Shared value types for hot-diagnose and the dual message queue that
//! bridges the execution side and the serving side.

pub mod control;
pub mod errors;
pub mod ids;
pub mod queue;
pub mod record;

pub use control::{ControlMessage, FilterId};
pub use errors::QueueError;
pub use ids::{SessionId, ViewerId};
pub use queue::{dual_queue, QueueConfig, RunnerPort, Subscription, ViewerPort};
pub use record::{EventKind, EventMask, Location, TraceRecord};
