//! Live streaming server: fans trace records out to WebSocket viewers and
//! forwards their control messages back to the tracer.

pub mod client;
pub mod config;
pub mod server;
pub mod wire;

pub use client::{Viewer, ViewerRegistry};
pub use config::ServerConfig;
pub use server::{HealthResponse, LiveServer, ServerError};
pub use wire::{ErrorReply, WireError};
