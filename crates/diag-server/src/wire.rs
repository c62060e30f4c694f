//! Viewer wire format.
//!
//! Server to viewer: one JSON text frame per `TraceRecord`.
//! Viewer to server: `{"command": ..., "args": ...}`.
//! Rejected viewer messages are answered with `{"error": {code, message}}`.

use diag_core::{ControlMessage, FilterId, QueueError, TraceRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
pub const INVALID_ARGS: &str = "INVALID_ARGS";
pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
pub const QUEUE_BUSY: &str = "QUEUE_BUSY";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid args for {command}: {message}")]
    InvalidArgs {
        command: &'static str,
        message: String,
    },
}

impl WireError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::UnknownCommand(_) => UNKNOWN_COMMAND,
            Self::InvalidArgs { .. } => INVALID_ARGS,
        }
    }
}

/// Raw viewer message before validation.
#[derive(Debug, Deserialize)]
pub struct ViewerCommand {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

impl ViewerCommand {
    pub fn into_control(self) -> Result<ControlMessage, WireError> {
        match self.command.as_str() {
            "stop" => Ok(ControlMessage::Stop),
            "pause" => Ok(ControlMessage::Pause),
            "resume" => Ok(ControlMessage::Resume),
            "setFilter" => filter_arg(&self.args).map(ControlMessage::SetFilter),
            _ => Err(WireError::UnknownCommand(self.command)),
        }
    }
}

/// `setFilter` takes either `"calls"` or `{"predicate": "calls"}`.
fn filter_arg(args: &Value) -> Result<FilterId, WireError> {
    let id = match args {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("predicate").and_then(Value::as_str),
        _ => None,
    };
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(FilterId::new(id)),
        _ => Err(WireError::InvalidArgs {
            command: "setFilter",
            message: "expected a predicate id".into(),
        }),
    }
}

pub fn parse_command(text: &str) -> Result<ControlMessage, WireError> {
    serde_json::from_str::<ViewerCommand>(text)?.into_control()
}

pub fn encode_record(record: &TraceRecord) -> Result<String, WireError> {
    Ok(serde_json::to_string(record)?)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub error: ErrorBody,
}

impl ErrorReply {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn from_queue(err: &QueueError) -> Self {
        let code = match err {
            QueueError::Closed => SESSION_CLOSED,
            QueueError::Timeout(_) => QUEUE_BUSY,
        };
        Self::new(code, err.to_string())
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":{{"code":"{}","message":""}}}}"#, self.error.code)
        })
    }
}

impl From<&WireError> for ErrorReply {
    fn from(err: &WireError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
