//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section is `#[serde(default)]`,
//! so a partial file only needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings type, loaded from `~/.hot-diagnose/settings.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagSettings {
    pub server: ServerSettings,
    pub queue: QueueSettings,
    pub tracer: TracerSettings,
    pub runner: RunnerSettings,
    pub logging: LoggingSettings,
    pub report: ReportSettings,
}

/// Live streaming server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

/// Dual message queue between the runner and the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    pub capacity: usize,
    pub enqueue_timeout_ms: u64,
    /// Records kept for viewers that connect late. `0` disables replay.
    pub replay_history: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            enqueue_timeout_ms: 5,
            replay_history: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TracerSettings {
    /// Comma-separated event kinds (`call,line,return,exception`) or `all`.
    pub events: String,
    pub capture_locals: bool,
    /// Control messages are polled every this many observed events.
    pub control_poll_interval: u32,
    /// Glob patterns of files in scope. Empty means every real file.
    pub scope: Vec<String>,
    pub payload: PayloadSettings,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            events: "all".to_string(),
            capture_locals: false,
            control_poll_interval: 1,
            scope: Vec::new(),
            payload: PayloadSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PayloadSettings {
    pub max_string: usize,
    pub max_items: usize,
    pub max_depth: usize,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            max_string: 256,
            max_items: 32,
            max_depth: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerSettings {
    /// Directories searched after the working directory when resolving a source.
    pub search_path: Vec<String>,
    pub max_call_depth: usize,
    /// Hold the run until this many viewers connected (`0` = start at once).
    pub wait_for_viewers: usize,
    pub wait_timeout_secs: u64,
    /// Stop the server once the trace is complete.
    pub exit_on_complete: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            max_call_depth: 200,
            wait_for_viewers: 0,
            wait_timeout_secs: 30,
            exit_on_complete: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormatSetting,
    /// JSON-lines copy of the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Per-module levels, e.g. `{"diag_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormatSetting::Text,
            file: None,
            modules: BTreeMap::new(),
        }
    }
}

/// Static HTML report of the scanned project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    pub enabled: bool,
    /// Output directory. Defaults to `~/.hot-diagnose`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Templates overriding the bundled ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<String>,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            templates_dir: None,
            exclude_dirs: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
            exclude_files: vec!["*.lock".to_string(), ".DS_Store".to_string()],
        }
    }
}
