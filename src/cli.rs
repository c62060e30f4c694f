use std::path::PathBuf;

use clap::Parser;
use diag_settings::{DiagSettings, LogFormatSetting};

/// Run a program under live tracing and stream its execution to browsers.
#[derive(Parser, Debug)]
#[command(name = "hot-diagnose", version, about)]
pub struct Cli {
    /// Target program, absolute or relative to the working directory and
    /// search path.
    #[arg(short, long)]
    pub source: String,

    /// Arguments handed to the target program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Host the live server binds.
    #[arg(long)]
    pub host: Option<String>,

    /// Port the live server binds (0 picks a free port).
    #[arg(long)]
    pub port: Option<u16>,

    /// Mirror logs as JSON lines into this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Glob of files to trace (repeatable). Matched against full paths.
    #[arg(long)]
    pub scope: Vec<String>,

    /// Directory the static report snapshots. Defaults to the working
    /// directory.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Directory glob left out of the report (repeatable).
    #[arg(long)]
    pub exclude_dir: Vec<String>,

    /// File glob left out of the report (repeatable).
    #[arg(long)]
    pub exclude_file: Vec<String>,

    /// Skip writing the static report.
    #[arg(long)]
    pub no_report: bool,

    /// Event kinds to record, e.g. `call,line` or `all`.
    #[arg(long)]
    pub events: Option<String>,

    /// Attach frame locals to line records.
    #[arg(long)]
    pub capture_locals: bool,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Hold the run until this many viewers are connected.
    #[arg(long = "wait-viewers")]
    pub wait_viewers: Option<usize>,

    #[arg(long)]
    pub wait_timeout_secs: Option<u64>,

    /// Stop serving once the trace is complete.
    #[arg(long)]
    pub exit_on_complete: bool,

    /// Settings file to load instead of `~/.hot-diagnose/settings.json`.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// Log to stderr as JSON.
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    pub fn apply(&self, settings: &mut DiagSettings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(output) = &self.output {
            settings.logging.file = Some(output.display().to_string());
        }
        if !self.scope.is_empty() {
            settings.tracer.scope = self.scope.clone();
        }
        settings.report.exclude_dirs.extend(self.exclude_dir.iter().cloned());
        settings.report.exclude_files.extend(self.exclude_file.iter().cloned());
        if self.no_report {
            settings.report.enabled = false;
        }
        if let Some(events) = &self.events {
            settings.tracer.events = events.clone();
        }
        if self.capture_locals {
            settings.tracer.capture_locals = true;
        }
        if let Some(capacity) = self.queue_capacity {
            settings.queue.capacity = capacity;
        }
        if let Some(count) = self.wait_viewers {
            settings.runner.wait_for_viewers = count;
        }
        if let Some(secs) = self.wait_timeout_secs {
            settings.runner.wait_timeout_secs = secs;
        }
        if self.exit_on_complete {
            settings.runner.exit_on_complete = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.json_logs {
            settings.logging.format = LogFormatSetting::Json;
        }
    }
}
