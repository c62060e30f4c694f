//! Process-wide interpreter state shared by every run in the process.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};

use crate::builtins::{self, Builtin};

const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Highest call depth the execution thread's stack is sized for.
pub const MAX_CALL_DEPTH: usize = 1_000;

/// Identity of whatever loaded a module. Entry programs get a placeholder
/// carrying only the resolved full name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderInfo {
    pub fullname: String,
}

/// An entry in the host's module registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRecord {
    pub name: String,
    pub file: PathBuf,
    pub loader: LoaderInfo,
}

/// Where `print` output goes.
pub enum OutputSink {
    Stdout,
    Capture(String),
}

pub struct Host {
    modules: RwLock<HashMap<String, ModuleRecord>>,
    argv: RwLock<Vec<String>>,
    builtins: RwLock<HashMap<&'static str, Builtin>>,
    output: Mutex<OutputSink>,
    max_call_depth: usize,
}

impl Host {
    /// Host writing to stdout with an empty argument vector.
    pub fn new() -> Self {
        Self::with_sink(OutputSink::Stdout)
    }

    /// Host collecting `print` output in memory.
    pub fn capturing() -> Self {
        Self::with_sink(OutputSink::Capture(String::new()))
    }

    fn with_sink(sink: OutputSink) -> Self {
        let builtins = builtins::defaults()
            .into_iter()
            .map(|b| (b.name, b))
            .collect();
        Self {
            modules: RwLock::new(HashMap::new()),
            argv: RwLock::new(Vec::new()),
            builtins: RwLock::new(builtins),
            output: Mutex::new(sink),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// Clamped to `1..=MAX_CALL_DEPTH`.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.clamp(1, MAX_CALL_DEPTH);
        self
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    // ── Module registry ─────────────────────────────────────────────────

    /// Register `record` under its name, returning the entry it replaced.
    pub fn register_module(&self, record: ModuleRecord) -> Option<ModuleRecord> {
        self.modules.write().insert(record.name.clone(), record)
    }

    pub fn remove_module(&self, name: &str) -> Option<ModuleRecord> {
        self.modules.write().remove(name)
    }

    pub fn module(&self, name: &str) -> Option<ModuleRecord> {
        self.modules.read().get(name).cloned()
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ── Argument vector ─────────────────────────────────────────────────

    pub fn argv(&self) -> Vec<String> {
        self.argv.read().clone()
    }

    /// Install `argv`, returning the previous vector.
    pub fn replace_argv(&self, argv: Vec<String>) -> Vec<String> {
        std::mem::replace(&mut *self.argv.write(), argv)
    }

    // ── Builtins ────────────────────────────────────────────────────────

    pub fn builtin(&self, name: &str) -> Option<Builtin> {
        self.builtins.read().get(name).copied()
    }

    pub fn register_builtin(&self, builtin: Builtin) {
        self.builtins.write().insert(builtin.name, builtin);
    }

    // ── Output ──────────────────────────────────────────────────────────

    pub fn write_line(&self, line: &str) {
        match &mut *self.output.lock() {
            OutputSink::Stdout => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::warn!(error = %e, "failed to write script output");
                }
            }
            OutputSink::Capture(buf) => {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }

    /// Output collected so far by a capturing host; empty for stdout hosts.
    pub fn captured_output(&self) -> String {
        match &*self.output.lock() {
            OutputSink::Stdout => String::new(),
            OutputSink::Capture(buf) => buf.clone(),
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}
