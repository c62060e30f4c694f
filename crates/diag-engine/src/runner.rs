//! Target program runner: compiles the target, installs it as the entry
//! program, runs it under a tracer and restores process-wide state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use diag_core::RunnerPort;
use diag_script::{
    compile, CompileError, ExecutionContext, Host, Interpreter, ModuleRecord, RuntimeError,
    MAIN_MODULE,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::resolve::resolve_source;
use crate::tracer::{StatsSnapshot, Tracer, TracerConfig};
use crate::transforms::EventTransform;

/// What the tracer of a run is built from.
pub struct TraceSetup {
    pub port: RunnerPort,
    pub transforms: Vec<Box<dyn EventTransform>>,
    pub config: TracerConfig,
}

/// How the target program itself fared. None of these are host errors.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    CompileFailed(CompileError),
    RuntimeFailed(RuntimeError),
    /// The interpreter itself panicked while running the target.
    Panicked(String),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompileFailed(_) => "compile_failed",
            Self::RuntimeFailed(_) => "runtime_failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub path: PathBuf,
    pub outcome: RunOutcome,
    pub stats: StatsSnapshot,
    pub duration: Duration,
}

/// Serializable summary of a [`RunReport`] for logs and health output.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub path: String,
    pub outcome: &'static str,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub duration_ms: u128,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            path: self.path.display().to_string(),
            outcome: self.outcome.label(),
            stats: self.stats,
            duration_ms: self.duration.as_millis(),
        }
    }
}

/// Registers the entry program under `__main__` and puts back whatever was
/// there before when dropped.
struct MainModuleGuard<'h> {
    host: &'h Host,
    previous: Option<ModuleRecord>,
}

impl<'h> MainModuleGuard<'h> {
    fn install(host: &'h Host, record: ModuleRecord) -> Self {
        let previous = host.register_module(record);
        Self { host, previous }
    }
}

impl Drop for MainModuleGuard<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.host.register_module(previous);
            }
            None => {
                self.host.remove_module(MAIN_MODULE);
            }
        }
        debug!("entry module registration restored");
    }
}

/// Swaps in the emulated argument vector and restores the saved one when
/// dropped.
struct ArgvGuard<'h> {
    host: &'h Host,
    saved: Vec<String>,
}

impl<'h> ArgvGuard<'h> {
    fn install(host: &'h Host, argv: Vec<String>) -> Self {
        let saved = host.replace_argv(argv);
        Self { host, saved }
    }
}

impl Drop for ArgvGuard<'_> {
    fn drop(&mut self) {
        self.host.replace_argv(std::mem::take(&mut self.saved));
        debug!("argument vector restored");
    }
}

pub struct Runner {
    host: Arc<Host>,
    cwd: Option<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl Runner {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            cwd: None,
            search_path: Vec::new(),
        }
    }

    /// Directory relative specs are tried in first (defaults to the
    /// process working directory).
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_search_path(mut self, search_path: Vec<PathBuf>) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn resolve(&self, spec: &str) -> Result<PathBuf, EngineError> {
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        resolve_source(spec, &cwd, &self.search_path)
    }

    /// Compile and run the program at `path` with `args` under a tracer.
    ///
    /// Only host-side failures are errors; compile and runtime failures of
    /// the target are logged and reported in the returned outcome.
    pub fn run(
        &self,
        path: &Path,
        args: &[String],
        setup: TraceSetup,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let source = read_source(path)?;
        let file = path.to_string_lossy();

        let program = match compile(&source, &file) {
            Ok(program) => program,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to compile target");
                drop(setup);
                return Ok(RunReport {
                    path: path.to_path_buf(),
                    outcome: RunOutcome::CompileFailed(err),
                    stats: StatsSnapshot::default(),
                    duration: started.elapsed(),
                });
            }
        };

        let ctx = ExecutionContext::new(path);
        let _main = MainModuleGuard::install(&self.host, ctx.module_record());
        let argv = std::iter::once(file.clone().into_owned())
            .chain(args.iter().cloned())
            .collect();
        let _argv = ArgvGuard::install(&self.host, argv);

        let mut tracer = Tracer::new(setup.port, setup.transforms, setup.config);
        let stats = tracer.stats();
        tracer.start();
        info!(path = %path.display(), args = args.len(), "running target");

        let result = catch_unwind(AssertUnwindSafe(|| {
            Interpreter::new(&self.host)
                .with_hook(&mut tracer)
                .run(&program, &ctx)
        }));
        tracer.stop();

        let outcome = match result {
            Ok(Ok(())) => {
                info!(path = %path.display(), "target completed");
                RunOutcome::Completed
            }
            Ok(Err(err)) => {
                error!(
                    path = %path.display(),
                    kind = err.kind.as_str(),
                    location = ?err.location.as_ref().map(ToString::to_string),
                    error = %err,
                    traceback = %err.render(),
                    "target raised"
                );
                RunOutcome::RuntimeFailed(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(path = %path.display(), panic = %message, "interpreter panicked");
                RunOutcome::Panicked(message)
            }
        };

        Ok(RunReport {
            path: path.to_path_buf(),
            outcome,
            stats: stats.snapshot(),
            duration: started.elapsed(),
        })
    }
}

/// Read the target's source, tolerating invalid UTF-8 and CRLF line endings.
fn read_source(path: &Path) -> Result<String, EngineError> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::ReadSource {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).replace("\r\n", "\n"))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
