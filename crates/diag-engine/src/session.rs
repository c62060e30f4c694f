use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use diag_core::{dual_queue, QueueConfig, RunnerPort, SessionId, ViewerPort};
use diag_script::Host;
use tracing::{info, info_span, warn};

use crate::error::EngineError;
use crate::runner::{RunReport, Runner, TraceSetup};
use crate::tracer::TracerConfig;
use crate::transforms::EventTransform;

/// Stack size of the execution thread; deep script recursion is
/// interpreted recursively.
const EXECUTION_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    pub queue: QueueConfig,
    pub tracer: TracerConfig,
    pub cwd: Option<PathBuf>,
    pub search_path: Vec<PathBuf>,
    /// Block before running until this many viewers subscribed, or the
    /// timeout passed.
    pub wait_for_viewers: Option<(usize, Duration)>,
}

/// One runner invocation bound to one tracer and one queue pair.
pub struct ExecutionSession {
    id: SessionId,
    runner: Runner,
    port: RunnerPort,
    viewers: ViewerPort,
    transforms: Vec<Box<dyn EventTransform>>,
    tracer: TracerConfig,
    wait_for_viewers: Option<(usize, Duration)>,
}

impl ExecutionSession {
    /// Create a session and the viewer endpoint of its queue.
    pub fn new(
        host: Arc<Host>,
        config: SessionConfig,
        transforms: Vec<Box<dyn EventTransform>>,
    ) -> (Self, ViewerPort) {
        let (port, viewers) = dual_queue(&config.queue);
        let mut runner = Runner::new(host).with_search_path(config.search_path);
        if let Some(cwd) = config.cwd {
            runner = runner.with_cwd(cwd);
        }
        let session = Self {
            id: SessionId::new(),
            runner,
            port,
            viewers: viewers.clone(),
            transforms,
            tracer: config.tracer,
            wait_for_viewers: config.wait_for_viewers,
        };
        (session, viewers)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Resolve `spec` and run it to completion on the calling thread.
    ///
    /// The queue is closed when this returns, whatever the outcome.
    pub fn run(self, spec: &str, args: &[String]) -> Result<RunReport, EngineError> {
        let span = info_span!("session", session_id = %self.id);
        let _entered = span.enter();

        let path = self.runner.resolve(spec)?;

        if let Some((count, timeout)) = self.wait_for_viewers {
            info!(count, timeout_secs = timeout.as_secs_f64(), "waiting for viewers");
            if !self.viewers.wait_for_subscribers(count, timeout) {
                warn!(
                    connected = self.viewers.subscriber_count(),
                    wanted = count,
                    "viewer wait timed out, running anyway"
                );
            }
        }

        let setup = TraceSetup {
            port: self.port,
            transforms: self.transforms,
            config: self.tracer,
        };
        let report = self.runner.run(&path, args, setup)?;
        info!(
            outcome = report.outcome.label(),
            emitted = report.stats.emitted,
            dropped = report.stats.dropped,
            duration_ms = report.duration.as_millis() as u64,
            "session finished"
        );
        Ok(report)
    }

    /// Run on a dedicated execution thread.
    pub fn spawn(
        self,
        spec: String,
        args: Vec<String>,
    ) -> Result<JoinHandle<Result<RunReport, EngineError>>, EngineError> {
        std::thread::Builder::new()
            .name(format!("exec-{}", self.id))
            .stack_size(EXECUTION_STACK_SIZE)
            .spawn(move || self.run(&spec, &args))
            .map_err(EngineError::Spawn)
    }
}

/// Join an execution thread spawned by [`ExecutionSession::spawn`].
pub fn join(handle: JoinHandle<Result<RunReport, EngineError>>) -> Result<RunReport, EngineError> {
    handle.join().map_err(|_| EngineError::ThreadPanicked)?
}
