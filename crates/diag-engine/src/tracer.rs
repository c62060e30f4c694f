//! Converts interpreter events into sequenced trace records.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use diag_core::{
    ControlMessage, EventKind, EventMask, FilterId, Location, QueueError, RunnerPort, TraceRecord,
};
use diag_script::{EventDetail, ExecEvent, ExecEventKind, HookControl, RenderLimits, TraceHook};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::transforms::{EventTransform, TraceEvent, SYNTHETIC_PREFIX};

#[derive(Clone, Debug)]
pub struct TracerConfig {
    /// Event kinds that become records.
    pub events: EventMask,
    /// Attach a snapshot of frame locals to `line` records.
    pub capture_locals: bool,
    /// Observed events between polls of the control lane. A `Stop` takes
    /// effect within this many events.
    pub control_poll_interval: u32,
    /// Bounds for rendering args, locals and return values.
    pub render: RenderLimits,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            events: EventMask::all(),
            capture_locals: false,
            control_poll_interval: 1,
            render: RenderLimits::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracerState {
    Idle,
    Running,
    Stopped,
}

/// Record predicate selectable at runtime through `SetFilter`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPredicate {
    All,
    /// Calls and returns.
    Calls,
    Lines,
    Exceptions,
}

impl FilterPredicate {
    pub fn admits(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Calls => matches!(kind, EventKind::Call | EventKind::Return),
            Self::Lines => kind == EventKind::Line,
            Self::Exceptions => kind == EventKind::Exception,
        }
    }
}

impl FromStr for FilterPredicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "calls" => Ok(Self::Calls),
            "lines" => Ok(Self::Lines),
            "exceptions" => Ok(Self::Exceptions),
            other => Err(format!("unknown filter: {other}")),
        }
    }
}

/// Counters shared with whoever wants to observe a running tracer.
#[derive(Debug, Default)]
pub struct TracerStats {
    observed: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
    vetoed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub observed: u64,
    pub emitted: u64,
    pub dropped: u64,
    pub vetoed: u64,
}

impl TracerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            observed: self.observed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            vetoed: self.vetoed.load(Ordering::Relaxed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Single-use tracer. Attach it to an interpreter with
/// `Interpreter::with_hook` after [`start`](Tracer::start).
pub struct Tracer {
    state: TracerState,
    port: RunnerPort,
    transforms: Vec<Box<dyn EventTransform>>,
    config: TracerConfig,
    stats: Arc<TracerStats>,
    next_seq: u64,
    since_poll: u32,
    paused: bool,
    filter: FilterPredicate,
}

impl Tracer {
    pub fn new(
        port: RunnerPort,
        transforms: Vec<Box<dyn EventTransform>>,
        config: TracerConfig,
    ) -> Self {
        Self {
            state: TracerState::Idle,
            port,
            transforms,
            config,
            stats: Arc::new(TracerStats::default()),
            next_seq: 0,
            since_poll: 0,
            paused: false,
            filter: FilterPredicate::All,
        }
    }

    pub fn state(&self) -> TracerState {
        self.state
    }

    pub fn stats(&self) -> Arc<TracerStats> {
        Arc::clone(&self.stats)
    }

    pub fn start(&mut self) {
        match self.state {
            TracerState::Idle => {
                self.state = TracerState::Running;
                let transforms: Vec<&str> = self.transforms.iter().map(|t| t.name()).collect();
                info!(events = ?self.config.events.kinds(), ?transforms, "tracer started");
            }
            other => warn!(state = ?other, "tracer start ignored"),
        }
    }

    /// Stop tracing and close the queue. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.state == TracerState::Stopped {
            return;
        }
        self.state = TracerState::Stopped;
        self.port.close();
        let stats = self.stats.snapshot();
        info!(
            observed = stats.observed,
            emitted = stats.emitted,
            dropped = stats.dropped,
            vetoed = stats.vetoed,
            "tracer stopped"
        );
    }

    fn poll_control(&mut self) {
        while let Some(message) = self.port.poll_inbound() {
            debug!(command = message.name(), "control message received");
            match message {
                ControlMessage::Stop => {
                    self.stop();
                    return;
                }
                ControlMessage::Pause => self.paused = true,
                ControlMessage::Resume => self.paused = false,
                ControlMessage::SetFilter(id) => self.set_filter(&id),
            }
        }
    }

    fn set_filter(&mut self, id: &FilterId) {
        match id.as_str().parse::<FilterPredicate>() {
            Ok(filter) => {
                info!(filter = %id, "record filter changed");
                self.filter = filter;
            }
            Err(e) => warn!(error = %e, "ignoring filter request"),
        }
    }

    fn capture(&self, event: &ExecEvent<'_>, kind: EventKind) -> TraceEvent {
        let function = event.function.to_owned();
        let limits = &self.config.render;
        let payload = match event.detail {
            EventDetail::Call { args } => json!({
                "function": function,
                "args": bindings_json(args.iter().map(|(n, v)| (n.as_str(), v)), limits),
            }),
            EventDetail::Line => {
                let mut payload = json!({ "function": function });
                if self.config.capture_locals {
                    let locals = event.locals();
                    payload["locals"] =
                        bindings_json(locals.iter().map(|(n, v)| (n.as_str(), v)), limits);
                }
                payload
            }
            EventDetail::Return { value } => json!({
                "function": function,
                "value": value.to_json_within(limits, 0),
            }),
            EventDetail::Exception { error } => json!({
                "function": function,
                "error": { "kind": error.kind.as_str(), "message": error.message },
            }),
        };
        TraceEvent {
            kind,
            location: Location::new(normalize_file(event.file), event.line),
            function,
            payload,
        }
    }

    /// Run the transform chain. `None` means some transform vetoed.
    fn transform(&self, mut event: TraceEvent) -> Option<TraceEvent> {
        for transform in &self.transforms {
            let outcome = catch_unwind(AssertUnwindSafe(|| transform.apply(event)));
            event = match outcome {
                Ok(Ok(Some(next))) => next,
                Ok(Ok(None)) => return None,
                Ok(Err(e)) => {
                    error!(transform = transform.name(), error = %e, "transform failed, dropping event");
                    return None;
                }
                Err(_) => {
                    error!(transform = transform.name(), "transform panicked, dropping event");
                    return None;
                }
            };
        }
        Some(event)
    }

    fn emit(&mut self, event: TraceEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let record = TraceRecord {
            seq,
            kind: event.kind,
            location: event.location,
            payload: event.payload,
        };
        match self.port.push_outbound(record) {
            Ok(()) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(QueueError::Timeout(budget)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(seq, ?budget, dropped, "outbound lane full, record dropped");
            }
            Err(QueueError::Closed) => {
                warn!(seq, "outbound lane closed while tracing");
                self.stop();
            }
        }
    }
}

impl TraceHook for Tracer {
    fn on_event(&mut self, event: &ExecEvent<'_>) -> HookControl {
        if self.state != TracerState::Running {
            return HookControl::Detach;
        }
        self.stats.observed.fetch_add(1, Ordering::Relaxed);

        self.since_poll += 1;
        if self.since_poll >= self.config.control_poll_interval.max(1) {
            self.since_poll = 0;
            self.poll_control();
            if self.state != TracerState::Running {
                return HookControl::Detach;
            }
        }
        if self.paused {
            return HookControl::Continue;
        }

        let kind = event_kind(event.kind());
        if !self.config.events.contains(kind) || !self.filter.admits(kind) {
            return HookControl::Continue;
        }

        let captured = self.capture(event, kind);
        match self.transform(captured) {
            Some(event) => self.emit(event),
            None => {
                self.stats.vetoed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if self.state == TracerState::Running {
            HookControl::Continue
        } else {
            HookControl::Detach
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_kind(kind: ExecEventKind) -> EventKind {
    match kind {
        ExecEventKind::Call => EventKind::Call,
        ExecEventKind::Line => EventKind::Line,
        ExecEventKind::Return => EventKind::Return,
        ExecEventKind::Exception => EventKind::Exception,
    }
}

/// Binding values sit one level below the payload field holding them.
fn bindings_json<'v>(
    bindings: impl Iterator<Item = (&'v str, &'v diag_script::Value)>,
    limits: &RenderLimits,
) -> Value {
    Value::Object(
        bindings
            .map(|(name, value)| (name.to_owned(), value.to_json_within(limits, 1)))
            .collect::<Map<_, _>>(),
    )
}

/// Synthetic names like `<string>` are marked; real paths are made absolute.
pub fn normalize_file(file: &str) -> String {
    if file.len() >= 2 && file.starts_with('<') && file.ends_with('>') {
        return format!("{SYNTHETIC_PREFIX}{file}");
    }
    let path = Path::new(file);
    if path.is_absolute() {
        return file.to_owned();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path).to_string_lossy().into_owned())
        .unwrap_or_else(|_| file.to_owned())
}
