//! Execution-event hook interface.
//!
//! The interpreter reports events synchronously, in control-flow order, on
//! the thread running the script. A hook sees borrowed views and must copy
//! whatever it wants to keep.

use crate::error::RuntimeError;
use crate::value::{Env, Scope, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecEventKind {
    Call,
    Line,
    Return,
    Exception,
}

#[derive(Clone, Copy)]
pub enum EventDetail<'a> {
    /// Function entry with its bound arguments.
    Call { args: &'a [(String, Value)] },
    /// A statement is about to run.
    Line,
    Return { value: &'a Value },
    /// An error is unwinding through this frame.
    Exception { error: &'a RuntimeError },
}

#[derive(Clone, Copy)]
pub struct ExecEvent<'a> {
    pub file: &'a str,
    pub line: u32,
    /// Function name, `<module>` at top level.
    pub function: &'a str,
    pub detail: EventDetail<'a>,
    pub(crate) scope: &'a Env,
}

impl ExecEvent<'_> {
    pub fn kind(&self) -> ExecEventKind {
        match self.detail {
            EventDetail::Call { .. } => ExecEventKind::Call,
            EventDetail::Line => ExecEventKind::Line,
            EventDetail::Return { .. } => ExecEventKind::Return,
            EventDetail::Exception { .. } => ExecEventKind::Exception,
        }
    }

    /// Variables bound in the active frame, sorted by name.
    pub fn locals(&self) -> Vec<(String, Value)> {
        Scope::snapshot(self.scope)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookControl {
    Continue,
    /// Stop delivering events for the rest of the run.
    Detach,
}

pub trait TraceHook {
    fn on_event(&mut self, event: &ExecEvent<'_>) -> HookControl;
}

impl<F> TraceHook for F
where
    F: FnMut(&ExecEvent<'_>) -> HookControl,
{
    fn on_event(&mut self, event: &ExecEvent<'_>) -> HookControl {
        self(event)
    }
}
