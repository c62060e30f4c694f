//! Embedded scripting runtime for diagnose targets.
//!
//! Source files are compiled with [`compile`] into a [`Program`] and run by
//! an [`Interpreter`] inside an [`ExecutionContext`]. Process-wide state
//! (module registry, argument vector, builtins, output) lives in an explicit
//! [`Host`]. Execution events are reported to a [`TraceHook`].

pub mod ast;
pub mod builtins;
pub mod context;
pub mod error;
pub mod hook;
pub mod host;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use builtins::Builtin;
pub use context::{ExecutionContext, MAIN_MODULE};
pub use error::{CompileError, CompileErrorKind, ErrorKind, RuntimeError, SourcePos, TraceFrame};
pub use hook::{EventDetail, ExecEvent, ExecEventKind, HookControl, TraceHook};
pub use host::{Host, LoaderInfo, ModuleRecord, OutputSink};
pub use interp::Interpreter;
pub use parser::compile;
pub use ast::Program;
pub use value::{Env, RenderLimits, Scope, Value};
