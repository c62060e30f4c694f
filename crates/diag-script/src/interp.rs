//! Tree-walking interpreter.

use std::rc::Rc;

use crate::ast::*;
use crate::context::ExecutionContext;
use crate::error::{ErrorKind, RuntimeError, SourcePos, TraceFrame};
use crate::hook::{EventDetail, ExecEvent, HookControl, TraceHook};
use crate::host::Host;
use crate::value::{Env, Function, Scope, Value};

const MODULE_FRAME: &str = "<module>";
const MAX_STR_BYTES: usize = 1 << 24;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    function: Rc<str>,
    file: Rc<str>,
    env: Env,
    line: u32,
}

/// Deepest chain of nested evaluations across all active calls. Each level
/// is a native frame on the execution thread.
pub const MAX_EVAL_LEVELS: usize = 4_096;

/// Runs compiled units against a [`Host`], reporting execution events to an
/// optional [`TraceHook`].
pub struct Interpreter<'a> {
    host: &'a Host,
    hook: Option<&'a mut dyn TraceHook>,
    depth: usize,
    levels: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self {
            host,
            hook: None,
            depth: 0,
            levels: 0,
        }
    }

    pub fn with_hook(mut self, hook: &'a mut dyn TraceHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Whether a hook is still attached (it may detach itself mid-run).
    pub fn hooked(&self) -> bool {
        self.hook.is_some()
    }

    /// Execute `program`'s top-level statements in `ctx`'s namespace.
    pub fn run(&mut self, program: &Program, ctx: &ExecutionContext) -> Result<(), RuntimeError> {
        let mut frame = Frame {
            function: Rc::from(MODULE_FRAME),
            file: Rc::clone(&program.file),
            env: Rc::clone(ctx.namespace()),
            line: program.body.first().map_or(1, |s| s.line),
        };
        self.emit(&frame, EventDetail::Call { args: &[] });
        match self.exec_block(&program.body, &mut frame) {
            Ok(_) => {
                self.emit(&frame, EventDetail::Return { value: &Value::Nil });
                Ok(())
            }
            Err(err) => Err(self.unwind(err, &frame)),
        }
    }

    fn emit(&mut self, frame: &Frame, detail: EventDetail<'_>) {
        let Some(hook) = self.hook.as_deref_mut() else {
            return;
        };
        let event = ExecEvent {
            file: &frame.file,
            line: frame.line,
            function: &frame.function,
            detail,
            scope: &frame.env,
        };
        if hook.on_event(&event) == HookControl::Detach {
            self.hook = None;
        }
    }

    /// Record `frame` in the traceback and report the error passing through.
    fn unwind(&mut self, mut err: RuntimeError, frame: &Frame) -> RuntimeError {
        err.traceback.push(TraceFrame {
            function: frame.function.to_string(),
            pos: SourcePos {
                file: frame.file.to_string(),
                line: frame.line,
            },
        });
        self.emit(frame, EventDetail::Exception { error: &err });
        err
    }

    fn call_function(&mut self, func: &Function, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let decl = &func.decl;
        if args.len() != decl.params.len() {
            return Err(RuntimeError::arity(
                &decl.name,
                &decl.params.len().to_string(),
                args.len(),
            ));
        }
        if self.depth >= self.host.max_call_depth() {
            return Err(RuntimeError::new(
                ErrorKind::Recursion,
                format!("maximum call depth ({}) exceeded", self.host.max_call_depth()),
            ));
        }

        let env = Scope::child(&func.closure);
        let bound: Vec<(String, Value)> = decl.params.iter().cloned().zip(args).collect();
        for (name, value) in &bound {
            Scope::define(&env, name.clone(), value.clone());
        }
        let mut frame = Frame {
            function: Rc::from(decl.name.as_str()),
            file: Rc::clone(&func.file),
            env,
            line: decl.line,
        };
        self.emit(&frame, EventDetail::Call { args: &bound });

        self.depth += 1;
        let result = self.exec_block(&decl.body, &mut frame);
        self.depth -= 1;

        match result {
            Ok(flow) => {
                let value = match flow {
                    Flow::Return(value) => value,
                    _ => Value::Nil,
                };
                self.emit(&frame, EventDetail::Return { value: &value });
                Ok(value)
            }
            Err(err) => Err(self.unwind(err, &frame)),
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt], frame: &mut Frame) -> Result<Flow, RuntimeError> {
        for stmt in body {
            frame.line = stmt.line;
            self.emit(frame, EventDetail::Line);
            let flow = self
                .exec_stmt(stmt, frame)
                .map_err(|e| e.at(&frame.file, stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                let value = self.eval(value, frame)?;
                Scope::define(&frame.env, name.as_str(), value);
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, frame)?;
                self.assign(target, value, frame)?;
            }
            StmtKind::FnDef(decl) => {
                let func = Function {
                    decl: Rc::clone(decl),
                    file: Rc::clone(&frame.file),
                    closure: Rc::clone(&frame.env),
                };
                Scope::define(&frame.env, decl.name.as_str(), Value::Function(Rc::new(func)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond, frame)?.is_truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body, frame);
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, frame)?.is_truthy() {
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { var, iter, body } => {
                let items = match self.eval(iter, frame)? {
                    Value::List(items) => {
                        let snapshot = items.borrow().clone();
                        snapshot
                    }
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    Scope::define(&frame.env, var.as_str(), item);
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Raise(expr) => {
                let value = self.eval(expr, frame)?;
                return Err(RuntimeError::new(ErrorKind::Raised, value.to_string()));
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &AssignTarget, value: Value, frame: &mut Frame) -> Result<(), RuntimeError> {
        match target {
            AssignTarget::Name(name) => {
                if Scope::assign(&frame.env, name, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::new(
                        ErrorKind::Name,
                        format!("cannot assign to undefined name '{name}'"),
                    ))
                }
            }
            AssignTarget::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                let Value::List(items) = &target else {
                    return Err(RuntimeError::type_error(format!(
                        "'{}' object does not support item assignment",
                        target.type_name()
                    )));
                };
                let mut items = items.borrow_mut();
                let slot = list_slot(&index, items.len())?;
                items[slot] = value;
                Ok(())
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        if self.levels >= MAX_EVAL_LEVELS {
            return Err(RuntimeError::new(
                ErrorKind::Recursion,
                "expression evaluation nested too deeply",
            ));
        }
        self.levels += 1;
        let value = self.eval_expr(expr, frame);
        self.levels -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        Ok(match expr {
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(x) => Value::Float(*x),
            Expr::Str(s) => Value::str(s.as_str()),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Nil => Value::Nil,
            Expr::Name(name) => self.lookup(name, &frame.env)?,
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, frame)?);
                }
                Value::list(values)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                index_value(&target, &index)?
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee, frame)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, frame)?);
                }
                match callee {
                    Value::Function(func) => self.call_function(&func, values)?,
                    Value::Builtin(builtin) => (builtin.func)(self.host, values)?,
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "'{}' object is not callable",
                            other.type_name()
                        )))
                    }
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Value::Bool(!value.is_truthy()),
                    (UnaryOp::Neg, Value::Int(n)) => Value::Int(n.checked_neg().ok_or_else(overflow)?),
                    (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
                    (UnaryOp::Neg, other) => {
                        return Err(RuntimeError::type_error(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        )))
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                binary(*op, lhs, rhs)?
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                match (op, lhs.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => lhs,
                    _ => self.eval(rhs, frame)?,
                }
            }
        })
    }

    fn lookup(&self, name: &str, env: &Env) -> Result<Value, RuntimeError> {
        if let Some(value) = Scope::lookup(env, name) {
            return Ok(value);
        }
        self.host
            .builtin(name)
            .map(Value::Builtin)
            .ok_or_else(|| RuntimeError::new(ErrorKind::Name, format!("name '{name}' is not defined")))
    }
}

fn overflow() -> RuntimeError {
    RuntimeError::new(ErrorKind::Overflow, "integer overflow")
}

fn zero_division() -> RuntimeError {
    RuntimeError::new(ErrorKind::ZeroDivision, "division by zero")
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    use BinaryOp::*;

    match op {
        Eq => return Ok(Value::Bool(lhs.equals(&rhs))),
        NotEq => return Ok(Value::Bool(!lhs.equals(&rhs))),
        Lt | LtEq | Gt | GtEq => return compare(op, &lhs, &rhs),
        _ => {}
    }

    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                Add => a.checked_add(b),
                Sub => a.checked_sub(b),
                Mul => a.checked_mul(b),
                Div | Rem if b == 0 => return Err(zero_division()),
                Div => a.checked_div(b),
                Rem => a.checked_rem_euclid(b),
                _ => unreachable!("comparisons handled above"),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::str(format!("{a}{b}"))),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == Mul => {
            let n = usize::try_from(*n).unwrap_or(0);
            if s.len().saturating_mul(n) > MAX_STR_BYTES {
                return Err(RuntimeError::new(ErrorKind::Value, "repeated string is too long"));
            }
            Ok(Value::str(s.repeat(n)))
        }
        (Value::List(a), Value::List(b)) if op == Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        _ => {
            let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
                return Err(unsupported(op, &lhs, &rhs));
            };
            let result = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div | Rem if b == 0.0 => return Err(zero_division()),
                Div => a / b,
                Rem => a.rem_euclid(b),
                _ => unreachable!("comparisons handled above"),
            };
            Ok(Value::Float(result))
        }
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_float(lhs), as_float(rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(unsupported(op, lhs, rhs)),
        },
    };
    // NaN compares false under every operator.
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        _ => unreachable!("only ordering operators reach compare"),
    };
    Ok(Value::Bool(result))
}

fn list_slot(index: &Value, len: usize) -> Result<usize, RuntimeError> {
    let Value::Int(i) = index else {
        return Err(RuntimeError::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let resolved = if *i < 0 { len as i64 + i } else { *i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::new(
            ErrorKind::Index,
            format!("index {i} out of range for length {len}"),
        ));
    }
    Ok(resolved as usize)
}

fn index_value(target: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let slot = list_slot(index, items.len())?;
            Ok(items[slot].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let slot = list_slot(index, chars.len())?;
            Ok(Value::str(chars[slot].to_string()))
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::hook::{ExecEvent, ExecEventKind};
    use crate::host::MAX_CALL_DEPTH;
    use crate::parser::compile;

    fn run(src: &str) -> (Host, ExecutionContext, Result<(), RuntimeError>) {
        let host = Host::capturing();
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile(src, "/t/app.ds").unwrap();
        let result = Interpreter::new(&host).run(&program, &ctx);
        (host, ctx, result)
    }

    fn output(src: &str) -> String {
        let (host, _, result) = run(src);
        result.unwrap();
        host.captured_output()
    }

    fn failure(src: &str) -> RuntimeError {
        run(src).2.unwrap_err()
    }

    fn record_events(src: &str) -> Vec<(ExecEventKind, String, u32)> {
        let host = Host::capturing();
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile(src, "/t/app.ds").unwrap();
        let mut events = Vec::new();
        let mut hook = |e: &ExecEvent<'_>| {
            events.push((e.kind(), e.function.to_owned(), e.line));
            HookControl::Continue
        };
        let _ = Interpreter::new(&host).with_hook(&mut hook).run(&program, &ctx);
        events
    }

    #[test]
    fn arithmetic_and_strings() {
        let out = output(
            r#"
            print(1 + 2 * 3, 7 / 2, -7 % 3, 1.5 * 2);
            print("ab" + "cd", "-" * 3, [1] + [2]);
            "#,
        );
        assert_eq!(out, "7 3 2 3.0\nabcd --- [1, 2]\n");
    }

    #[test]
    fn control_flow() {
        let out = output(
            r#"
            let total = 0;
            for i in range(10) {
                if i % 2 == 0 { continue; }
                if i > 7 { break; }
                total = total + i;
            }
            let n = 0;
            while true {
                n = n + 1;
                if n >= 3 { break; }
            }
            print(total, n);
            "#,
        );
        assert_eq!(out, "16 3\n");
    }

    #[test]
    fn functions_recursion_and_closures() {
        let out = output(
            r#"
            fn fib(n) {
                if n < 2 { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            fn counter() {
                let count = 0;
                fn bump() { count = count + 1; return count; }
                return bump;
            }
            let c = counter();
            c(); c();
            print(fib(10), c());
            "#,
        );
        assert_eq!(out, "55 3\n");
    }

    #[test]
    fn lists_index_and_mutate() {
        let out = output(
            r#"
            let xs = [1, 2, 3];
            xs[-1] = 9;
            push(xs, "x");
            print(xs, xs[0], len(xs), "héllo"[1]);
            "#,
        );
        assert_eq!(out, "[1, 2, 9, \"x\"] 1 4 é\n");
    }

    #[test]
    fn short_circuit_skips_rhs() {
        let out = output("print(false and missing(), true or missing(), nil or 5);");
        assert_eq!(out, "false true 5\n");
    }

    #[test]
    fn main_guard_sees_entry_name() {
        let out = output(r#"if __name__ == "__main__" { print(__file__); }"#);
        assert_eq!(out, "/t/app.ds\n");
    }

    #[test]
    fn top_level_bindings_land_in_context() {
        let (_, ctx, result) = run("let answer = 42;");
        result.unwrap();
        assert!(ctx.get("answer").unwrap().equals(&Value::Int(42)));
    }

    #[test]
    fn argv_comes_from_host() {
        let host = Host::capturing();
        host.replace_argv(vec!["/t/app.ds".into(), "one".into()]);
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile("print(argv()[1]);", "/t/app.ds").unwrap();
        Interpreter::new(&host).run(&program, &ctx).unwrap();
        assert_eq!(host.captured_output(), "one\n");
    }

    #[test]
    fn runtime_error_kinds() {
        assert_eq!(failure("print(nope);").kind, ErrorKind::Name);
        assert_eq!(failure("x = 1;").kind, ErrorKind::Name);
        assert_eq!(failure("1 + \"a\";").kind, ErrorKind::Type);
        assert_eq!(failure("1 / 0;").kind, ErrorKind::ZeroDivision);
        assert_eq!(failure("1.0 % 0;").kind, ErrorKind::ZeroDivision);
        assert_eq!(failure("[1][3];").kind, ErrorKind::Index);
        assert_eq!(failure("9223372036854775807 + 1;").kind, ErrorKind::Overflow);
        assert_eq!(failure("fn f(a) {} f();").kind, ErrorKind::Argument);
        assert_eq!(failure("3();").kind, ErrorKind::Type);
        assert_eq!(failure("assert(1 > 2);").kind, ErrorKind::Assertion);
        assert_eq!(failure("for x in 5 { }").kind, ErrorKind::Type);
    }

    #[test]
    fn raise_carries_message_location_and_traceback() {
        let err = failure("fn inner() {\n  raise \"boom\";\n}\nfn outer() { inner(); }\nouter();");
        assert_eq!(err.kind, ErrorKind::Raised);
        assert_eq!(err.message, "boom");
        let location = err.location.clone().unwrap();
        assert_eq!(location.line, 2);
        assert_eq!(location.file, "/t/app.ds");
        let frames: Vec<&str> = err.traceback.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(frames, vec!["inner", "outer", "<module>"]);
        assert_eq!(err.traceback[2].pos.line, 5);
    }

    #[test]
    fn recursion_limit() {
        let host = Host::capturing().with_max_call_depth(20);
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile("fn f(n) { return f(n + 1); }\nf(0);", "/t/app.ds").unwrap();
        let err = Interpreter::new(&host).run(&program, &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert_eq!(err.traceback.len(), 21);
    }

    #[test]
    fn evaluation_nesting_is_bounded_across_calls() {
        let source = format!("fn f(n) {{ return {}f(n + 1); }}\nf(0);", "- ".repeat(200));
        let err = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || {
                let host = Host::capturing().with_max_call_depth(MAX_CALL_DEPTH);
                let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
                let program = compile(&source, "/t/app.ds").unwrap();
                Interpreter::new(&host).run(&program, &ctx).unwrap_err()
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert!(err.message.contains("nested"), "got: {}", err.message);
        assert!(err.traceback.len() < MAX_CALL_DEPTH);
    }

    #[test]
    fn events_follow_control_flow() {
        let events = record_events("fn add(a, b) {\n  return a + b;\n}\nadd(1, 2);");
        let kinds: Vec<_> = events.iter().map(|(k, f, l)| (*k, f.as_str(), *l)).collect();
        assert_eq!(
            kinds,
            vec![
                (ExecEventKind::Call, "<module>", 1),
                (ExecEventKind::Line, "<module>", 1),
                (ExecEventKind::Line, "<module>", 4),
                (ExecEventKind::Call, "add", 1),
                (ExecEventKind::Line, "add", 2),
                (ExecEventKind::Return, "add", 2),
                (ExecEventKind::Return, "<module>", 4),
            ]
        );
    }

    #[test]
    fn exception_reported_once_per_frame() {
        let events = record_events("fn f() {\n  1 / 0;\n}\nf();");
        let exceptions: Vec<_> = events
            .iter()
            .filter(|(k, _, _)| *k == ExecEventKind::Exception)
            .map(|(_, f, l)| (f.as_str(), *l))
            .collect();
        assert_eq!(exceptions, vec![("f", 2), ("<module>", 4)]);
    }

    #[test]
    fn call_event_exposes_arguments_and_locals() {
        let host = Host::capturing();
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile("fn f(x) {\n  let y = x * 2;\n  return y;\n}\nf(21);", "/t/app.ds").unwrap();
        let mut args_seen = Vec::new();
        let mut locals_at_return = Vec::new();
        let mut returned = None;
        let mut hook = |e: &ExecEvent<'_>| {
            match e.detail {
                EventDetail::Call { args } if e.function == "f" => {
                    args_seen = args.iter().map(|(n, v)| format!("{n}={v}")).collect();
                }
                EventDetail::Return { value } if e.function == "f" => {
                    returned = Some(value.to_string());
                    locals_at_return = e.locals().into_iter().map(|(n, _)| n).collect();
                }
                _ => {}
            }
            HookControl::Continue
        };
        Interpreter::new(&host).with_hook(&mut hook).run(&program, &ctx).unwrap();
        assert_eq!(args_seen, vec!["x=21"]);
        assert_eq!(returned.as_deref(), Some("42"));
        assert_eq!(locals_at_return, vec!["x", "y"]);
    }

    #[test]
    fn detach_stops_delivery_but_not_execution() {
        let host = Host::capturing();
        let ctx = ExecutionContext::new(Path::new("/t/app.ds"));
        let program = compile("print(1);\nprint(2);\nprint(3);", "/t/app.ds").unwrap();
        let mut seen = 0;
        let mut hook = |_: &ExecEvent<'_>| {
            seen += 1;
            if seen == 2 {
                HookControl::Detach
            } else {
                HookControl::Continue
            }
        };
        let mut interp = Interpreter::new(&host).with_hook(&mut hook);
        interp.run(&program, &ctx).unwrap();
        assert!(!interp.hooked());
        drop(interp);
        assert_eq!(seen, 2);
        assert_eq!(host.captured_output(), "1\n2\n3\n");
    }
}
