//! Functions every script can call without defining them.

use std::fmt;

use crate::error::{ErrorKind, RuntimeError};
use crate::host::Host;
use crate::value::Value;

pub type BuiltinFn = fn(&Host, Vec<Value>) -> Result<Value, RuntimeError>;

/// A native function registered in the host's builtin table.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// The default builtin table.
pub fn defaults() -> Vec<Builtin> {
    vec![
        Builtin { name: "print", func: print },
        Builtin { name: "len", func: len },
        Builtin { name: "str", func: to_str },
        Builtin { name: "int", func: to_int },
        Builtin { name: "range", func: range },
        Builtin { name: "push", func: push },
        Builtin { name: "argv", func: argv },
        Builtin { name: "type", func: type_of },
        Builtin { name: "assert", func: assert },
    ]
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], RuntimeError> {
    let got = args.len();
    args.try_into()
        .map_err(|_| RuntimeError::arity(name, &N.to_string(), got))
}

fn print(host: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    host.write_line(&line);
    Ok(Value::Nil)
}

fn len(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let [value] = exactly::<1>("len", args)?;
    let n = match &value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        other => {
            return Err(RuntimeError::type_error(format!(
                "object of type {} has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn to_str(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let [value] = exactly::<1>("str", args)?;
    Ok(Value::str(value.to_string()))
}

fn to_int(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let [value] = exactly::<1>("int", args)?;
    match value {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(x) if x.is_finite() && x.abs() < i64::MAX as f64 => {
            Ok(Value::Int(x.trunc() as i64))
        }
        Value::Float(x) => Err(RuntimeError::new(
            ErrorKind::Overflow,
            format!("cannot convert float {x} to int"),
        )),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            RuntimeError::new(
                ErrorKind::Value,
                format!("invalid literal for int(): {:?}", &*s),
            )
        }),
        other => Err(RuntimeError::type_error(format!(
            "int() argument must be a number or string, not {}",
            other.type_name()
        ))),
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::type_error(format!(
            "{name}() expects int arguments, got {}",
            other.type_name()
        ))),
    }
}

fn range(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let ints = args
        .iter()
        .map(|v| int_arg("range", v))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(RuntimeError::arity("range", "1 to 3", ints.len())),
    };
    if step == 0 {
        return Err(RuntimeError::new(ErrorKind::Value, "range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(Value::list(items))
}

fn push(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let [target, item] = exactly::<2>("push", args)?;
    match target {
        Value::List(items) => {
            items.borrow_mut().push(item);
            Ok(Value::Nil)
        }
        other => Err(RuntimeError::type_error(format!(
            "push() expects a list, got {}",
            other.type_name()
        ))),
    }
}

fn argv(host: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    exactly::<0>("argv", args)?;
    Ok(Value::list(
        host.argv().into_iter().map(Value::str).collect(),
    ))
}

fn type_of(_: &Host, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let [value] = exactly::<1>("type", args)?;
    Ok(Value::str(value.type_name()))
}

fn assert(_: &Host, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::arity("assert", "1 or 2", args.len()));
    }
    let message = if args.len() == 2 { args.pop() } else { None };
    if args[0].is_truthy() {
        return Ok(Value::Nil);
    }
    let message = message.map(|m| m.to_string()).unwrap_or_else(|| "assertion failed".into());
    Err(RuntimeError::new(ErrorKind::Assertion, message))
}
