//! Runtime values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use serde_json::json;

use crate::ast::FnDecl;
use crate::builtins::Builtin;

/// Nesting depth past which rendering stops descending (self-containing lists).
const MAX_RENDER_DEPTH: usize = 16;

/// Lists nested deeper than this compare unequal unless they are the same list.
const MAX_COMPARE_DEPTH: usize = 10_000;

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListCell>),
    Function(Rc<Function>),
    Builtin(Builtin),
}

/// Bounds applied while rendering a value for a trace payload, so large
/// values cost no more than what survives truncation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderLimits {
    pub max_string: usize,
    pub max_items: usize,
    pub max_depth: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_string: 256,
            max_items: 32,
            max_depth: 4,
        }
    }
}

/// Backing store of a list value. Dropping it releases nested lists
/// iteratively, so arbitrarily deep chains like `x = [x]` free without
/// recursing.
#[derive(Default)]
pub struct ListCell(RefCell<Vec<Value>>);

impl Deref for ListCell {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ListCell {
    fn drop(&mut self) {
        let mut orphans = std::mem::take(self.0.get_mut());
        while let Some(value) = orphans.pop() {
            if let Value::List(cell) = value {
                // Only the last owner takes the children; others just decrement.
                if let Some(mut cell) = Rc::into_inner(cell) {
                    orphans.append(cell.0.get_mut());
                }
            }
        }
    }
}

/// A user function closed over the scope it was defined in.
pub struct Function {
    pub decl: Rc<FnDecl>,
    pub file: Rc<str>,
    pub closure: Env,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(ListCell(RefCell::new(items))))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Function(_) | Self::Builtin(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(x) => *x != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Function(_) | Self::Builtin(_) => true,
        }
    }

    /// Structural equality; ints and floats compare numerically. Walks
    /// nested lists with an explicit stack.
    pub fn equals(&self, other: &Value) -> bool {
        let mut pending = vec![(self.clone(), other.clone(), 0usize)];
        while let Some((a, b, depth)) = pending.pop() {
            match (&a, &b) {
                (Self::List(x), Self::List(y)) => {
                    if Rc::ptr_eq(x, y) {
                        continue;
                    }
                    if depth >= MAX_COMPARE_DEPTH {
                        return false;
                    }
                    let (x, y) = (x.borrow(), y.borrow());
                    if x.len() != y.len() {
                        return false;
                    }
                    pending.extend(
                        x.iter()
                            .cloned()
                            .zip(y.iter().cloned())
                            .map(|(x, y)| (x, y, depth + 1)),
                    );
                }
                _ if !a.scalar_equals(&b) => return false,
                _ => {}
            }
        }
        true
    }

    fn scalar_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a.name == b.name,
            _ => false,
        }
    }

    /// JSON rendering for trace payloads. Stops early: strings past
    /// `max_string` characters end in `…`, lists keep `max_items` entries
    /// plus a `... (N more)` marker, and lists at `max_depth` collapse to
    /// `[N items]`. `depth` is the nesting level the value sits at in the
    /// payload.
    pub fn to_json_within(&self, limits: &RenderLimits, depth: usize) -> serde_json::Value {
        match self {
            Self::Nil => serde_json::Value::Null,
            Self::Bool(b) => json!(b),
            Self::Int(n) => json!(n),
            Self::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| json!(x.to_string())),
            Self::Str(s) => json!(truncate_chars(s, limits.max_string)),
            Self::List(items) => {
                let items = items.borrow();
                if depth >= limits.max_depth.min(MAX_RENDER_DEPTH) {
                    return json!(format!("[{} items]", items.len()));
                }
                let mut out: Vec<serde_json::Value> = items
                    .iter()
                    .take(limits.max_items)
                    .map(|v| v.to_json_within(limits, depth + 1))
                    .collect();
                if items.len() > limits.max_items {
                    out.push(json!(format!("... ({} more)", items.len() - limits.max_items)));
                }
                serde_json::Value::Array(out)
            }
            Self::Function(f) => json!(format!("<fn {}>", f.decl.name)),
            Self::Builtin(b) => json!(format!("<builtin {}>", b.name)),
        }
    }

    fn write_repr(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(_) => self.write_display(f, depth),
            other => other.write_display(f, depth),
        }
    }

    fn write_display(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                if depth >= MAX_RENDER_DEPTH {
                    return f.write_str("[...]");
                }
                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_repr(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Self::Function(func) => write!(f, "<fn {}>", func.decl.name),
            Self::Builtin(b) => write!(f, "<builtin {}>", b.name),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_owned(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_display(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_repr(f, 0)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Shared, mutable scope handle.
pub type Env = Rc<RefCell<Scope>>;

/// One level of variable bindings. Functions get a fresh scope whose parent
/// is the scope they were defined in; blocks do not introduce scopes.
#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Scope {
    pub fn new_root() -> Env {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Bind `name` in this scope, shadowing outer bindings.
    pub fn define(env: &Env, name: impl Into<String>, value: Value) {
        env.borrow_mut().vars.insert(name.into(), value);
    }

    pub fn lookup(env: &Env, name: &str) -> Option<Value> {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let scope = current.borrow();
                if let Some(value) = scope.vars.get(name) {
                    return Some(value.clone());
                }
                scope.parent.clone()?
            };
            current = next;
        }
    }

    /// Rebind the nearest existing `name`. Returns false if none exists.
    pub fn assign(env: &Env, name: &str, value: Value) -> bool {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let mut scope = current.borrow_mut();
                if let Some(slot) = scope.vars.get_mut(name) {
                    *slot = value;
                    return true;
                }
                match scope.parent.clone() {
                    Some(parent) => parent,
                    None => return false,
                }
            };
            current = next;
        }
    }

    /// Bindings of this scope only, sorted by name, dunder names excluded.
    pub fn snapshot(env: &Env) -> Vec<(String, Value)> {
        let scope = env.borrow();
        let mut vars: Vec<(String, Value)> = scope
            .vars
            .iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }
}
