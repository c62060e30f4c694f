//! A small text template language rendered over a `serde_json::Value`.
//!
//! ```text
//! {{ file.name }}            output, undefined paths render empty
//! {{ escape(line.content) }} helper call
//! {% for f in Files %}...{% endfor %}
//! {% if not is_multiple(xs) %}...{% else %}...{% endif %}
//! ```
//!
//! Helpers: `escape`, `is_multiple`, `len`, `json`. Unknown helpers and
//! unbalanced blocks are rejected when the template is parsed.

use std::borrow::Cow;

use serde_json::Value;

use crate::error::TemplateError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Helper {
    Escape,
    IsMultiple,
    Len,
    Json,
}

impl Helper {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "escape" => Some(Self::Escape),
            "is_multiple" => Some(Self::IsMultiple),
            "len" => Some(Self::Len),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn apply(self, arg: &Value) -> Value {
        match self {
            Helper::Escape => Value::String(escape(&to_text(arg))),
            Helper::IsMultiple => Value::Bool(length(arg) > 1),
            Helper::Len => Value::from(length(arg)),
            Helper::Json => {
                let encoded = serde_json::to_string(arg).unwrap_or_default();
                Value::String(encoded.replace("</", "<\\/"))
            }
        }
    }
}

/// HTML-escape a source line for display: `&`, space and `<`.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace(' ', "&nbsp;")
        .replace('<', "&lt;")
}

fn length(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        _ => 0,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Path(Vec<String>),
    Literal(Value),
    Not(Box<Expr>),
    Call(Helper, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Text(String),
    Output(Expr),
    For {
        var: String,
        iter: Expr,
        body: Vec<Node>,
        line: usize,
    },
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template, reusable across renders.
#[derive(Clone, Debug)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let segments = split_segments(source)?;
        let mut parser = Parser {
            segments,
            pos: 0,
        };
        let (nodes, end) = parser.parse_nodes(&[])?;
        if let Some((tag, line)) = end {
            return Err(TemplateError::UnexpectedTag { tag, line });
        }
        Ok(Self { nodes })
    }

    pub fn render(&self, context: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_nodes(&self.nodes, context, None, &mut out)?;
        Ok(out)
    }
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Output { body: String, line: usize },
    Tag { body: String, line: usize },
}

fn split_segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;

    loop {
        let next = match (rest.find("{{"), rest.find("{%")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(start) = next else {
            if !rest.is_empty() {
                segments.push(Segment::Text(rest.to_string()));
            }
            return Ok(segments);
        };

        let text = &rest[..start];
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }
        line += text.matches('\n').count();

        let is_output = rest[start..].starts_with("{{");
        let (open, close) = if is_output { ("{{", "}}") } else { ("{%", "%}") };
        let inner_start = start + 2;
        let Some(len) = rest[inner_start..].find(close) else {
            return Err(TemplateError::UnclosedTag { open, line });
        };
        let body = rest[inner_start..inner_start + len].trim().to_string();
        segments.push(if is_output {
            Segment::Output { body, line }
        } else {
            Segment::Tag { body, line }
        });
        line += rest[inner_start..inner_start + len].matches('\n').count();
        rest = &rest[inner_start + len + 2..];
    }
}

struct Parser {
    segments: Vec<Segment>,
    pos: usize,
}

type BlockEnd = Option<(String, usize)>;

impl Parser {
    /// Parse nodes until one of `until` (or the end) is reached. Returns the
    /// terminating keyword and its line.
    fn parse_nodes(&mut self, until: &[&str]) -> Result<(Vec<Node>, BlockEnd), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.segments.len() {
            let index = self.pos;
            self.pos += 1;
            match &self.segments[index] {
                Segment::Text(text) => nodes.push(Node::Text(text.clone())),
                Segment::Output { body, line } => {
                    nodes.push(Node::Output(parse_expr(body, *line)?));
                }
                Segment::Tag { body, line } => {
                    let (body, line) = (body.clone(), *line);
                    let (keyword, rest) = match body.split_once(char::is_whitespace) {
                        Some((k, r)) => (k, r.trim()),
                        None => (body.as_str(), ""),
                    };
                    match keyword {
                        "for" => nodes.push(self.parse_for(rest, line)?),
                        "if" => nodes.push(self.parse_if(rest, line)?),
                        k if until.contains(&k) && rest.is_empty() => {
                            return Ok((nodes, Some((k.to_string(), line))));
                        }
                        _ => {
                            return Err(TemplateError::UnexpectedTag {
                                tag: body.clone(),
                                line,
                            });
                        }
                    }
                }
            }
        }
        Ok((nodes, None))
    }

    fn parse_for(&mut self, header: &str, line: usize) -> Result<Node, TemplateError> {
        let bad = |reason: &str| TemplateError::BadExpression {
            expr: header.to_string(),
            reason: reason.to_string(),
            line,
        };
        let (var, iter) = header
            .split_once(" in ")
            .ok_or_else(|| bad("expected `<name> in <expr>`"))?;
        let var = var.trim();
        if !is_identifier(var) {
            return Err(bad("loop variable must be a plain name"));
        }
        let iter = parse_expr(iter.trim(), line)?;
        let (body, end) = self.parse_nodes(&["endfor"])?;
        if end.is_none() {
            return Err(TemplateError::UnclosedBlock { block: "for", line });
        }
        Ok(Node::For {
            var: var.to_string(),
            iter,
            body,
            line,
        })
    }

    fn parse_if(&mut self, cond: &str, line: usize) -> Result<Node, TemplateError> {
        let cond = parse_expr(cond, line)?;
        let (then, end) = self.parse_nodes(&["else", "endif"])?;
        let otherwise = match end.as_ref().map(|(k, _)| k.as_str()) {
            Some("else") => {
                let (otherwise, end) = self.parse_nodes(&["endif"])?;
                if end.is_none() {
                    return Err(TemplateError::UnclosedBlock { block: "if", line });
                }
                otherwise
            }
            Some(_) => Vec::new(),
            None => return Err(TemplateError::UnclosedBlock { block: "if", line }),
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, ch)) if ch == c => break,
                        Some((_, ch)) => text.push(ch),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = i + c.len_utf8();
                chars.next();
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let n = src[i..end]
                    .parse()
                    .map_err(|_| format!("bad number `{}`", &src[i..end]))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_' || d == '.') {
                        break;
                    }
                    end = j + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(src[i..end].to_string()));
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }
    Ok(tokens)
}

fn parse_expr(src: &str, line: usize) -> Result<Expr, TemplateError> {
    let bad = |reason: String| TemplateError::BadExpression {
        expr: src.to_string(),
        reason,
        line,
    };
    if src.is_empty() {
        return Err(bad("empty expression".to_string()));
    }
    let tokens = tokenize(src).map_err(bad)?;
    let mut pos = 0;
    let expr = parse_unary(&tokens, &mut pos, src, line)?;
    if pos != tokens.len() {
        return Err(bad("unexpected trailing input".to_string()));
    }
    Ok(expr)
}

fn parse_unary(
    tokens: &[Token],
    pos: &mut usize,
    src: &str,
    line: usize,
) -> Result<Expr, TemplateError> {
    let bad = |reason: &str| TemplateError::BadExpression {
        expr: src.to_string(),
        reason: reason.to_string(),
        line,
    };
    let Some(token) = tokens.get(*pos) else {
        return Err(bad("expected a value"));
    };
    *pos += 1;
    match token {
        Token::Word(w) if w == "not" => Ok(Expr::Not(Box::new(parse_unary(tokens, pos, src, line)?))),
        Token::Word(w) if w == "true" => Ok(Expr::Literal(Value::Bool(true))),
        Token::Word(w) if w == "false" => Ok(Expr::Literal(Value::Bool(false))),
        Token::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
        Token::Int(n) => Ok(Expr::Literal(Value::from(*n))),
        Token::Word(name) if tokens.get(*pos) == Some(&Token::LParen) => {
            let helper = Helper::lookup(name).ok_or_else(|| TemplateError::UnknownHelper {
                name: name.clone(),
                line,
            })?;
            *pos += 1;
            let arg = parse_unary(tokens, pos, src, line)?;
            if tokens.get(*pos) != Some(&Token::RParen) {
                return Err(bad("helpers take exactly one argument"));
            }
            *pos += 1;
            Ok(Expr::Call(helper, Box::new(arg)))
        }
        Token::Word(path) => {
            let parts: Vec<String> = path.split('.').map(str::to_string).collect();
            if parts.iter().any(String::is_empty) {
                return Err(bad("empty path segment"));
            }
            Ok(Expr::Path(parts))
        }
        Token::LParen | Token::RParen => Err(bad("unexpected parenthesis")),
    }
}

/// Loop variables visible while rendering a block.
struct Scope<'a> {
    name: &'a str,
    value: &'a Value,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Option<&'a Value> {
        if self.name == name {
            Some(self.value)
        } else {
            self.parent.and_then(|p| p.lookup(name))
        }
    }
}

fn lookup_path<'v>(parts: &[String], context: &'v Value, scope: Option<&Scope<'v>>) -> Option<&'v Value> {
    let (first, rest) = parts.split_first()?;
    let mut current = scope
        .and_then(|s| s.lookup(first))
        .or_else(|| context.get(first.as_str()))?;
    for part in rest {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part.as_str())?,
        };
    }
    Some(current)
}

fn eval<'v>(expr: &Expr, context: &'v Value, scope: Option<&Scope<'v>>) -> Cow<'v, Value> {
    match expr {
        Expr::Path(parts) => match lookup_path(parts, context, scope) {
            Some(value) => Cow::Borrowed(value),
            None => Cow::Owned(Value::Null),
        },
        Expr::Literal(value) => Cow::Owned(value.clone()),
        Expr::Not(inner) => Cow::Owned(Value::Bool(!truthy(&eval(inner, context, scope)))),
        Expr::Call(helper, arg) => Cow::Owned(helper.apply(&eval(arg, context, scope))),
    }
}

fn render_nodes<'v>(
    nodes: &[Node],
    context: &'v Value,
    scope: Option<&Scope<'v>>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => out.push_str(&to_text(&eval(expr, context, scope))),
            Node::For {
                var,
                iter,
                body,
                line,
            } => {
                let iterable = eval(iter, context, scope);
                let items = match iterable.as_ref() {
                    Value::Array(items) => items,
                    Value::Null => continue,
                    other => {
                        return Err(TemplateError::NotIterable {
                            found: type_name(other),
                            line: *line,
                        })
                    }
                };
                for item in items {
                    let inner = Scope {
                        name: var,
                        value: item,
                        parent: scope,
                    };
                    render_nodes(body, context, Some(&inner), out)?;
                }
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if truthy(&eval(cond, context, scope)) {
                    then
                } else {
                    otherwise
                };
                render_nodes(branch, context, scope, out)?;
            }
        }
    }
    Ok(())
}
