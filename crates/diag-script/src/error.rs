use std::fmt;

/// The unit failed to compile. Nothing of it has run.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{file}:{line}: {kind}")]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(file: impl Into<String>, line: u32, kind: CompileErrorKind) -> Self {
        Self {
            file: file.into(),
            line,
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("invalid token `{0}`")]
    InvalidToken(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("`return` outside function")]
    ReturnOutsideFunction,
    #[error("`{0}` outside loop")]
    OutsideLoop(&'static str),
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// Classification of a runtime failure, named the way scripts see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Name,
    Type,
    Value,
    Index,
    ZeroDivision,
    Overflow,
    Argument,
    Assertion,
    Raised,
    Recursion,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "NameError",
            Self::Type => "TypeError",
            Self::Value => "ValueError",
            Self::Index => "IndexError",
            Self::ZeroDivision => "ZeroDivisionError",
            Self::Overflow => "OverflowError",
            Self::Argument => "ArgumentError",
            Self::Assertion => "AssertionError",
            Self::Raised => "Error",
            Self::Recursion => "RecursionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a statement in a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One active frame at the time an error unwound through it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub pos: SourcePos,
}

/// The target failed while running.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Statement that raised, filled in by the innermost frame.
    pub location: Option<SourcePos>,
    /// Innermost frame first.
    pub traceback: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            traceback: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn arity(function: &str, expected: &str, got: usize) -> Self {
        Self::new(
            ErrorKind::Argument,
            format!("{function}() takes {expected} argument(s) but {got} were given"),
        )
    }

    /// Attach the raising statement's position unless one is already set.
    pub(crate) fn at(mut self, file: &str, line: u32) -> Self {
        if self.location.is_none() {
            self.location = Some(SourcePos {
                file: file.to_owned(),
                line,
            });
        }
        self
    }

    /// Multi-line rendering with the traceback, outermost frame first.
    pub fn render(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.traceback.iter().rev() {
            out.push_str(&format!("  {} in {}\n", frame.pos, frame.function));
        }
        out.push_str(&self.to_string());
        out
    }
}
