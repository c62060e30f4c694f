use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of execution event observed in the target program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A function frame was entered.
    Call,
    /// A statement is about to execute.
    Line,
    /// A function frame is returning a value.
    Return,
    /// An error is unwinding through a frame.
    Exception,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::Call, Self::Line, Self::Return, Self::Exception];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Line => "line",
            Self::Return => "return",
            Self::Exception => "exception",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Call => 1,
            Self::Line => 1 << 1,
            Self::Return => 1 << 2,
            Self::Exception => 1 << 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" => Ok(Self::Call),
            "line" => Ok(Self::Line),
            "return" => Ok(Self::Return),
            "exception" => Ok(Self::Exception),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Set of event kinds the tracer turns into records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1111)
    }

    pub fn with(mut self, kind: EventKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|k| self.contains(*k))
            .collect()
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<EventKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// Parses `"all"` or a comma-separated list such as `"call,return"`.
impl FromStr for EventMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let mask = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(EventKind::from_str)
            .collect::<Result<EventMask, _>>()?;
        if mask.is_empty() {
            return Err("event mask must name at least one kind".into());
        }
        Ok(mask)
    }
}

/// Source location of an observed event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One captured, sequenced execution event.
///
/// Serializes to the viewer wire shape
/// `{seq, kind, location: {file, line}, payload}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub kind: EventKind,
    pub location: Location,
    pub payload: serde_json::Value,
}
