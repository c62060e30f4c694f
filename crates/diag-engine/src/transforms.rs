//! Event transforms applied by the tracer before a record is sequenced.
//!
//! Each transform sees the event the previous one produced and either passes
//! it on (possibly rewritten) or vetoes it by returning `Ok(None)`.

use diag_core::{EventKind, Location};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Map, Value};

use crate::error::TransformError;

/// Prefix given to synthetic (non-file) locations such as `<string>`.
pub const SYNTHETIC_PREFIX: &str = "inner file ";

/// A captured event on its way to becoming a `TraceRecord`.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub location: Location,
    pub function: String,
    pub payload: Value,
}

pub trait EventTransform: Send {
    fn name(&self) -> &str;

    /// `Ok(None)` vetoes the event. An error is treated as a veto too.
    fn apply(&self, event: TraceEvent) -> Result<Option<TraceEvent>, TransformError>;
}

// ── ScopeFilter ─────────────────────────────────────────────────────────────

/// Keeps events whose file is in scope.
///
/// Synthetic locations are always out of scope. When include globs are
/// configured, files matching none of them are out of scope as well.
pub struct ScopeFilter {
    include: Option<GlobSet>,
}

impl ScopeFilter {
    pub fn new<S: AsRef<str>>(include: &[S]) -> Result<Self, TransformError> {
        let include = if include.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in include {
                let pattern = pattern.as_ref();
                let glob = Glob::new(pattern).map_err(|source| TransformError::Pattern {
                    pattern: pattern.to_owned(),
                    source,
                })?;
                builder.add(glob);
            }
            Some(builder.build().map_err(|source| TransformError::Pattern {
                pattern: include.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(","),
                source,
            })?)
        };
        Ok(Self { include })
    }

    pub fn in_scope(&self, file: &str) -> bool {
        if file.starts_with(SYNTHETIC_PREFIX) {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(file),
            None => true,
        }
    }
}

impl EventTransform for ScopeFilter {
    fn name(&self) -> &str {
        "scope"
    }

    fn apply(&self, event: TraceEvent) -> Result<Option<TraceEvent>, TransformError> {
        Ok(self.in_scope(&event.location.file).then_some(event))
    }
}

// ── PayloadLimit ────────────────────────────────────────────────────────────

/// Bounds the size of payloads so a single huge value cannot flood viewers.
#[derive(Clone, Debug)]
pub struct PayloadLimit {
    pub max_string: usize,
    pub max_items: usize,
    pub max_depth: usize,
}

impl Default for PayloadLimit {
    fn default() -> Self {
        Self {
            max_string: 256,
            max_items: 32,
            max_depth: 4,
        }
    }
}

impl PayloadLimit {
    pub fn limit(&self, value: Value) -> Value {
        self.limit_at(value, 0)
    }

    fn limit_at(&self, value: Value, depth: usize) -> Value {
        match value {
            Value::String(s) => Value::String(self.truncate_str(s)),
            Value::Array(items) => {
                if depth >= self.max_depth {
                    return Value::String(format!("[{} items]", items.len()));
                }
                let total = items.len();
                let mut out: Vec<Value> = items
                    .into_iter()
                    .take(self.max_items)
                    .map(|v| self.limit_at(v, depth + 1))
                    .collect();
                if total > self.max_items {
                    out.push(Value::String(format!("... ({} more)", total - self.max_items)));
                }
                Value::Array(out)
            }
            Value::Object(map) => {
                if depth >= self.max_depth {
                    return Value::String(format!("{{{} keys}}", map.len()));
                }
                let total = map.len();
                let mut out: Map<String, Value> = map
                    .into_iter()
                    .take(self.max_items)
                    .map(|(k, v)| (k, self.limit_at(v, depth + 1)))
                    .collect();
                if total > self.max_items {
                    out.insert(
                        "...".into(),
                        Value::String(format!("{} more", total - self.max_items)),
                    );
                }
                Value::Object(out)
            }
            other => other,
        }
    }

    fn truncate_str(&self, s: String) -> String {
        if s.chars().count() <= self.max_string {
            return s;
        }
        let mut out: String = s.chars().take(self.max_string).collect();
        out.push('…');
        out
    }
}

impl EventTransform for PayloadLimit {
    fn name(&self) -> &str {
        "payload_limit"
    }

    fn apply(&self, mut event: TraceEvent) -> Result<Option<TraceEvent>, TransformError> {
        // Top-level payload fields are level 0 so `max_depth` counts value nesting.
        event.payload = match event.payload {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.limit_at(v, 0)))
                    .collect(),
            ),
            other => self.limit(other),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(file: &str) -> TraceEvent {
        TraceEvent {
            kind: EventKind::Line,
            location: Location::new(file, 1),
            function: "<module>".into(),
            payload: json!({"function": "<module>"}),
        }
    }

    #[test]
    fn scope_rejects_synthetic_locations() {
        let filter = ScopeFilter::new::<&str>(&[]).unwrap();
        assert!(filter.apply(event("inner file <string>")).unwrap().is_none());
        assert!(filter.apply(event("/work/app.ds")).unwrap().is_some());
    }

    #[test]
    fn scope_globs_restrict_files() {
        let filter = ScopeFilter::new(&["/work/**"]).unwrap();
        assert!(filter.in_scope("/work/app.ds"));
        assert!(filter.in_scope("/work/lib/util.ds"));
        assert!(!filter.in_scope("/usr/lib/other.ds"));
    }

    #[test]
    fn invalid_glob_is_reported() {
        let err = ScopeFilter::new(&["a[".to_string()]).err().unwrap();
        assert!(matches!(err, TransformError::Pattern { ref pattern, .. } if pattern == "a["));
    }

    #[test]
    fn payload_limit_truncates_strings_and_lists() {
        let limit = PayloadLimit {
            max_string: 3,
            max_items: 2,
            max_depth: 4,
        };
        let value = limit.limit(json!({"s": "abcdef", "xs": [1, 2, 3, 4]}));
        assert_eq!(value["s"], "abc…");
        assert_eq!(value["xs"], json!([1, 2, "... (2 more)"]));
    }

    #[test]
    fn payload_limit_caps_depth() {
        let limit = PayloadLimit {
            max_depth: 1,
            ..PayloadLimit::default()
        };
        let mut e = event("/w/app.ds");
        e.payload = json!({"value": [[1, 2], 3]});
        let out = limit.apply(e).unwrap().unwrap();
        assert_eq!(out.payload["value"], json!(["[2 items]", 3]));
    }

    #[test]
    fn payload_limit_keeps_small_payloads() {
        let limit = PayloadLimit::default();
        let e = event("/w/app.ds");
        let out = limit.apply(e.clone()).unwrap().unwrap();
        assert_eq!(out, e);
    }
}
