use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One line of the JSON log file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Append-only JSON-lines log file.
pub struct JsonFileSink {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonFileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, line: &LogLine) {
        let Ok(json) = serde_json::to_string(line) else {
            return;
        };
        let mut out = self.out.lock();
        let _ = writeln!(out, "{json}");
    }

    pub fn flush(&self) {
        let _ = self.out.lock().flush();
    }
}

/// tracing Layer that mirrors events into a [`JsonFileSink`].
pub struct JsonFileLayer {
    sink: Arc<JsonFileSink>,
}

impl JsonFileLayer {
    pub fn new(sink: Arc<JsonFileSink>) -> Self {
        Self { sink }
    }
}

/// Visitor that extracts fields from a tracing event or span.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            session_id: None,
        }
    }

    fn put(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            _ => self.put(field, serde_json::Value::String(val)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            _ => self.put(field, serde_json::Value::String(value.to_string())),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Stored on spans to propagate `session_id` to child events.
struct SpanSession(String);

impl<S> Layer<S> for JsonFileLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(session) = span.extensions().get::<SpanSession>() {
                        visitor.session_id = Some(session.0.clone());
                        break;
                    }
                }
            }
        }

        self.sink.write(&LogLine {
            timestamp: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            session_id: visitor.session_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if let (Some(session_id), Some(span)) = (visitor.session_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanSession(session_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn read_lines(path: &Path) -> Vec<LogLine> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn events_are_written_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/run.jsonl");
        let sink = Arc::new(JsonFileSink::open(&path).unwrap());
        let subscriber = tracing_subscriber::registry().with(JsonFileLayer::new(Arc::clone(&sink)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(seq = 4u64, dropped = true, file = "app.ds", "record dropped");
        });
        sink.flush();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, "WARN");
        assert_eq!(lines[0].message, "record dropped");
        assert_eq!(lines[0].fields["seq"], 4);
        assert_eq!(lines[0].fields["dropped"], true);
        assert_eq!(lines[0].fields["file"], "app.ds");
        assert!(lines[0].session_id.is_none());
    }

    #[test]
    fn session_id_propagates_from_spans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let sink = Arc::new(JsonFileSink::open(&path).unwrap());
        let subscriber = tracing_subscriber::registry().with(JsonFileLayer::new(Arc::clone(&sink)));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("session", session_id = "sess_1");
            let _entered = span.enter();
            let inner = tracing::info_span!("run");
            let _inner = inner.enter();
            tracing::info!("compiled");
        });
        sink.flush();

        let lines = read_lines(&path);
        assert_eq!(lines[0].session_id.as_deref(), Some("sess_1"));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        for _ in 0..2 {
            let sink = JsonFileSink::open(&path).unwrap();
            sink.write(&LogLine {
                timestamp: "t".into(),
                level: "INFO".into(),
                target: "x".into(),
                message: "m".into(),
                fields: Default::default(),
                session_id: None,
            });
            sink.flush();
        }
        assert_eq!(read_lines(&path).len(), 2);
    }
}
