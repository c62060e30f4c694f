//! Wires settings into a traced session, the live server and the static
//! report, and drives them to completion.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use diag_core::{EventMask, QueueConfig};
use diag_engine::{
    join, EventTransform, ExecutionSession, PayloadLimit, ScopeFilter, SessionConfig, TracerConfig,
};
use diag_report::{FsWalker, ReportConfig, Reporter};
use diag_script::{Host, RenderLimits};
use diag_server::{LiveServer, ServerConfig};
use diag_settings::{DiagSettings, LogFormatSetting};
use diag_telemetry::{parse_level, LogFormat, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One invocation: what to run and where the snapshot comes from.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub source: String,
    pub args: Vec<String>,
    /// Directory the static report snapshots.
    pub root: PathBuf,
    pub settings: DiagSettings,
}

pub fn telemetry_config(settings: &DiagSettings) -> Result<TelemetryConfig> {
    let module_levels = settings
        .logging
        .modules
        .iter()
        .map(|(module, level)| parse_level(level).map(|level| (module.clone(), level)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TelemetryConfig {
        log_level: parse_level(&settings.logging.level)?,
        module_levels,
        format: match settings.logging.format {
            LogFormatSetting::Text => LogFormat::Text,
            LogFormatSetting::Json => LogFormat::Json,
        },
        log_file: settings.logging.file.as_ref().map(PathBuf::from),
    })
}

pub fn server_config(settings: &DiagSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        heartbeat_timeout_secs: server.heartbeat_timeout_secs,
        max_message_size: server.max_message_size,
    }
}

pub fn session_config(settings: &DiagSettings) -> Result<SessionConfig> {
    let events = EventMask::from_str(&settings.tracer.events)
        .map_err(|e| anyhow!("tracer.events: {e}"))?;
    let runner = &settings.runner;
    Ok(SessionConfig {
        queue: QueueConfig {
            capacity: settings.queue.capacity,
            enqueue_timeout: Duration::from_millis(settings.queue.enqueue_timeout_ms),
            replay_history: settings.queue.replay_history,
        },
        tracer: TracerConfig {
            events,
            capture_locals: settings.tracer.capture_locals,
            control_poll_interval: settings.tracer.control_poll_interval,
            render: RenderLimits {
                max_string: settings.tracer.payload.max_string,
                max_items: settings.tracer.payload.max_items,
                max_depth: settings.tracer.payload.max_depth,
            },
        },
        cwd: None,
        search_path: runner.search_path.iter().map(PathBuf::from).collect(),
        wait_for_viewers: (runner.wait_for_viewers > 0).then(|| {
            (
                runner.wait_for_viewers,
                Duration::from_secs(runner.wait_timeout_secs),
            )
        }),
    })
}

/// Scope filter first so vetoed events are never truncated.
pub fn transforms(settings: &DiagSettings) -> Result<Vec<Box<dyn EventTransform>>> {
    let payload = &settings.tracer.payload;
    let chain: Vec<Box<dyn EventTransform>> = vec![
        Box::new(ScopeFilter::new(&settings.tracer.scope)?),
        Box::new(PayloadLimit {
            max_string: payload.max_string,
            max_items: payload.max_items,
            max_depth: payload.max_depth,
        }),
    ];
    Ok(chain)
}

fn report_dir(settings: &DiagSettings) -> PathBuf {
    settings
        .report
        .dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(diag_settings::home_dir)
}

fn write_report(root: PathBuf, settings: &DiagSettings, server_url: String) -> Result<PathBuf> {
    let report = &settings.report;
    let tree = FsWalker::new(&root, &report.exclude_dirs, &report.exclude_files)?.build()?;
    let reporter = Reporter::new(ReportConfig {
        out_dir: report_dir(settings),
        templates_dir: report.templates_dir.as_ref().map(PathBuf::from),
        server_url,
    })?;
    Ok(reporter.write(&tree)?.index)
}

/// Run the target under the live server. Target compile and runtime
/// failures are logged once by the runner and still count as success; host
/// failures are returned.
pub async fn run(invocation: Invocation, cancel: CancellationToken) -> Result<()> {
    let Invocation {
        source,
        args,
        root,
        settings,
    } = invocation;

    let host = Arc::new(Host::new().with_max_call_depth(settings.runner.max_call_depth));
    let (session, viewers) =
        ExecutionSession::new(host, session_config(&settings)?, transforms(&settings)?);

    let mut server = LiveServer::new(server_config(&settings), viewers);
    let addr = server.build().await.context("starting live server")?;
    let server_url = format!("ws://{addr}/ws");

    if settings.report.enabled {
        let report_settings = settings.clone();
        let url = server_url.clone();
        match tokio::task::spawn_blocking(move || write_report(root, &report_settings, url)).await
        {
            Ok(Ok(index)) => info!(index = %index.display(), "open the report to watch the run"),
            Ok(Err(e)) => warn!(error = %e, "report not written"),
            Err(e) => warn!(error = %e, "report task failed"),
        }
    }

    let server_task = tokio::spawn(server.run(cancel.clone()));
    info!(session = %session.id(), url = %server_url, source = %source, "session starting");

    let handle = session.spawn(source, args)?;
    let joined = tokio::task::spawn_blocking(move || join(handle))
        .await
        .context("execution thread lost")?;

    let result = match joined {
        Ok(report) => {
            info!(summary = ?report.summary(), "trace complete");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("running target")),
    };

    if result.is_err() || settings.runner.exit_on_complete {
        cancel.cancel();
    } else {
        info!("trace complete, serving until interrupted");
    }
    server_task
        .await
        .context("live server task lost")?
        .context("live server failed")?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn telemetry_levels_come_from_logging_settings() {
        let mut settings = DiagSettings::default();
        settings.logging.level = "warn".into();
        settings.logging.modules =
            BTreeMap::from([("diag_engine".to_string(), "trace".to_string())]);
        settings.logging.format = LogFormatSetting::Json;
        let config = telemetry_config(&settings).unwrap();
        assert_eq!(config.log_level, tracing::Level::WARN);
        assert_eq!(
            config.module_levels,
            vec![("diag_engine".to_string(), tracing::Level::TRACE)]
        );
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn bad_module_level_is_rejected() {
        let mut settings = DiagSettings::default();
        settings.logging.modules = BTreeMap::from([("x".to_string(), "loud".to_string())]);
        assert!(telemetry_config(&settings).is_err());
    }

    #[test]
    fn session_config_maps_queue_and_waits() {
        let mut settings = DiagSettings::default();
        settings.queue.enqueue_timeout_ms = 7;
        settings.tracer.events = "call,line".into();
        settings.runner.wait_for_viewers = 2;
        settings.runner.wait_timeout_secs = 3;
        let config = session_config(&settings).unwrap();
        assert_eq!(config.queue.enqueue_timeout, Duration::from_millis(7));
        assert_eq!(config.tracer.events, EventMask::from_str("line,call").unwrap());
        assert_eq!(config.wait_for_viewers, Some((2, Duration::from_secs(3))));
        assert_eq!(config.tracer.render.max_items, settings.tracer.payload.max_items);

        settings.runner.wait_for_viewers = 0;
        assert_eq!(session_config(&settings).unwrap().wait_for_viewers, None);
    }

    #[test]
    fn unknown_event_kind_fails() {
        let mut settings = DiagSettings::default();
        settings.tracer.events = "call,jump".into();
        assert!(session_config(&settings).is_err());
    }

    #[test]
    fn call_depth_ceiling_agrees_with_the_interpreter() {
        assert_eq!(
            diag_settings::MAX_CALL_DEPTH,
            diag_script::host::MAX_CALL_DEPTH
        );
    }

    #[test]
    fn transform_chain_order() {
        let chain = transforms(&DiagSettings::default()).unwrap();
        let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["scope", "payload_limit"]);
    }

    fn settings_for(report_dir: &std::path::Path) -> DiagSettings {
        let mut settings = DiagSettings::default();
        settings.server.port = 0;
        settings.runner.exit_on_complete = true;
        settings.report.dir = Some(report_dir.display().to_string());
        settings
    }

    #[tokio::test]
    async fn runs_target_writes_report_and_stops() {
        let project = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let script = project.path().join("main.ds");
        std::fs::write(&script, "let x = 1;\nlet y = x + 1;\n").unwrap();

        let invocation = Invocation {
            source: script.display().to_string(),
            args: vec!["a".into()],
            root: project.path().to_path_buf(),
            settings: settings_for(out.path()),
        };
        run(invocation, CancellationToken::new()).await.unwrap();

        let html = std::fs::read_to_string(out.path().join("index.html")).unwrap();
        assert!(html.contains(&diag_report::anchor_id(&script)));
        assert!(out.path().join("control.js").is_file());
    }

    #[tokio::test]
    async fn target_failure_is_not_a_host_failure() {
        let project = tempfile::tempdir().unwrap();
        let script = project.path().join("bad.ds");
        std::fs::write(&script, "let = ;\n").unwrap();
        let mut settings = settings_for(project.path());
        settings.report.enabled = false;

        let invocation = Invocation {
            source: script.display().to_string(),
            args: Vec::new(),
            root: project.path().to_path_buf(),
            settings,
        };
        assert!(run(invocation, CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_source_is_a_host_failure() {
        let project = tempfile::tempdir().unwrap();
        let mut settings = settings_for(project.path());
        settings.report.enabled = false;
        settings.runner.exit_on_complete = false;
        settings.runner.search_path = vec![project.path().display().to_string()];

        let invocation = Invocation {
            source: "no-such-target.ds".into(),
            args: Vec::new(),
            root: project.path().to_path_buf(),
            settings,
        };
        let err = run(invocation, CancellationToken::new()).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("source not found"), "got: {text}");
        assert!(text.contains("2 location(s)"), "got: {text}");
    }

    #[tokio::test]
    async fn unreadable_absolute_source_is_a_host_failure() {
        let project = tempfile::tempdir().unwrap();
        let mut settings = settings_for(project.path());
        settings.report.enabled = false;

        let invocation = Invocation {
            source: project.path().join("gone.ds").display().to_string(),
            args: Vec::new(),
            root: project.path().to_path_buf(),
            settings,
        };
        let err = run(invocation, CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to read"));
    }

    #[tokio::test]
    async fn compile_failure_is_logged_once() {
        let log = capture::install();
        let project = tempfile::tempdir().unwrap();
        let script = project.path().join("logged_once.ds");
        std::fs::write(&script, "let = ;\n").unwrap();
        let mut settings = settings_for(project.path());
        settings.report.enabled = false;

        let invocation = Invocation {
            source: script.display().to_string(),
            args: Vec::new(),
            root: project.path().to_path_buf(),
            settings,
        };
        run(invocation, CancellationToken::new()).await.unwrap();

        let failures = log.count(|event| {
            event.level <= tracing::Level::WARN && event.text.contains("logged_once.ds")
        });
        assert_eq!(failures, 1, "events: {:?}", log.snapshot());
    }

    /// Process-wide capturing subscriber. The runner logs from its own
    /// thread, so a thread-local default would miss its events.
    mod capture {
        use std::fmt::{self, Write};
        use std::sync::{Arc, OnceLock};

        use parking_lot::Mutex;
        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        #[derive(Clone, Debug)]
        pub struct Captured {
            pub level: Level,
            pub text: String,
        }

        #[derive(Clone, Default)]
        pub struct CapturedLog(Arc<Mutex<Vec<Captured>>>);

        impl CapturedLog {
            pub fn count(&self, pred: impl Fn(&Captured) -> bool) -> usize {
                self.0.lock().iter().filter(|event| pred(event)).count()
            }

            pub fn snapshot(&self) -> Vec<Captured> {
                self.0.lock().clone()
            }
        }

        struct CaptureLayer(CapturedLog);

        impl<S: Subscriber> Layer<S> for CaptureLayer {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut text = String::new();
                event.record(&mut TextVisitor(&mut text));
                (self.0).0.lock().push(Captured {
                    level: *event.metadata().level(),
                    text,
                });
            }
        }

        struct TextVisitor<'a>(&'a mut String);

        impl Visit for TextVisitor<'_> {
            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                let _ = write!(self.0, "{}={:?} ", field.name(), value);
            }
        }

        pub fn install() -> CapturedLog {
            static LOG: OnceLock<CapturedLog> = OnceLock::new();
            LOG.get_or_init(|| {
                let log = CapturedLog::default();
                let subscriber =
                    tracing_subscriber::registry().with(CaptureLayer(log.clone()));
                let _ = tracing::subscriber::set_global_default(subscriber);
                log
            })
            .clone()
        }
    }
}
