use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use diag_core::ViewerId;
use tokio_util::sync::CancellationToken;

/// A connected viewer.
pub struct Viewer {
    pub id: ViewerId,
    pub connected_at: DateTime<Utc>,
    cancel: CancellationToken,
    last_pong: AtomicU64,
}

impl Viewer {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            id: ViewerId::next(),
            connected_at: Utc::now(),
            cancel,
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    /// Token cancelled when the viewer must be disconnected.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    pub fn connected_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of connected viewers.
pub struct ViewerRegistry {
    viewers: DashMap<ViewerId, Arc<Viewer>>,
    timeout: Duration,
}

impl ViewerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            viewers: DashMap::new(),
            timeout,
        }
    }

    /// Register a viewer whose token is a child of `parent`.
    pub fn register(&self, parent: &CancellationToken) -> Arc<Viewer> {
        let viewer = Arc::new(Viewer::new(parent.child_token()));
        self.viewers.insert(viewer.id, Arc::clone(&viewer));
        viewer
    }

    pub fn unregister(&self, id: &ViewerId) -> Option<Arc<Viewer>> {
        self.viewers.remove(id).map(|(_, viewer)| viewer)
    }

    pub fn get(&self, id: &ViewerId) -> Option<Arc<Viewer>> {
        self.viewers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.viewers.len()
    }

    /// Cancel and remove viewers that stopped answering pings.
    pub fn cleanup_dead(&self) -> usize {
        let dead: Vec<ViewerId> = self
            .viewers
            .iter()
            .filter(|entry| !entry.value().is_alive(self.timeout))
            .map(|entry| *entry.key())
            .collect();

        for id in &dead {
            if let Some(viewer) = self.unregister(id) {
                viewer.cancel.cancel();
                tracing::info!(viewer_id = %id, "disconnected unresponsive viewer");
            }
        }
        dead.len()
    }

    /// Cancel every viewer.
    pub fn close_all(&self) {
        for entry in self.viewers.iter() {
            entry.value().cancel.cancel();
        }
    }
}

/// Periodically disconnect dead viewers until `cancel` fires.
pub fn start_cleanup_task(
    registry: Arc<ViewerRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead();
                    if removed > 0 {
                        tracing::info!(removed, "dead viewer cleanup");
                    }
                }
            }
        }
    })
}
