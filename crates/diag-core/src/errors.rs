use std::time::Duration;

/// Failures of the dual message queue.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Push attempted after the session tore the queue down.
    #[error("queue is closed")]
    Closed,
    /// The lane stayed full for the whole enqueue budget.
    #[error("enqueue timed out after {0:?}")]
    Timeout(Duration),
}

impl QueueError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed_queue",
            Self::Timeout(_) => "enqueue_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(QueueError::Closed.is_closed());
        assert!(!QueueError::Timeout(Duration::from_millis(5)).is_closed());
        assert_eq!(QueueError::Closed.error_kind(), "closed_queue");
        assert_eq!(
            QueueError::Timeout(Duration::from_millis(5)).error_kind(),
            "enqueue_timeout"
        );
    }

    #[test]
    fn display() {
        assert_eq!(QueueError::Closed.to_string(), "queue is closed");
        assert!(QueueError::Timeout(Duration::from_millis(5))
            .to_string()
            .contains("5ms"));
    }
}
