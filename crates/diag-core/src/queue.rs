//! Dual message queue: the only shared resource between the execution side
//! (runner + tracer, synchronous) and the serving side (async viewers).
//!
//! - **Outbound** (runner → viewers) is a bounded fan-out ring. Every
//!   subscriber owns a cursor; a record stays buffered until the slowest
//!   subscriber has read it. The producer waits at most its enqueue budget
//!   for room. If other subscribers are ahead of the slowest ones when the
//!   budget runs out, the laggards are detached and the push goes through;
//!   otherwise it gives up with [`QueueError::Timeout`].
//! - **Inbound** (viewers → tracer) is a bounded `mpsc` channel that the
//!   tracer polls without blocking.
//!
//! Dropping the [`RunnerPort`] closes both lanes: readers drain what is left
//! and then observe end-of-stream, later pushes fail with [`QueueError::Closed`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, Notify};

use crate::control::ControlMessage;
use crate::errors::QueueError;
use crate::record::TraceRecord;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(5);

/// Queue sizing and back-pressure budget.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Records a lane may hold that the slowest reader has not consumed yet.
    pub capacity: usize,
    /// How long a push may wait for room before it fails.
    pub enqueue_timeout: Duration,
    /// Most recent outbound records kept for viewers that subscribe late.
    pub replay_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            replay_history: 0,
        }
    }
}

struct LaneState<T> {
    buf: VecDeque<T>,
    /// Absolute position of `buf[0]`.
    head: u64,
    /// Absolute position the next push is written to.
    tail: u64,
    cursors: HashMap<u64, u64>,
    /// Subscribers dropped for falling behind, until they unsubscribe.
    detached: HashSet<u64>,
    next_subscriber: u64,
    closed: bool,
}

impl<T> LaneState<T> {
    fn slowest(&self) -> u64 {
        self.cursors.values().copied().min().unwrap_or(self.tail)
    }

    fn pending(&self) -> usize {
        (self.tail - self.slowest()) as usize
    }

    /// Detach the subscribers sitting at the slowest cursor, provided some
    /// other subscriber is ahead of them. Returns how many were detached.
    fn detach_laggards(&mut self) -> usize {
        let slowest = self.slowest();
        if self.cursors.values().all(|&cursor| cursor == slowest) {
            return 0;
        }
        let laggards: Vec<u64> = self
            .cursors
            .iter()
            .filter(|(_, &cursor)| cursor == slowest)
            .map(|(&id, _)| id)
            .collect();
        for id in &laggards {
            self.cursors.remove(id);
            self.detached.insert(*id);
        }
        laggards.len()
    }

    /// Drop records every subscriber has passed, keeping `history` of them.
    fn trim(&mut self, history: usize) {
        let keep_from = self.slowest().min(self.tail.saturating_sub(history as u64));
        while self.head < keep_from && self.buf.pop_front().is_some() {
            self.head += 1;
        }
    }
}

enum Next<T> {
    Item(T),
    Empty,
    Closed,
    Detached,
}

/// Bounded single-producer, multi-reader lane with per-reader cursors.
pub struct FanoutLane<T> {
    state: Mutex<LaneState<T>>,
    /// Signalled whenever room frees up or the subscriber set changes.
    space: Condvar,
    /// Wakes async readers when a record lands or the lane closes.
    ready: Notify,
    capacity: usize,
    history: usize,
}

impl<T: Clone> FanoutLane<T> {
    pub fn new(capacity: usize, history: usize) -> Self {
        Self {
            state: Mutex::new(LaneState {
                buf: VecDeque::new(),
                head: 0,
                tail: 0,
                cursors: HashMap::new(),
                detached: HashSet::new(),
                next_subscriber: 0,
                closed: false,
            }),
            space: Condvar::new(),
            ready: Notify::new(),
            capacity: capacity.max(1),
            history,
        }
    }

    /// Append `item`, waiting at most `budget` for a slow reader to make room.
    /// Readers still stuck behind faster ones after the budget are detached.
    pub fn push(&self, item: T, budget: Duration) -> Result<(), QueueError> {
        let deadline = Instant::now() + budget;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.pending() < self.capacity {
                state.buf.push_back(item);
                state.tail += 1;
                state.trim(self.history);
                drop(state);
                self.ready.notify_waiters();
                return Ok(());
            }
            if self.space.wait_until(&mut state, deadline).timed_out()
                && !state.closed
                && state.pending() >= self.capacity
            {
                if state.detach_laggards() == 0 {
                    return Err(QueueError::Timeout(budget));
                }
                state.trim(self.history);
            }
        }
    }

    fn subscribe(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        let start = state.head.max(state.tail.saturating_sub(self.history as u64));
        state.cursors.insert(id, start);
        drop(state);
        self.space.notify_all();
        id
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        state.cursors.remove(&id);
        state.detached.remove(&id);
        state.trim(self.history);
        drop(state);
        self.space.notify_all();
    }

    fn take(&self, id: u64) -> Next<T> {
        let mut state = self.state.lock();
        let Some(cursor) = state.cursors.get(&id).copied() else {
            return if state.detached.contains(&id) {
                Next::Detached
            } else {
                Next::Closed
            };
        };
        if cursor < state.tail {
            let item = state.buf[(cursor - state.head) as usize].clone();
            state.cursors.insert(id, cursor + 1);
            state.trim(self.history);
            drop(state);
            self.space.notify_all();
            return Next::Item(item);
        }
        if state.closed {
            Next::Closed
        } else {
            Next::Empty
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.space.notify_all();
        self.ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().cursors.len()
    }

    /// Records buffered and not yet read by the slowest subscriber.
    fn pending(&self) -> usize {
        self.state.lock().pending()
    }

    /// Block until at least `count` subscribers exist or `timeout` elapses.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.cursors.len() < count {
            if state.closed || self.space.wait_until(&mut state, deadline).timed_out() {
                return state.cursors.len() >= count;
            }
        }
        true
    }
}

/// One reader's view of the outbound lane. Dropping it unsubscribes.
pub struct Subscription {
    lane: Arc<FanoutLane<Arc<TraceRecord>>>,
    id: u64,
}

impl Subscription {
    /// Next record, or `None` once the lane is closed and drained or this
    /// subscriber was detached for falling behind.
    ///
    /// Cancel-safe: a record is only taken after the last await point.
    pub async fn recv(&mut self) -> Option<Arc<TraceRecord>> {
        loop {
            let notified = self.lane.ready.notified();
            match self.lane.take(self.id) {
                Next::Item(record) => return Some(record),
                Next::Closed | Next::Detached => return None,
                Next::Empty => notified.await,
            }
        }
    }

    /// Non-blocking read. `Ok(None)` means nothing is buffered yet.
    pub fn try_recv(&mut self) -> Result<Option<Arc<TraceRecord>>, QueueError> {
        match self.lane.take(self.id) {
            Next::Item(record) => Ok(Some(record)),
            Next::Empty => Ok(None),
            Next::Closed | Next::Detached => Err(QueueError::Closed),
        }
    }

    /// Whether the producer dropped this subscriber for lagging behind.
    pub fn is_detached(&self) -> bool {
        self.lane.state.lock().detached.contains(&self.id)
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<TraceRecord>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|record| (record, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.lane.unsubscribe(self.id);
    }
}

/// Execution-side endpoint. Exactly one exists per session.
pub struct RunnerPort {
    outbound: Arc<FanoutLane<Arc<TraceRecord>>>,
    inbound: mpsc::Receiver<ControlMessage>,
    enqueue_timeout: Duration,
}

impl RunnerPort {
    /// Enqueue a record within the configured budget.
    pub fn push_outbound(&self, record: TraceRecord) -> Result<(), QueueError> {
        self.push_outbound_within(record, self.enqueue_timeout)
    }

    pub fn push_outbound_within(
        &self,
        record: TraceRecord,
        budget: Duration,
    ) -> Result<(), QueueError> {
        self.outbound.push(Arc::new(record), budget)
    }

    /// Next pending control message, without blocking.
    pub fn poll_inbound(&mut self) -> Option<ControlMessage> {
        self.inbound.try_recv().ok()
    }

    /// Close both lanes. Idempotent.
    pub fn close(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl Drop for RunnerPort {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serving-side endpoint, shared by every viewer connection.
#[derive(Clone)]
pub struct ViewerPort {
    outbound: Arc<FanoutLane<Arc<TraceRecord>>>,
    inbound: mpsc::Sender<ControlMessage>,
    enqueue_timeout: Duration,
}

impl ViewerPort {
    /// Start reading records emitted from now on (plus any replay history).
    pub fn subscribe(&self) -> Subscription {
        let id = self.outbound.subscribe();
        Subscription {
            lane: Arc::clone(&self.outbound),
            id,
        }
    }

    /// Lazy sequence of records for a fresh subscriber.
    pub fn drain_outbound(&self) -> impl Stream<Item = Arc<TraceRecord>> + Send {
        self.subscribe().into_stream()
    }

    /// Forward a control message, waiting at most the enqueue budget.
    pub async fn push_inbound(&self, message: ControlMessage) -> Result<(), QueueError> {
        use mpsc::error::SendTimeoutError;

        if self.outbound.is_closed() {
            return Err(QueueError::Closed);
        }
        self.inbound
            .send_timeout(message, self.enqueue_timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => QueueError::Timeout(self.enqueue_timeout),
                SendTimeoutError::Closed(_) => QueueError::Closed,
            })
    }

    /// Non-blocking variant of [`push_inbound`](Self::push_inbound), usable
    /// from synchronous code.
    pub fn try_push_inbound(&self, message: ControlMessage) -> Result<(), QueueError> {
        use mpsc::error::TrySendError;

        if self.outbound.is_closed() {
            return Err(QueueError::Closed);
        }
        self.inbound.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Timeout(Duration::ZERO),
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.outbound.subscriber_count()
    }

    /// Records the slowest subscriber has not read yet.
    pub fn pending(&self) -> usize {
        self.outbound.pending()
    }

    /// Blocking wait, meant for the execution thread before a run starts.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        self.outbound.wait_for_subscribers(count, timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Create the two endpoints of a session's queue pair.
pub fn dual_queue(config: &QueueConfig) -> (RunnerPort, ViewerPort) {
    let capacity = config.capacity.max(1);
    let outbound = Arc::new(FanoutLane::new(capacity, config.replay_history));
    let (tx, rx) = mpsc::channel(capacity);
    (
        RunnerPort {
            outbound: Arc::clone(&outbound),
            inbound: rx,
            enqueue_timeout: config.enqueue_timeout,
        },
        ViewerPort {
            outbound,
            inbound: tx,
            enqueue_timeout: config.enqueue_timeout,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventKind, Location};
    use futures::StreamExt;

    fn record(seq: u64) -> TraceRecord {
        TraceRecord {
            seq,
            kind: EventKind::Line,
            location: Location::new("/t/app.ds", seq as u32 + 1),
            payload: serde_json::Value::Null,
        }
    }

    fn config(capacity: usize) -> QueueConfig {
        QueueConfig {
            capacity,
            enqueue_timeout: Duration::from_millis(5),
            replay_history: 0,
        }
    }

    #[test]
    fn records_without_subscribers_are_discarded() {
        let (runner, viewers) = dual_queue(&config(2));
        for seq in 0..10 {
            runner.push_outbound(record(seq)).unwrap();
        }
        let mut sub = viewers.subscribe();
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[test]
    fn lane_preserves_fifo_order() {
        let (runner, viewers) = dual_queue(&config(16));
        let mut sub = viewers.subscribe();
        for seq in 0..5 {
            runner.push_outbound(record(seq)).unwrap();
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| sub.try_recv().unwrap())
            .map(|r| r.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn every_subscriber_sees_every_record() {
        let (runner, viewers) = dual_queue(&config(16));
        let mut a = viewers.subscribe();
        let mut b = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        runner.push_outbound(record(1)).unwrap();

        assert_eq!(a.try_recv().unwrap().unwrap().seq, 0);
        assert_eq!(a.try_recv().unwrap().unwrap().seq, 1);
        assert_eq!(b.try_recv().unwrap().unwrap().seq, 0);
        assert_eq!(b.try_recv().unwrap().unwrap().seq, 1);
    }

    #[test]
    fn full_lane_times_out_within_budget() {
        let (runner, viewers) = dual_queue(&config(2));
        let _stalled = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        runner.push_outbound(record(1)).unwrap();

        let started = Instant::now();
        let err = runner
            .push_outbound_within(record(2), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, QueueError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn reading_frees_room() {
        let (runner, viewers) = dual_queue(&config(1));
        let mut sub = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        assert!(runner.push_outbound(record(1)).is_err());
        assert_eq!(sub.try_recv().unwrap().unwrap().seq, 0);
        runner.push_outbound(record(2)).unwrap();
        assert_eq!(sub.try_recv().unwrap().unwrap().seq, 2);
    }

    #[test]
    fn dropping_a_stalled_subscriber_unblocks_the_producer() {
        let (runner, viewers) = dual_queue(&config(1));
        let stalled = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        drop(stalled);
        runner.push_outbound(record(1)).unwrap();
        assert_eq!(viewers.subscriber_count(), 0);
    }

    #[test]
    fn stalled_subscriber_is_detached_when_others_keep_up() {
        let (runner, viewers) = dual_queue(&config(2));
        let mut stalled = viewers.subscribe();
        let mut live = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        runner.push_outbound(record(1)).unwrap();
        assert_eq!(live.try_recv().unwrap().unwrap().seq, 0);
        assert_eq!(live.try_recv().unwrap().unwrap().seq, 1);
        assert_eq!(viewers.pending(), 2);

        runner.push_outbound(record(2)).unwrap();
        assert_eq!(live.try_recv().unwrap().unwrap().seq, 2);
        assert!(stalled.is_detached());
        assert!(!live.is_detached());
        assert_eq!(stalled.try_recv(), Err(QueueError::Closed));
        assert_eq!(viewers.subscriber_count(), 1);
        assert_eq!(viewers.pending(), 0);
    }

    #[test]
    fn subscribers_stalled_together_are_not_detached() {
        let (runner, viewers) = dual_queue(&config(1));
        let a = viewers.subscribe();
        let b = viewers.subscribe();
        runner.push_outbound(record(0)).unwrap();
        assert!(matches!(
            runner.push_outbound(record(1)),
            Err(QueueError::Timeout(_))
        ));
        assert!(!a.is_detached() && !b.is_detached());
        assert_eq!(viewers.subscriber_count(), 2);
    }

    #[test]
    fn replay_history_serves_late_subscribers() {
        let (runner, viewers) = dual_queue(&QueueConfig {
            replay_history: 2,
            ..config(8)
        });
        for seq in 0..5 {
            runner.push_outbound(record(seq)).unwrap();
        }
        let mut late = viewers.subscribe();
        assert_eq!(late.try_recv().unwrap().unwrap().seq, 3);
        assert_eq!(late.try_recv().unwrap().unwrap().seq, 4);
        assert!(late.try_recv().unwrap().is_none());
    }

    #[test]
    fn close_rejects_pushes_on_both_lanes() {
        let (mut runner, viewers) = dual_queue(&config(4));
        runner.close();
        assert_eq!(runner.push_outbound(record(0)), Err(QueueError::Closed));
        assert_eq!(
            viewers.try_push_inbound(ControlMessage::Stop),
            Err(QueueError::Closed)
        );
        assert!(viewers.is_closed());
    }

    #[test]
    fn dropping_runner_port_closes_queue() {
        let (runner, viewers) = dual_queue(&config(4));
        drop(runner);
        assert!(viewers.is_closed());
    }

    #[test]
    fn inbound_is_polled_in_order() {
        let (mut runner, viewers) = dual_queue(&config(4));
        assert!(runner.poll_inbound().is_none());
        viewers.try_push_inbound(ControlMessage::Pause).unwrap();
        viewers.try_push_inbound(ControlMessage::Stop).unwrap();
        assert_eq!(runner.poll_inbound(), Some(ControlMessage::Pause));
        assert_eq!(runner.poll_inbound(), Some(ControlMessage::Stop));
        assert!(runner.poll_inbound().is_none());
    }

    #[tokio::test]
    async fn async_push_inbound_reaches_runner() {
        let (mut runner, viewers) = dual_queue(&config(4));
        viewers.push_inbound(ControlMessage::Resume).await.unwrap();
        assert_eq!(runner.poll_inbound(), Some(ControlMessage::Resume));
    }

    #[tokio::test]
    async fn close_wakes_blocked_readers() {
        let (mut runner, viewers) = dual_queue(&config(4));
        let mut sub = viewers.subscribe();
        let reader = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        runner.close();
        let got = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn readers_drain_before_end_of_stream() {
        let (runner, viewers) = dual_queue(&config(8));
        let stream = viewers.drain_outbound();
        runner.push_outbound(record(0)).unwrap();
        runner.push_outbound(record(1)).unwrap();
        drop(runner);
        let seqs: Vec<u64> = stream.map(|r| r.seq).collect().await;
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn producer_thread_and_async_reader() {
        let (runner, viewers) = dual_queue(&config(4));
        let mut sub = viewers.subscribe();
        let producer = std::thread::spawn(move || {
            for seq in 0..100 {
                runner
                    .push_outbound_within(record(seq), Duration::from_secs(5))
                    .unwrap();
            }
        });
        let mut seen = Vec::new();
        while let Some(r) = sub.recv().await {
            seen.push(r.seq);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn wait_for_subscribers_times_out() {
        let (_runner, viewers) = dual_queue(&config(4));
        assert!(!viewers.wait_for_subscribers(1, Duration::from_millis(10)));
        let _sub = viewers.subscribe();
        assert!(viewers.wait_for_subscribers(1, Duration::from_millis(10)));
    }
}
