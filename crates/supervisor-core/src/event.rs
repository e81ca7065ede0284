//! Event bus: fan-out of lifecycle and scheduler events to subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

/// A lifecycle or scheduler event, tagged with a monotonic sequence number
/// scoped to the supervisor instance that produced it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub seq: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Started { name: String, pid: u32 },
    Stopped { name: String, exit_code: i32 },
    Failed { name: String, exit_code: i32 },
    BackoffScheduled { name: String, attempt: u32, delay_ms: u64 },
    RestartGaveUp { name: String, max_retries: u32 },
    ScheduleFired { schedule: String, launched_as: String },
    LogLine { name: String, stream: Stream, bytes: Vec<u8> },
    StopForceFailed { name: String },
    Dropped { n: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// A subscriber's ring buffer. Held by both the bus (weakly, so a dropped
/// `Receiver` is pruned on the next publish) and the `Receiver` itself.
struct Ring {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    /// Count of events evicted since the last time a `Dropped` marker was
    /// delivered. Surfaced out-of-band by `Receiver::recv` rather than
    /// competing for a queue slot, so the marker itself can never be lost.
    pending_dropped: AtomicU64,
}

/// Publishes events to any number of subscribers. Publishing never blocks:
/// a subscriber whose queue is full has its oldest-pending event evicted to
/// make room, and the eviction count is surfaced as a `Dropped{n}` marker on
/// the subscriber's next `recv`.
pub struct EventBus {
    seq: Arc<AtomicU64>,
    subscribers: Mutex<Vec<Weak<Ring>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver {
        let ring = Arc::new(Ring {
            queue: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)),
            notify: Notify::new(),
            pending_dropped: AtomicU64::new(0),
        });
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(Arc::downgrade(&ring));
        Receiver { ring, seq: self.seq.clone() }
    }

    pub fn publish(&self, kind: EventKind) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { seq, kind };
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|weak| weak.strong_count() > 0);
        for weak in subscribers.iter() {
            let Some(ring) = weak.upgrade() else { continue };
            let mut queue = ring.queue.lock().expect("subscriber queue poisoned");
            if queue.len() >= SUBSCRIBER_QUEUE_CAPACITY {
                queue.pop_front();
                ring.pending_dropped.fetch_add(1, Ordering::SeqCst);
            }
            queue.push_back(envelope.clone());
            drop(queue);
            ring.notify.notify_one();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle returned by [`EventBus::subscribe`].
pub struct Receiver {
    ring: Arc<Ring>,
    seq: Arc<AtomicU64>,
}

impl Receiver {
    /// Waits for the next event. A `Dropped{n}` marker is always delivered
    /// ahead of the next real event if the publisher had to evict to make
    /// room, so subscribers can never observe silent loss.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let n = self.ring.pending_dropped.swap(0, Ordering::SeqCst);
            if n > 0 {
                let seq = self.seq.fetch_add(1, Ordering::SeqCst);
                return Some(Envelope { seq, kind: EventKind::Dropped { n } });
            }

            let notified = self.ring.notify.notified();
            if let Some(envelope) = self.ring.queue.lock().expect("subscriber queue poisoned").pop_front() {
                return Some(envelope);
            }
            notified.await;
        }
    }
}
