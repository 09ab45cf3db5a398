//! Communication bus: addressed events, single replies, and the shared inbox.
//!
//! All inter-service traffic that needs routing flows through one bounded
//! queue consumed by the kernel's dispatch loop (see `kernel::dispatch`).
//!
//! Patterns supported:
//!   - **Fire-and-forget**: an [`Event`] without a reply channel
//!   - **Request/response**: [`Event::with_reply`] pairs the event with a
//!     [`PendingReply`] that resolves exactly once (success, 404, 408 or 500)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::types::{Error, EventId, Result};

/// Opaque event and state payload.
pub type Payload = serde_json::Value;

// =============================================================================
// Reply
// =============================================================================

/// The single response produced for an event that requested one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// 0 = success, 404 = unavailable, 408 = timeout, anything else is service-defined.
    pub code: u16,
    pub message: String,
    pub data: Payload,
}

impl Reply {
    pub const OK: u16 = 0;
    pub const NOT_FOUND: u16 = 404;
    pub const TIMEOUT: u16 = 408;
    pub const INTERNAL: u16 = 500;

    pub fn new(code: u16, message: impl Into<String>, data: Payload) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn ok(message: impl Into<String>, data: Payload) -> Self {
        Self::new(Self::OK, message, data)
    }

    /// Reply for events addressed to the kernel itself.
    pub fn kernel() -> Self {
        Self::new(Self::OK, "handled by kernel", Payload::from("ok"))
    }

    /// Target absent or not running.
    pub fn unavailable() -> Self {
        Self::new(Self::NOT_FOUND, "service unavailable", Payload::Null)
    }

    /// Target absent on the direct `send` path.
    pub fn not_found(service: &str) -> Self {
        Self::new(
            Self::NOT_FOUND,
            format!("service not found: {service}"),
            Payload::Null,
        )
    }

    pub fn timeout() -> Self {
        Self::new(Self::TIMEOUT, "timeout", Payload::Null)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message, Payload::Null)
    }

    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }
}

// =============================================================================
// Reply channel
// =============================================================================

struct ReplySlot {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Reply>>>,
}

/// Sending half of a reply. Cloneable so a handler and a deadline can race
/// for it; only the first [`ReplyChannel::resolve`] delivers.
#[derive(Clone)]
pub struct ReplyChannel {
    slot: Arc<ReplySlot>,
}

impl ReplyChannel {
    fn pair() -> (Self, PendingReply) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            slot: Arc::new(ReplySlot {
                resolved: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (channel, PendingReply { rx })
    }

    /// Deliver `reply` if nothing has been delivered yet. Returns whether
    /// this call won the race.
    pub fn resolve(&self, reply: Reply) -> bool {
        if self.slot.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        let tx = match self.slot.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match tx {
            // A caller that stopped waiting still counts as resolved.
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.resolved.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Receiving half of a reply.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait for the reply. If every sender was dropped unresolved (the event
    /// was discarded), a 500 reply is returned so the caller is never left
    /// waiting on silence.
    pub async fn wait(self) -> Reply {
        self.rx
            .await
            .unwrap_or_else(|_| Reply::internal("reply channel closed"))
    }

    /// Non-blocking poll; `None` while unresolved.
    pub fn try_take(&mut self) -> Option<Reply> {
        self.rx.try_recv().ok()
    }
}

// =============================================================================
// Event
// =============================================================================

/// An addressed message routed by the kernel.
///
/// Events are moved, never cloned: each is consumed at most once.
#[derive(Debug)]
pub struct Event {
    pub id: EventId,
    /// Target service name. Empty means the kernel itself.
    pub to: String,
    pub from: String,
    /// Free-form tag.
    pub kind: String,
    pub content: Payload,
    /// Reply deadline; the kernel default applies when absent.
    pub timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    reply: Option<ReplyChannel>,
}

impl Event {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        kind: impl Into<String>,
        content: impl Into<Payload>,
    ) -> Self {
        Self {
            id: EventId::new(),
            to: to.into(),
            from: from.into(),
            kind: kind.into(),
            content: content.into(),
            timeout: None,
            created_at: Utc::now(),
            reply: None,
        }
    }

    /// Event addressed to the kernel.
    pub fn to_kernel(
        from: impl Into<String>,
        kind: impl Into<String>,
        content: impl Into<Payload>,
    ) -> Self {
        Self::new(String::new(), from, kind, content)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a reply channel, returning the event and its pending reply.
    pub fn with_reply(mut self) -> (Self, PendingReply) {
        let (channel, pending) = ReplyChannel::pair();
        self.reply = Some(channel);
        (self, pending)
    }

    pub fn is_kernel_directed(&self) -> bool {
        self.to.is_empty()
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Detach the reply channel. Handlers receive events without one.
    pub(crate) fn take_reply(&mut self) -> Option<ReplyChannel> {
        self.reply.take()
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    pub(crate) pushed: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) kernel_handled: AtomicU64,
    pub(crate) unavailable: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
    pub(crate) late_replies_discarded: AtomicU64,
}

impl BusCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            events_pushed: self.pushed.load(Ordering::Relaxed),
            events_dispatched: self.dispatched.load(Ordering::Relaxed),
            kernel_handled: self.kernel_handled.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            late_replies_discarded: self.late_replies_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub events_pushed: u64,
    pub events_dispatched: u64,
    pub kernel_handled: u64,
    pub unavailable: u64,
    pub timed_out: u64,
    pub handler_panics: u64,
    pub late_replies_discarded: u64,
}

// =============================================================================
// EventBus
// =============================================================================

/// Cloneable producer side of the inbox, handed to services and callers.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<Event>,
    counters: Arc<BusCounters>,
}

impl BusHandle {
    /// Enqueue, waiting for capacity when the inbox is full.
    pub async fn push(&self, event: Event) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::BusClosed)?;
        BusCounters::bump(&self.counters.pushed);
        Ok(())
    }

    /// Enqueue without waiting; fails with [`Error::BusFull`] at capacity.
    pub fn try_push(&self, event: Event) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::BusFull,
            mpsc::error::TrySendError::Closed(_) => Error::BusClosed,
        })?;
        BusCounters::bump(&self.counters.pushed);
        Ok(())
    }
}

/// The single shared inbox. Many producers, exactly one consumer.
#[derive(Debug)]
pub struct EventBus {
    handle: BusHandle,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            handle: BusHandle {
                tx,
                counters: Arc::new(BusCounters::default()),
            },
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> BusStats {
        self.handle.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<BusCounters> {
        self.handle.counters.clone()
    }

    /// Hand the consumer side to the dispatch loop. Succeeds once.
    pub(crate) fn take_receiver(&self) -> Result<mpsc::Receiver<Event>> {
        let mut slot = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take().ok_or(Error::DispatcherRunning)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builders() {
        let evt = Event::new("echo", "main", "greet", "hello").with_timeout(Duration::from_millis(50));
        assert_eq!(evt.to, "echo");
        assert_eq!(evt.content, json!("hello"));
        assert_eq!(evt.timeout, Some(Duration::from_millis(50)));
        assert!(!evt.expects_reply());
        assert!(!evt.is_kernel_directed());

        let (evt, _pending) = Event::to_kernel("main", "ping", json!({})).with_reply();
        assert!(evt.is_kernel_directed());
        assert!(evt.expects_reply());
    }

    #[tokio::test]
    async fn test_reply_resolves_once() {
        let (mut evt, pending) = Event::new("a", "b", "c", Payload::Null).with_reply();
        let channel = evt.take_reply().unwrap();
        let racer = channel.clone();

        assert!(channel.resolve(Reply::ok("first", json!(1))));
        assert!(!racer.resolve(Reply::timeout()));
        assert!(racer.is_resolved());

        let reply = pending.wait().await;
        assert_eq!(reply.message, "first");
        assert_eq!(reply.data, json!(1));
    }

    #[tokio::test]
    async fn test_dropped_channel_yields_internal_reply() {
        let (evt, pending) = Event::new("a", "b", "c", Payload::Null).with_reply();
        drop(evt);

        let reply = pending.wait().await;
        assert_eq!(reply.code, Reply::INTERNAL);
    }

    #[test]
    fn test_try_take_before_and_after_resolution() {
        let (mut evt, mut pending) = Event::new("a", "b", "c", Payload::Null).with_reply();
        assert!(pending.try_take().is_none());

        evt.take_reply().unwrap().resolve(Reply::kernel());
        let reply = pending.try_take().unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.message, "handled by kernel");
    }

    #[tokio::test]
    async fn test_push_is_fifo() {
        let bus = EventBus::new(4);
        let handle = bus.handle();
        let mut rx = bus.take_receiver().unwrap();

        for i in 0..3 {
            handle.push(Event::new("svc", "t", "n", json!(i))).await.unwrap();
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().content, json!(i));
        }
        assert_eq!(bus.stats().events_pushed, 3);
    }

    #[tokio::test]
    async fn test_try_push_full_and_closed() {
        let bus = EventBus::new(1);
        let handle = bus.handle();

        handle.try_push(Event::new("svc", "t", "n", Payload::Null)).unwrap();
        let err = handle.try_push(Event::new("svc", "t", "n", Payload::Null)).unwrap_err();
        assert!(matches!(err, Error::BusFull));

        drop(bus.take_receiver().unwrap());
        let err = handle.try_push(Event::new("svc", "t", "n", Payload::Null)).unwrap_err();
        assert!(matches!(err, Error::BusClosed));
        let err = handle.push(Event::new("svc", "t", "n", Payload::Null)).await.unwrap_err();
        assert!(matches!(err, Error::BusClosed));
    }

    #[test]
    fn test_receiver_taken_once() {
        let bus = EventBus::new(1);
        let _rx = bus.take_receiver().unwrap();
        assert!(matches!(bus.take_receiver(), Err(Error::DispatcherRunning)));
    }
}
