//! Event routing.
//!
//! One loop drains the shared inbox in FIFO order. Each routed event is
//! handled on its own task, so completion order across services is not
//! submission order. When a reply is expected, a supervisor races the
//! handler against the event's deadline; the first to finish resolves the
//! reply and the loser is discarded.
//!
//! A handler that outlives its deadline keeps running; only its reply is
//! timed out.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Kernel;
use crate::commbus::{BusCounters, Event, Reply, ReplyChannel};
use crate::types::Result;

impl Kernel {
    /// Fire-and-forget enqueue, waiting for inbox capacity.
    pub async fn push(&self, event: Event) -> Result<()> {
        self.bus.handle().push(event).await
    }

    /// Non-blocking enqueue; fails with `BusFull` at capacity.
    pub fn try_push(&self, event: Event) -> Result<()> {
        self.bus.handle().try_push(event)
    }

    /// Direct call into the target's handler on the caller's task.
    ///
    /// Bypasses the inbox, the `Running` check and the deadline. Unknown
    /// targets get a 404. A reply channel on the event, if any, receives the
    /// same reply.
    pub async fn send(&self, mut event: Event) -> Reply {
        let channel = event.take_reply();
        let service = self
            .registry
            .read()
            .await
            .get(&event.to)
            .map(|meta| meta.service.clone());

        tracing::debug!(to = %event.to, from = %event.from, kind = %event.kind, "send");
        let reply = match service {
            Some(service) => service.handle(event).await,
            None => Reply::not_found(&event.to),
        };

        if let Some(channel) = channel {
            channel.resolve(reply.clone());
        }
        reply
    }

    /// Run the dispatch loop on the current task until `cancel` fires.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let rx = self.bus.take_receiver()?;
        self.dispatch_loop(rx, cancel).await;
        Ok(())
    }

    pub(crate) async fn dispatch_loop(&self, mut rx: mpsc::Receiver<Event>, cancel: CancellationToken) {
        tracing::info!("dispatcher_started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => self.route(event).await,
                    None => break,
                },
            }
        }

        // Queued events still get their single reply.
        rx.close();
        let counters = self.bus.counters();
        let mut drained = 0usize;
        while let Ok(mut event) = rx.try_recv() {
            if let Some(channel) = event.take_reply() {
                channel.resolve(Reply::unavailable());
            }
            BusCounters::bump(&counters.unavailable);
            drained += 1;
        }
        tracing::info!(drained, "dispatcher_stopped");
    }

    async fn route(&self, mut event: Event) {
        let counters = self.bus.counters();
        let channel = event.take_reply();

        if event.is_kernel_directed() {
            tracing::debug!(from = %event.from, kind = %event.kind, "kernel_event");
            BusCounters::bump(&counters.kernel_handled);
            if let Some(channel) = channel {
                channel.resolve(Reply::kernel());
            }
            return;
        }

        let service = self.registry.read().await.running(&event.to);
        let Some(service) = service else {
            tracing::debug!(to = %event.to, from = %event.from, "service_unavailable");
            BusCounters::bump(&counters.unavailable);
            if let Some(channel) = channel {
                channel.resolve(Reply::unavailable());
            }
            return;
        };

        tracing::debug!(id = %event.id, to = %event.to, from = %event.from, kind = %event.kind, "dispatch");
        BusCounters::bump(&counters.dispatched);

        let deadline = event.timeout.unwrap_or(self.config.default_reply_timeout);
        let handler = tokio::spawn(async move { service.handle(event).await });

        if let Some(channel) = channel {
            tokio::spawn(supervise(handler, channel, deadline, counters));
        }
    }
}

/// Resolve `channel` with whichever finishes first: the handler or the deadline.
async fn supervise(
    mut handler: JoinHandle<Reply>,
    channel: ReplyChannel,
    deadline: Duration,
    counters: Arc<BusCounters>,
) {
    tokio::select! {
        outcome = &mut handler => {
            channel.resolve(handler_reply(outcome, &counters));
            return;
        }
        _ = tokio::time::sleep(deadline) => {
            if channel.resolve(Reply::timeout()) {
                BusCounters::bump(&counters.timed_out);
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, "reply_timed_out");
            }
        }
    }

    // The handler is not cancelled; its late reply is dropped.
    let late = handler.await;
    let reply = handler_reply(late, &counters);
    if !channel.resolve(reply) {
        BusCounters::bump(&counters.late_replies_discarded);
    }
}

fn handler_reply(
    outcome: std::result::Result<Reply, tokio::task::JoinError>,
    counters: &BusCounters,
) -> Reply {
    match outcome {
        Ok(reply) => reply,
        Err(e) => {
            BusCounters::bump(&counters.handler_panics);
            tracing::error!("handler_task_failed: {}", e);
            Reply::internal("handler failed")
        }
    }
}
