//! Shared sample services for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use microkernel::{BusHandle, Error, Event, Exportable, Importable, Payload, Reply, Result, Service};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY: [u8; 32] = [0x42; 32];

/// Shared journal of lifecycle calls and handled events.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Records `start:<name>`, `stop:<name>` and `<name>:<kind>` into a journal.
pub struct Recorder {
    name: String,
    deps: Vec<String>,
    journal: Journal,
    fail_start: bool,
}

impl Recorder {
    pub fn new(name: &str, deps: &[&str], journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            journal: journal.clone(),
            fail_start: false,
        })
    }

    pub fn failing(name: &str, deps: &[&str], journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            journal: journal.clone(),
            fail_start: true,
        })
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Service for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(Error::service(format!("{} refused to start", self.name)));
        }
        self.record(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(format!("stop:{}", self.name));
        Ok(())
    }

    async fn handle(&self, event: Event) -> Reply {
        self.record(format!("{}:{}", self.name, event.kind));
        Reply::ok("recorded", event.content)
    }
}

/// First echo generation: stateless.
pub struct EchoV1;

#[async_trait]
impl Service for EchoV1 {
    fn name(&self) -> &str {
        "echo"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: Event) -> Reply {
        Reply::ok("echo v1", event.content)
    }
}

/// Second echo generation: counts handled events and carries the count
/// across swaps and restarts.
#[derive(Default)]
pub struct EchoV2 {
    count: AtomicI64,
}

impl EchoV2 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for EchoV2 {
    fn name(&self) -> &str {
        "echo"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: Event) -> Reply {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        Reply::ok("echo v2", json!({ "count": count, "content": event.content }))
    }

    fn as_exportable(&self) -> Option<&dyn Exportable> {
        Some(self)
    }

    fn as_importable(&self) -> Option<&dyn Importable> {
        Some(self)
    }
}

impl Exportable for EchoV2 {
    fn export_state(&self) -> Payload {
        json!(self.count())
    }
}

impl Importable for EchoV2 {
    fn import_state(&self, state: Payload) -> Result<()> {
        // JSON round trips may hand back a float for an integer count
        let count = state
            .as_i64()
            .or_else(|| state.as_f64().map(|f| f as i64))
            .ok_or_else(|| Error::service(format!("unexpected echo state: {state}")))?;
        self.count.store(count, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeps before replying.
pub struct Slow {
    pub delay: Duration,
}

#[async_trait]
impl Service for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: Event) -> Reply {
        tokio::time::sleep(self.delay).await;
        Reply::ok("done", event.content)
    }
}

/// Forwards each event to the kernel through the bus and relays the reply.
pub struct Relay {
    bus: BusHandle,
}

impl Relay {
    pub fn new(bus: BusHandle) -> Arc<Self> {
        Arc::new(Self { bus })
    }
}

#[async_trait]
impl Service for Relay {
    fn name(&self) -> &str {
        "relay"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: Event) -> Reply {
        let (forward, pending) = Event::to_kernel("relay", event.kind, event.content).with_reply();
        if let Err(e) = self.bus.push(forward).await {
            return Reply::internal(e.to_string());
        }
        pending.wait().await
    }
}
