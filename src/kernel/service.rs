//! Service capability interface and per-service bookkeeping.
//!
//! State transitions:
//! ```text
//! CREATED → RUNNING ⇄ STOPPED
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::commbus::{Event, Payload, Reply};
use crate::types::{Error, Result};

/// A pluggable unit of behavior managed by the kernel.
///
/// Methods take `&self`: services are shared between the registry and
/// in-flight handler tasks, so mutable state lives behind the service's own
/// locks or atomics.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Services that must be running before this one starts.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn handle(&self, event: Event) -> Reply;

    /// Export capability. `None` means state is not exported on stop,
    /// snapshot, or hot-swap.
    fn as_exportable(&self) -> Option<&dyn Exportable> {
        None
    }

    /// Import capability. `None` means persisted or migrated state is ignored.
    fn as_importable(&self) -> Option<&dyn Importable> {
        None
    }
}

/// Optional capability: produce an owned copy of internal state.
pub trait Exportable: Send + Sync {
    fn export_state(&self) -> Payload;
}

/// Optional capability: restore internal state from an owned copy.
pub trait Importable: Send + Sync {
    fn import_state(&self, state: Payload) -> Result<()>;
}

/// Service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

impl ServiceState {
    /// Check if the service may be started from this state.
    pub fn can_start(self) -> bool {
        matches!(self, ServiceState::Created | ServiceState::Stopped)
    }

    /// Check if the service may be stopped from this state.
    pub fn can_stop(self) -> bool {
        self == ServiceState::Running
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Created => "Created",
            ServiceState::Running => "Running",
            ServiceState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// A service name doubles as its state file name, so it must be a single
/// plain path component.
pub(crate) fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::service("service name cannot be empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::service(format!("invalid service name: {name:?}")));
    }
    Ok(())
}

/// Registry record for one service. Never leaves the registry lock.
pub(crate) struct ServiceMeta {
    pub(crate) service: Arc<dyn Service>,
    pub(crate) state: ServiceState,
    /// Dependencies captured at registration time.
    pub(crate) deps: Vec<String>,
}

impl ServiceMeta {
    pub(crate) fn new(service: Arc<dyn Service>) -> Self {
        let deps = service.dependencies();
        Self {
            service,
            state: ServiceState::Created,
            deps,
        }
    }

    pub(crate) fn info(&self, name: &str) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            state: self.state,
            dependencies: self.deps.clone(),
            exportable: self.service.as_exportable().is_some(),
            importable: self.service.as_importable().is_some(),
        }
    }
}

impl fmt::Debug for ServiceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMeta")
            .field("service", &self.service.name())
            .field("state", &self.state)
            .field("deps", &self.deps)
            .finish()
    }
}

/// Read-only view of a registration, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub state: ServiceState,
    pub dependencies: Vec<String>,
    pub exportable: bool,
    pub importable: bool,
}
