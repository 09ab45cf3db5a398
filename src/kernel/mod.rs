//! Kernel - the microkernel orchestrator.
//!
//! The Kernel owns the service registry, the shared event inbox and the
//! optional state store. It is an explicit instance: services that need to
//! talk to it receive a [`BusHandle`] at construction.
//!
//! Subsystems are split by concern:
//! - `lifecycle`: register / start / stop, singly and in dependency order
//! - `dispatch`: the routing loop, `push` and the direct `send` path
//! - `hotswap`: replacing a service while migrating its encrypted state
//! - `snapshot`: periodic best-effort persistence of running services

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commbus::{BusHandle, BusStats, EventBus};
use crate::state::{Crypter, StateStore};
use crate::types::{Config, KernelConfig, Result};

mod dispatch;
mod hotswap;
mod lifecycle;
mod registry;
mod resolver;
mod service;
mod snapshot;

pub(crate) use registry::ServiceRegistry;
pub use registry::RegistryStats;
pub use resolver::DependencyResolver;
pub use service::{Exportable, Importable, Service, ServiceInfo, ServiceState};
pub(crate) use service::validate_service_name;
pub use snapshot::{SnapshotReport, SnapshotStats};

/// The microkernel.
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    registry: RwLock<ServiceRegistry>,
    bus: EventBus,
    store: Option<StateStore>,
    /// Serializes register/unregister/start/stop/replace end to end.
    /// `replace` drops the registry lock mid-swap, so this is what keeps
    /// other mutations from touching a half-swapped record.
    lifecycle_lock: Mutex<()>,
    snapshots: Mutex<SnapshotStats>,
}

impl Kernel {
    /// Kernel without persisted state.
    pub fn new(config: KernelConfig) -> Self {
        Self::build(config, None)
    }

    /// Kernel that imports persisted state at registration and persists
    /// exportable state on stop.
    pub fn with_store(config: KernelConfig, store: StateStore) -> Self {
        Self::build(config, Some(store))
    }

    /// Kernel from a full configuration; a store is created when `state.dir` is set.
    pub fn from_config(config: &Config, crypter: Arc<dyn Crypter>) -> Self {
        let store = config
            .state
            .dir
            .as_ref()
            .map(|dir| StateStore::new(dir.clone(), crypter));
        Self::build(config.kernel.clone(), store)
    }

    fn build(config: KernelConfig, store: Option<StateStore>) -> Self {
        Self {
            bus: EventBus::new(config.event_queue_capacity),
            registry: RwLock::new(ServiceRegistry::new()),
            store,
            lifecycle_lock: Mutex::new(()),
            snapshots: Mutex::new(SnapshotStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&StateStore> {
        self.store.as_ref()
    }

    /// Producer handle for the shared inbox.
    pub fn bus_handle(&self) -> BusHandle {
        self.bus.handle()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub async fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.registry.read().await.state(name)
    }

    pub async fn services(&self) -> Vec<ServiceInfo> {
        self.registry.read().await.infos()
    }

    pub async fn registry_stats(&self) -> RegistryStats {
        self.registry.read().await.stats()
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    pub async fn snapshot_stats(&self) -> SnapshotStats {
        self.snapshots.lock().await.clone()
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Start the dispatch loop and, when a snapshot interval and a store are
    /// configured, the snapshot task. Both stop when `cancel` fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Result<KernelTasks> {
        let rx = self.bus.take_receiver()?;

        let kernel = Arc::clone(self);
        let token = cancel.clone();
        let dispatcher = tokio::spawn(async move { kernel.dispatch_loop(rx, token).await });

        let snapshot = match (self.config.snapshot_interval, &self.store) {
            (Some(period), Some(_)) => {
                let kernel = Arc::clone(self);
                Some(tokio::spawn(async move {
                    kernel.snapshot_loop(period, cancel).await
                }))
            }
            _ => None,
        };

        Ok(KernelTasks {
            dispatcher,
            snapshot,
        })
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

/// Join handles for the kernel's background tasks.
#[derive(Debug)]
pub struct KernelTasks {
    pub dispatcher: JoinHandle<()>,
    pub snapshot: Option<JoinHandle<()>>,
}

impl KernelTasks {
    /// Wait for every task to finish (after the cancellation token fired).
    pub async fn join(self) {
        if let Err(e) = self.dispatcher.await {
            tracing::error!("dispatcher_task_failed: {}", e);
        }
        if let Some(snapshot) = self.snapshot {
            if let Err(e) = snapshot.await {
                tracing::error!("snapshot_task_failed: {}", e);
            }
        }
    }
}
