//! Service lifecycle management.
//!
//! Every mutation runs under the kernel's lifecycle lock and the registry's
//! write lock, including the service's own `start`/`stop`. A service must
//! therefore not call back into kernel lifecycle operations from inside
//! `start` or `stop`.
//!
//! `start_all`/`stop_all` abort on the first failure and do not roll back:
//! services keep whatever state they reached, observable through
//! [`Kernel::services`].

use std::sync::Arc;

use super::resolver::DependencyResolver;
use super::service::{validate_service_name, Service, ServiceState};
use super::Kernel;
use crate::commbus::Payload;
use crate::types::{Error, Result};

impl Kernel {
    /// Register a service in `Created` state.
    ///
    /// If the store holds state for this name and the service can import,
    /// that state is decrypted and imported first; failure aborts the
    /// registration with [`Error::StateImportFailed`].
    pub async fn register(&self, service: Arc<dyn Service>) -> Result<()> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        let name = service.name().to_string();
        validate_service_name(&name)?;

        let mut registry = self.registry.write().await;
        if registry.contains(&name) {
            return Err(Error::AlreadyRegistered(name));
        }

        if let (Some(store), Some(importer)) = (&self.store, service.as_importable()) {
            if store.exists(&name).await {
                let state: Payload = store
                    .load(&name)
                    .await
                    .map_err(|e| Error::state_import(&name, e))?;
                importer
                    .import_state(state)
                    .map_err(|e| Error::state_import(&name, e))?;
                tracing::info!(service = %name, "state_migrated_from_store");
            }
        }

        registry.insert(service)?;
        tracing::info!(service = %name, "service_registered");
        Ok(())
    }

    /// Remove a service that is not running.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        let mut registry = self.registry.write().await;
        match registry.state(name) {
            None => Err(Error::NotRegistered(name.to_string())),
            Some(ServiceState::Running) => Err(Error::AlreadyRunning(name.to_string())),
            Some(_) => {
                registry.remove(name);
                tracing::info!(service = %name, "service_unregistered");
                Ok(())
            }
        }
    }

    /// Transition `Created`/`Stopped` → `Running`.
    pub async fn start_service(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        let mut registry = self.registry.write().await;
        let meta = registry.get_mut(name)?;

        if !meta.state.can_start() {
            return Err(Error::AlreadyRunning(name.to_string()));
        }

        meta.service.start().await?;
        meta.state = ServiceState::Running;
        tracing::info!(service = %name, "service_started");
        Ok(())
    }

    /// Transition `Running` → `Stopped`.
    ///
    /// Exportable state is persisted before `stop` runs. Persistence is best
    /// effort: a failed save is logged and the stop proceeds.
    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        let mut registry = self.registry.write().await;
        let meta = registry.get_mut(name)?;

        if !meta.state.can_stop() {
            return Err(Error::AlreadyStopped(name.to_string()));
        }

        if let (Some(store), Some(exporter)) = (&self.store, meta.service.as_exportable()) {
            let state = exporter.export_state();
            match store.save(name, &state).await {
                Ok(()) => tracing::info!(service = %name, "state_persisted"),
                Err(e) => {
                    let e = Error::state_export(name, e);
                    tracing::warn!(service = %name, error = %e, "state_persist_failed");
                }
            }
        }

        meta.service.stop().await?;
        meta.state = ServiceState::Stopped;
        tracing::info!(service = %name, "service_stopped");
        Ok(())
    }

    /// Dependency order of the current registrations.
    pub async fn start_order(&self) -> Result<Vec<String>> {
        let graph = self.registry.read().await.dependency_graph();
        DependencyResolver::resolve(&graph)
    }

    /// Start every service, dependencies first.
    pub async fn start_all(&self) -> Result<()> {
        let order = self.start_order().await?;
        tracing::info!(services = ?order, "starting_all_services");
        for name in &order {
            self.start_service(name).await?;
        }
        Ok(())
    }

    /// Stop every service in reverse dependency order.
    ///
    /// Services still in `Created` were never started and are skipped.
    pub async fn stop_all(&self) -> Result<()> {
        let order = self.start_order().await?;
        tracing::info!(services = ?order, "stopping_all_services");
        for name in order.iter().rev() {
            if self.service_state(name).await == Some(ServiceState::Created) {
                tracing::debug!(service = %name, "skip_never_started");
                continue;
            }
            self.stop_service(name).await?;
        }
        Ok(())
    }
}
