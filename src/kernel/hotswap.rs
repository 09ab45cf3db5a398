//! Hot-swap: replace a registered service with a new implementation.
//!
//! Sequence:
//! 1. export the old instance's state (if exportable) and seal it with the
//!    caller's crypter
//! 2. stop the old instance if it was running
//! 3. open the sealed state and import it into the new instance (if importable)
//! 4. install the new instance as a fresh `Created` record
//! 5. start it if the old instance had been running
//!
//! The registry lock is released between steps 2 and 4, so routed events
//! see the name as unavailable (404) for the duration of the swap. The
//! kernel's lifecycle lock is held throughout, so no other lifecycle
//! mutation can observe that window.

use std::sync::Arc;

use super::service::{validate_service_name, Service, ServiceState};
use super::Kernel;
use crate::commbus::Payload;
use crate::state::{Crypter, CrypterExt};
use crate::types::{Error, Result};

impl Kernel {
    /// Swap in `service` under its own name, carrying state across with `crypter`.
    ///
    /// A name with no current registration is simply registered. Import
    /// failure leaves the new instance installed but not started and returns
    /// [`Error::StateMigrationFailed`].
    pub async fn replace(&self, service: Arc<dyn Service>, crypter: &dyn Crypter) -> Result<()> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        let name = service.name().to_string();
        validate_service_name(&name)?;

        let (was_running, sealed) = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(&name) {
                Err(_) => (false, None),
                Ok(old) => {
                    let sealed = match old.service.as_exportable() {
                        Some(exporter) => Some(crypter.encrypt(&exporter.export_state())?),
                        None => None,
                    };
                    let was_running = old.state == ServiceState::Running;
                    if was_running {
                        old.service.stop().await?;
                        old.state = ServiceState::Stopped;
                        tracing::info!(service = %name, "old_version_stopped");
                    }
                    (was_running, sealed)
                }
            }
        };

        let migration = match (service.as_importable(), sealed) {
            (Some(importer), Some(blob)) => crypter
                .decrypt::<Payload>(&blob)
                .and_then(|state| importer.import_state(state))
                .map_err(|e| Error::state_migration(&name, e)),
            _ => Ok(()),
        };

        let mut registry = self.registry.write().await;
        registry.install(service.clone());

        if let Err(e) = migration {
            tracing::warn!(service = %name, error = %e, "state_migration_failed");
            return Err(e);
        }
        tracing::info!(service = %name, "new_version_installed");

        if was_running {
            service.start().await?;
            registry.get_mut(&name)?.state = ServiceState::Running;
            tracing::info!(service = %name, "new_version_started");
        }
        Ok(())
    }
}
