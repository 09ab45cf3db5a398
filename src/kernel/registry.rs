//! Service registry - name → (implementation, lifecycle state, dependencies).
//!
//! NOT a separate actor: owned by the Kernel behind one `RwLock` and mutated
//! via `&mut self`. Names are kept ordered so dependency resolution and
//! inspection are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::service::{Service, ServiceInfo, ServiceMeta, ServiceState};
use crate::types::{Error, Result};

/// ServiceRegistry tracks registered services and their lifecycle state.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceMeta>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Insert a fresh `Created` record. Fails if the name is taken.
    pub(crate) fn insert(&mut self, service: Arc<dyn Service>) -> Result<()> {
        let name = service.name().to_string();
        if self.services.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        self.services.insert(name, ServiceMeta::new(service));
        Ok(())
    }

    /// Install `service` over any existing record of the same name.
    /// Returns the displaced record.
    pub(crate) fn install(&mut self, service: Arc<dyn Service>) -> Option<ServiceMeta> {
        let name = service.name().to_string();
        self.services.insert(name, ServiceMeta::new(service))
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<ServiceMeta> {
        self.services.remove(name)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub(crate) fn get(&self, name: &str) -> Option<&ServiceMeta> {
        self.services.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut ServiceMeta> {
        self.services
            .get_mut(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// The service behind `name`, only if it is `Running`.
    pub(crate) fn running(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services
            .get(name)
            .filter(|meta| meta.state == ServiceState::Running)
            .map(|meta| meta.service.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.services.get(name).map(|meta| meta.state)
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Declared dependency edges, in name order.
    pub fn dependency_graph(&self) -> BTreeMap<String, Vec<String>> {
        self.services
            .iter()
            .map(|(name, meta)| (name.clone(), meta.deps.clone()))
            .collect()
    }

    /// Exported state of every running exportable service.
    pub(crate) fn export_running(&self) -> Vec<(String, serde_json::Value)> {
        self.services
            .iter()
            .filter(|(_, meta)| meta.state == ServiceState::Running)
            .filter_map(|(name, meta)| {
                meta.service
                    .as_exportable()
                    .map(|exporter| (name.clone(), exporter.export_state()))
            })
            .collect()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn infos(&self) -> Vec<ServiceInfo> {
        self.services
            .iter()
            .map(|(name, meta)| meta.info(name))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_services: self.services.len(),
            ..RegistryStats::default()
        };
        for meta in self.services.values() {
            match meta.state {
                ServiceState::Created => stats.created += 1,
                ServiceState::Running => stats.running += 1,
                ServiceState::Stopped => stats.stopped += 1,
            }
        }
        stats
    }
}

/// Overall registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub created: usize,
    pub running: usize,
    pub stopped: usize,
}
