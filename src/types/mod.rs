//! Core types for the microkernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (EventId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for dispatch, snapshots and state storage

mod config;
mod errors;
mod ids;

pub use config::{Config, KernelConfig, ObservabilityConfig, StateConfig};
pub use errors::{Error, Result};
pub use ids::EventId;
