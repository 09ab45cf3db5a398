//! # Microkernel - In-Process Service Orchestrator
//!
//! A registry of pluggable, independently-lifecycled services with:
//! - Dependency-ordered startup and reverse-order shutdown
//! - Asynchronous event routing with single replies and per-event deadlines
//! - Encrypted, file-backed persistence of exportable service state
//! - Hot-swapping a service implementation while migrating its state
//!
//! ## Architecture
//!
//! ```text
//!   push(event) ─→ ┌──────────────┐      ┌─────────────────────────┐
//!                  │   EventBus   │ ───→ │     dispatch loop       │
//!   BusHandle ───→ │  (bounded)   │      │  route → spawn handler  │
//!                  └──────────────┘      │  race reply vs deadline │
//!                                        └───────────┬─────────────┘
//!                                                    │ read lock
//!   register / start / stop / replace ──→ ┌──────────▼──────────┐
//!              (write lock)               │   ServiceRegistry   │
//!                                         └──────────┬──────────┘
//!                                                    │ export / import
//!                                         ┌──────────▼──────────┐
//!                                         │ StateStore + Crypter│
//!                                         └─────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod commbus;
pub mod kernel;
pub mod state;
pub mod types;

// Internal utilities
pub mod observability;

pub use commbus::{BusHandle, Event, Payload, PendingReply, Reply};
pub use kernel::{Exportable, Importable, Kernel, Service, ServiceState};
pub use state::{AesCrypter, Crypter, CrypterExt, StateStore};
pub use types::{Config, Error, Result};
