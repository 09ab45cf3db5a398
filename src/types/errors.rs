//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Dispatch-time failures are not errors:
//! they travel back to the caller as [`crate::commbus::Reply`] codes.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the microkernel.
#[derive(Error, Debug)]
pub enum Error {
    /// A service with this name is already registered.
    #[error("service already registered: {0}")]
    AlreadyRegistered(String),

    /// No service with this name is registered.
    #[error("service not registered: {0}")]
    NotRegistered(String),

    /// Start requested on a service that is already running.
    #[error("service already running: {0}")]
    AlreadyRunning(String),

    /// Stop requested on a service that is already stopped (or never started).
    #[error("service already stopped: {0}")]
    AlreadyStopped(String),

    /// The declared dependency graph contains a cycle through this service.
    #[error("circular dependency at {0}")]
    CircularDependency(String),

    /// A service declares a dependency that is not registered.
    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    /// Persisted state could not be loaded or imported at registration time.
    #[error("state import failed for {service}: {reason}")]
    StateImportFailed { service: String, reason: String },

    /// Exported state could not be persisted.
    #[error("state export failed for {service}: {reason}")]
    StateExportFailed { service: String, reason: String },

    /// State could not be carried from the old to the new instance during a hot-swap.
    #[error("state migration failed for {service}: {reason}")]
    StateMigrationFailed { service: String, reason: String },

    /// Sealing a state blob failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Blob was truncated, tampered with, or sealed under another key.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Plaintext was not a valid encoding of the expected value.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// No persisted state exists for this service.
    #[error("no persisted state for {0}")]
    StateNotFound(String),

    /// Crypter key is not 16, 24 or 32 bytes long.
    #[error("invalid key length {0}: expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),

    /// A service's own start/stop/import logic failed.
    #[error("service error: {0}")]
    Service(String),

    /// The event bus has no consumer left.
    #[error("event bus closed")]
    BusClosed,

    /// The event bus is at capacity (non-blocking push only).
    #[error("event bus full")]
    BusFull,

    /// The dispatch loop has already been started for this kernel.
    #[error("dispatcher already running")]
    DispatcherRunning,

    /// Malformed configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unknown_dependency(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    pub fn state_import(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::StateImportFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn state_export(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::StateExportFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn state_migration(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::StateMigrationFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = Error::unknown_dependency("b", "a");
        assert_eq!(err.to_string(), "service b depends on unknown service a");

        let err = Error::state_migration("echo", "decryption failed: bad tag");
        assert!(err.to_string().contains("echo"));
        assert!(err.to_string().contains("bad tag"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
