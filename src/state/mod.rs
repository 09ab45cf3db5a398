//! Encrypted state persistence.
//!
//! - [`Crypter`]: authenticated encryption of opaque blobs (AES-GCM)
//! - [`StateStore`]: one encrypted file per service name
//!
//! Service state crosses these boundaries only as owned JSON values.

pub mod crypter;
mod store;

pub use crypter::{AesCrypter, Crypter, CrypterExt};
pub use store::StateStore;
