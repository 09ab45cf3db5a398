//! On-disk persistence of encrypted per-service state.
//!
//! One file per service, `<dir>/<service>.state`, holding the crypter's
//! `nonce || ciphertext` blob. Each write goes to its own temp file, is
//! fsynced, renamed over the target, and the directory is fsynced, so a
//! reader never observes a half-written blob. Writes to the same name are
//! serialized; the last one to take the name's lock wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::crypter::{Crypter, CrypterExt};
use crate::kernel::validate_service_name;
use crate::types::{Error, Result};

const STATE_EXT: &str = "state";

/// Encrypted key-value store keyed by service name.
#[derive(Clone)]
pub struct StateStore {
    dir: PathBuf,
    crypter: Arc<dyn Crypter>,
    write_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore").field("dir", &self.dir).finish()
    }
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, crypter: Arc<dyn Crypter>) -> Self {
        Self {
            dir: dir.into(),
            crypter,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the blob for `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{STATE_EXT}"))
    }

    /// Encode, encrypt and atomically write `value` under `name`.
    pub async fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        validate_service_name(name)?;
        let blob = self.crypter.encrypt(value)?;

        let lock = self.write_lock(name);
        let _writer = lock.lock().await;
        self.ensure_dir().await?;

        let target = self.path(name);
        let tmp = self
            .dir
            .join(format!(".{name}.{}.{STATE_EXT}.tmp", Uuid::new_v4().simple()));
        let written = match write_private(&tmp, &blob).await {
            Ok(()) => tokio::fs::rename(&tmp, &target).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        sync_dir(&self.dir).await?;

        tracing::debug!(service = %name, bytes = blob.len(), "state_saved");
        Ok(())
    }

    /// Read, decrypt and decode the value stored under `name`.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        validate_service_name(name)?;
        let blob = match tokio::fs::read(self.path(name)).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::StateNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.crypter.decrypt(&blob)
    }

    /// Existence check only; the blob is not decrypted.
    pub async fn exists(&self, name: &str) -> bool {
        if validate_service_name(name).is_err() {
            return false;
        }
        tokio::fs::try_exists(self.path(name))
            .await
            .unwrap_or(false)
    }

    /// Delete the entry for `name`. Returns whether one existed.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        validate_service_name(name)?;
        let lock = self.write_lock(name);
        let _writer = lock.lock().await;
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    async fn ensure_dir(&self) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&self.dir).await?;
        Ok(())
    }
}

async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
