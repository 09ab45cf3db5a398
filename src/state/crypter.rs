//! Authenticated symmetric encryption of exported service state.
//!
//! Blob layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The key length picks the cipher: 16 bytes AES-128-GCM, 24 bytes
//! AES-192-GCM, 32 bytes AES-256-GCM. Each seal draws a fresh random nonce.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::types::{Error, Result};

/// Nonce length for every supported variant.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Seals and opens opaque byte blobs.
///
/// `open` must fail closed: truncation, tampering, or a wrong key yields
/// [`Error::DecryptionFailed`], never partial plaintext.
#[cfg_attr(test, mockall::automock)]
pub trait Crypter: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// Value-level encryption on top of [`Crypter`]: JSON encode then seal,
/// open then JSON decode.
pub trait CrypterExt: Crypter {
    fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        self.seal(&plaintext)
    }

    fn decrypt<T: DeserializeOwned>(&self, blob: &[u8]) -> Result<T> {
        let plaintext = self.open(blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| Error::DeserializationFailed(e.to_string()))
    }
}

impl<C: Crypter + ?Sized> CrypterExt for C {}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM crypter with the variant chosen by key length.
pub struct AesCrypter {
    cipher: Cipher,
}

impl AesCrypter {
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::InvalidKeyLength(key.len());
        let cipher = match key.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?),
            24 => Cipher::Aes192(Aes192Gcm::new_from_slice(key).map_err(invalid)?),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?),
            n => return Err(Error::InvalidKeyLength(n)),
        };
        Ok(Self { cipher })
    }

    /// Key size in bits.
    pub fn key_bits(&self) -> usize {
        match self.cipher {
            Cipher::Aes128(_) => 128,
            Cipher::Aes192(_) => 192,
            Cipher::Aes256(_) => 256,
        }
    }
}

impl fmt::Debug for AesCrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("AesCrypter")
            .field("key_bits", &self.key_bits())
            .finish()
    }
}

impl Crypter for AesCrypter {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| Error::EncryptionFailed(format!("nonce generation failed: {e}")))?;
        let nonce_ref = Nonce::from_slice(&nonce);

        let sealed = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce_ref, plaintext),
            Cipher::Aes192(c) => c.encrypt(nonce_ref, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce_ref, plaintext),
        }
        .map_err(|e| Error::EncryptionFailed(format!("{e:?}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptionFailed(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);

        match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, sealed),
            Cipher::Aes192(c) => c.decrypt(nonce, sealed),
            Cipher::Aes256(c) => c.decrypt(nonce, sealed),
        }
        .map_err(|_| Error::DecryptionFailed("authentication failed".to_string()))
    }
}
