//! At-rest sealing of document blobs.
//!
//! A sealed blob is `MAGIC || nonce || AES-256-GCM ciphertext`. The header lets
//! the reader tell a plaintext object written before encryption was enabled
//! apart from one that was sealed and then damaged.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;

const MAGIC: &[u8] = b"DCS1";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_base64.trim())
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn is_sealed(data: &[u8]) -> bool {
        data.starts_with(MAGIC) && data.len() >= MAGIC.len() + NONCE_LEN
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::Seal)?;

        let mut sealed = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if !Self::is_sealed(sealed) {
            return Err(EncryptionError::NotSealed);
        }

        let (nonce, ciphertext) = sealed[MAGIC.len()..].split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EncryptionError::Tampered)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded): {0}")]
    InvalidKey(String),

    #[error("Sealing failed")]
    Seal,

    #[error("Object was not written sealed")]
    NotSealed,

    #[error("Sealed object failed authentication")]
    Tampered,
}
