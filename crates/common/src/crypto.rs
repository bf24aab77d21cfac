//! Symmetric encryption primitives (AES-256-GCM).
//!
//! The secure store encrypts every persisted value with a single
//! pre-provisioned 32-byte key, treated as configuration rather than derived
//! at runtime. Key rotation is a known limitation of this scheme and is not
//! supported here; a rotation would have to re-encrypt every stored entry.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

const ALGORITHM: &str = "AES-256-GCM";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors from the encryption primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be exactly {KEY_LEN} bytes")]
    InvalidKeyLength,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("nonce must be exactly {NONCE_LEN} bytes")]
    InvalidNonce,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

impl ErrorClassification for CryptoError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Critical
    }
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Serializable encrypted payload. Opaque once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub algorithm: String,
}

/// AES-256-GCM encryption service over a pre-provisioned key.
pub struct EncryptionService {
    key: Vec<u8>,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").field("key", &"[REDACTED]").finish()
    }
}

impl EncryptionService {
    /// Create a service from a raw 32-byte key.
    pub fn new(key: Vec<u8>) -> CryptoResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength);
        }
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self { key, cipher })
    }

    /// Generate a random 32-byte symmetric key.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt bytes into an [`EncryptedData`] payload.
    pub fn encrypt(&self, data: &[u8]) -> CryptoResult<EncryptedData> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedData {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Decrypt an [`EncryptedData`] payload back into raw bytes.
    pub fn decrypt(&self, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
        if encrypted.algorithm != ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(encrypted.algorithm.clone()));
        }

        let nonce_array: [u8; NONCE_LEN] =
            encrypted.nonce.as_slice().try_into().map_err(|_| CryptoError::InvalidNonce)?;

        self.cipher
            .decrypt(&Nonce::from(nonce_array), encrypted.ciphertext.as_ref())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Encrypt bytes and encode the payload as a base64 string.
    pub fn encrypt_to_string(&self, data: &[u8]) -> CryptoResult<String> {
        let encrypted = self.encrypt(data)?;
        let serialized =
            serde_json::to_vec(&encrypted).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(BASE64.encode(serialized))
    }

    /// Decode a base64 string and decrypt the contained payload.
    pub fn decrypt_from_string(&self, encrypted_str: &str) -> CryptoResult<Vec<u8>> {
        let decoded =
            BASE64.decode(encrypted_str).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let encrypted: EncryptedData =
            serde_json::from_slice(&decoded).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        self.decrypt(&encrypted)
    }

    /// Short fingerprint of the current key for diagnostics.
    pub fn key_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        let result = hasher.finalize();
        BASE64.encode(&result[..8])
    }

    fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the encryption primitives.
    use super::*;

    #[test]
    fn generated_key_has_correct_length() {
        assert_eq!(EncryptionService::generate_key().len(), 32);
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            EncryptionService::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();

        let plaintext = b"member-id: 4421, diagnosis codes attached";
        let encrypted = service.encrypt(plaintext).unwrap();
        assert_ne!(encrypted.ciphertext, plaintext.to_vec());

        let decrypted = service.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn string_round_trip() {
        let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();

        let encoded = service.encrypt_to_string(b"session tokens").unwrap();
        let decoded = service.decrypt_from_string(&encoded).unwrap();
        assert_eq!(decoded, b"session tokens");
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let alice = EncryptionService::new(EncryptionService::generate_key()).unwrap();
        let mallory = EncryptionService::new(EncryptionService::generate_key()).unwrap();

        let encrypted = alice.encrypt(b"secret").unwrap();
        assert!(matches!(mallory.decrypt(&encrypted), Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();
        let mut encrypted = service.encrypt(b"data").unwrap();
        encrypted.algorithm = "ROT13".to_string();

        assert!(matches!(service.decrypt(&encrypted), Err(CryptoError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn rejects_truncated_nonce() {
        let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();
        let mut encrypted = service.encrypt(b"data").unwrap();
        encrypted.nonce.truncate(4);

        assert!(matches!(service.decrypt(&encrypted), Err(CryptoError::InvalidNonce)));
    }

    #[test]
    fn fingerprint_is_stable_per_key() {
        let key = EncryptionService::generate_key();
        let a = EncryptionService::new(key.clone()).unwrap();
        let b = EncryptionService::new(key).unwrap();
        assert_eq!(a.key_fingerprint(), b.key_fingerprint());
    }
}
