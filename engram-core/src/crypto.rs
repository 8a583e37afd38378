//! Content hashing and authenticated encryption
//!
//! Two primitives back the write path:
//!
//! - **Content hash**: SHA-256 of the UTF-8 content, hex-encoded. Stable and
//!   collision-acceptable for deduplication.
//! - **Symmetric encryption**: ChaCha20-Poly1305 AEAD with a 256-bit key and
//!   a random 96-bit nonce per message. Wire format: `[nonce][ciphertext+tag]`,
//!   with base64 wrapping for text columns.
//!
//! A [`KeyManager`] wraps per-user keys under a master key using the same
//! AEAD, for deployments that isolate tenants cryptographically.
//!
//! Wrong-key or tampered input fails with [`Error::Decryption`]; plaintext is
//! never partially returned.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// ChaCha20-Poly1305 nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// Key length (256 bits).
pub const KEY_LEN: usize = 32;

/// Compute the SHA-256 content hash, hex-encoded.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Authenticated symmetric encryption for memory content.
///
/// Each instance owns one 256-bit key. Every encryption draws a fresh
/// random nonce, so two encryptions of the same plaintext differ.
pub struct EncryptionManager {
    key: [u8; KEY_LEN],
    cipher: ChaCha20Poly1305,
}

impl EncryptionManager {
    /// Create a manager with a freshly generated key.
    #[must_use]
    pub fn generate() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let cipher = ChaCha20Poly1305::new(&key);
        Self { key: key.into(), cipher }
    }

    /// Create a manager from an existing 32-byte key.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| Error::InvalidInput("encryption key must be exactly 32 bytes".into()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        Ok(Self { key, cipher })
    }

    /// Create a manager from a base64-encoded key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_b64)
            .map_err(|e| Error::InvalidInput(format!("invalid base64 key: {e}")))?;
        Self::from_key(&key)
    }

    /// Export the key as base64. Anyone holding this can decrypt all data.
    #[must_use]
    pub fn export_key_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    /// Encrypt plaintext. Returns `[nonce][ciphertext+tag]`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::InvalidInput("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `[nonce][ciphertext+tag]` and verify the authentication tag.
    pub fn decrypt(&self, data: &[u8]) -> Result<String> {
        if data.len() < NONCE_LEN {
            return Err(Error::Decryption);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| Error::Decryption)
    }

    /// Encrypt and base64-wrap for storage in a text column.
    pub fn encrypt_to_base64(&self, plaintext: &str) -> Result<String> {
        Ok(BASE64.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Decrypt from a base64-wrapped ciphertext.
    pub fn decrypt_from_base64(&self, encrypted_b64: &str) -> Result<String> {
        let data = BASE64.decode(encrypted_b64).map_err(|_| Error::Decryption)?;
        self.decrypt(&data)
    }
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        f.debug_struct("EncryptionManager").finish_non_exhaustive()
    }
}

/// Wraps per-user encryption keys under a master key.
pub struct KeyManager {
    master: EncryptionManager,
    user_keys: HashMap<String, EncryptionManager>,
}

impl KeyManager {
    /// Create a key manager over the given master key.
    pub fn new(master_key: &[u8]) -> Result<Self> {
        Ok(Self {
            master: EncryptionManager::from_key(master_key)?,
            user_keys: HashMap::new(),
        })
    }

    /// Get or create the encryption manager for a user.
    pub fn user_manager(&mut self, user_id: &str) -> &EncryptionManager {
        self.user_keys
            .entry(user_id.to_string())
            .or_insert_with(EncryptionManager::generate)
    }

    /// Wrap a raw key under the master key for storage.
    pub fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.master.encrypt(key)
    }

    /// Unwrap a stored key.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        if wrapped.len() < NONCE_LEN {
            return Err(Error::Decryption);
        }
        let (nonce, ciphertext) = wrapped.split_at(NONCE_LEN);
        self.master
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn content_hash_is_stable_sha256_hex() {
        let hash = content_hash("The capital of France is Paris.");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash("The capital of France is Paris."));
        assert_ne!(hash, content_hash("The capital of France is Lyon."));
    }

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let manager = EncryptionManager::generate();
        let plaintext = "sensitive memory content with unicode: héllo ✓";
        let encrypted = manager.encrypt(plaintext.as_bytes()).unwrap();
        assert_eq!(manager.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let manager = EncryptionManager::generate();
        let a = manager.encrypt(b"same plaintext").unwrap();
        let b = manager.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let manager = EncryptionManager::generate();
        let mut encrypted = manager.encrypt(b"payload").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(manager.decrypt(&encrypted), Err(Error::Decryption)));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let a = EncryptionManager::generate();
        let b = EncryptionManager::generate();
        let encrypted = a.encrypt(b"payload").unwrap();
        assert!(matches!(b.decrypt(&encrypted), Err(Error::Decryption)));
    }

    #[test]
    fn base64_roundtrip() {
        let manager = EncryptionManager::generate();
        let wrapped = manager.encrypt_to_base64("text column payload").unwrap();
        assert_eq!(manager.decrypt_from_base64(&wrapped).unwrap(), "text column payload");
    }

    #[test]
    fn key_manager_wraps_and_unwraps() {
        let master = [7u8; KEY_LEN];
        let mut manager = KeyManager::new(&master).unwrap();
        let user_key = manager.user_manager("user-1").export_key_base64();
        let raw = BASE64.decode(&user_key).unwrap();
        let wrapped = manager.wrap_key(&raw).unwrap();
        assert_eq!(manager.unwrap_key(&wrapped).unwrap(), raw);
    }

    proptest! {
        #[test]
        fn roundtrip_holds_for_arbitrary_utf8(s in ".*") {
            let manager = EncryptionManager::generate();
            let encrypted = manager.encrypt(s.as_bytes()).unwrap();
            prop_assert_eq!(manager.decrypt(&encrypted).unwrap(), s);
        }
    }
}
