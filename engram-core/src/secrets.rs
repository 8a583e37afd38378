//! OAuth token vault
//!
//! Provider tokens are encrypted at rest under a key derived from the
//! install's master secret via PBKDF2-HMAC-SHA256 (100 000 iterations,
//! fixed per-install salt). The derived key feeds the same ChaCha20-
//! Poly1305 AEAD used for memory content; plaintext tokens exist only in
//! memory.
//!
//! Refresh is proactive: a token within five minutes of expiry reports
//! `needs_refresh`, the caller performs the provider exchange (HTTP,
//! outside this module) and writes the re-encrypted pair back. Revocation
//! deletes the row regardless of the remote outcome.

use crate::constants::defaults;
use crate::crypto::{EncryptionManager, KEY_LEN};
use crate::error::{Error, Result};
use crate::storage::RelationalStore;
use crate::types::OAuthTokenRecord;
use chrono::{DateTime, Utc};
use hmac::Hmac;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Fixed per-install salt; acceptable because the master secret is unique
/// per install.
const KDF_SALT: &[u8] = b"engram-token-vault-v1";

/// A decrypted token pair, never persisted.
#[derive(Debug, Clone)]
pub struct DecryptedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
    pub scopes: Vec<String>,
}

/// Encrypted-at-rest storage for provider OAuth tokens.
pub struct TokenVault {
    store: Arc<dyn RelationalStore>,
    cipher: EncryptionManager,
}

impl TokenVault {
    /// Derive the vault key from the master secret and build the vault.
    pub fn new(store: Arc<dyn RelationalStore>, master_secret: &str) -> Result<Self> {
        if master_secret.is_empty() {
            return Err(Error::InvalidInput("token master secret must not be empty".into()));
        }
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(
            master_secret.as_bytes(),
            KDF_SALT,
            defaults::TOKEN_KDF_ITERATIONS,
            &mut key,
        )
        .map_err(|_| Error::InvalidInput("token key derivation failed".into()))?;
        Ok(Self { store, cipher: EncryptionManager::from_key(&key)? })
    }

    /// Encrypt and store a token pair for a provider/user.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_tokens(
        &self,
        provider: &str,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        expiry: DateTime<Utc>,
        scopes: Vec<String>,
        email: Option<String>,
    ) -> Result<()> {
        let record = OAuthTokenRecord {
            provider: provider.to_string(),
            user_id,
            access_ciphertext: self.cipher.encrypt_to_base64(access_token)?,
            refresh_ciphertext: self.cipher.encrypt_to_base64(refresh_token)?,
            expiry,
            scopes,
            email,
            last_used_at: None,
        };
        self.store.upsert_token(&record).await?;
        info!(provider, user_id = %user_id, "token pair stored");
        Ok(())
    }

    /// Load and decrypt a token pair.
    pub async fn get_tokens(&self, provider: &str, user_id: Uuid)
        -> Result<Option<DecryptedTokens>> {
        let Some(record) = self.store.get_token(provider, user_id).await? else {
            return Ok(None);
        };
        Ok(Some(DecryptedTokens {
            access_token: self.cipher.decrypt_from_base64(&record.access_ciphertext)?,
            refresh_token: self.cipher.decrypt_from_base64(&record.refresh_ciphertext)?,
            expiry: record.expiry,
            scopes: record.scopes,
        }))
    }

    /// Whether a pair is inside the proactive refresh window.
    #[must_use]
    pub fn needs_refresh(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let buffer = chrono::Duration::from_std(defaults::TOKEN_REFRESH_BUFFER)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        now >= expiry - buffer
    }

    /// Write back a refreshed pair (the exchange itself happens upstream).
    pub async fn apply_refresh(
        &self,
        provider: &str,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        let existing = self
            .store
            .get_token(provider, user_id)
            .await?
            .ok_or(Error::NotFound(user_id))?;

        let record = OAuthTokenRecord {
            access_ciphertext: self.cipher.encrypt_to_base64(access_token)?,
            refresh_ciphertext: self.cipher.encrypt_to_base64(refresh_token)?,
            expiry,
            last_used_at: Some(Utc::now()),
            ..existing
        };
        self.store.upsert_token(&record).await?;
        debug!(provider, user_id = %user_id, "token pair refreshed");
        Ok(())
    }

    /// Delete the row. Remote revocation success is not a precondition.
    pub async fn revoke(&self, provider: &str, user_id: Uuid) -> Result<bool> {
        let removed = self.store.delete_token(provider, user_id).await?;
        info!(provider, user_id = %user_id, removed, "token revoked");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRelationalStore;
    use chrono::Duration;

    fn vault(store: Arc<InMemoryRelationalStore>) -> TokenVault {
        TokenVault::new(store, "master-secret-for-tests").unwrap()
    }

    #[tokio::test]
    async fn tokens_are_ciphertext_at_rest() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let vault = vault(store.clone());
        let user = Uuid::new_v4();

        vault
            .store_tokens(
                "gmail",
                user,
                "access-123",
                "refresh-456",
                Utc::now() + Duration::hours(1),
                vec!["mail.read".to_string()],
                Some("user@example.com".to_string()),
            )
            .await
            .unwrap();

        let record = store.get_token("gmail", user).await.unwrap().unwrap();
        assert!(!record.access_ciphertext.contains("access-123"));
        assert!(!record.refresh_ciphertext.contains("refresh-456"));

        let decrypted = vault.get_tokens("gmail", user).await.unwrap().unwrap();
        assert_eq!(decrypted.access_token, "access-123");
        assert_eq!(decrypted.refresh_token, "refresh-456");
    }

    #[tokio::test]
    async fn same_secret_decrypts_across_vault_instances() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let user = Uuid::new_v4();
        let first = TokenVault::new(store.clone(), "shared-secret").unwrap();
        first
            .store_tokens("gmail", user, "a", "r", Utc::now(), Vec::new(), None)
            .await
            .unwrap();

        // A new vault from the same master secret derives the same key.
        let second = TokenVault::new(store.clone(), "shared-secret").unwrap();
        assert_eq!(second.get_tokens("gmail", user).await.unwrap().unwrap().access_token, "a");

        // A different secret cannot decrypt.
        let wrong = TokenVault::new(store, "different-secret").unwrap();
        assert!(wrong.get_tokens("gmail", user).await.is_err());
    }

    #[test]
    fn refresh_window_is_five_minutes() {
        let now = Utc::now();
        assert!(TokenVault::needs_refresh(now + Duration::minutes(4), now));
        assert!(TokenVault::needs_refresh(now - Duration::minutes(1), now));
        assert!(!TokenVault::needs_refresh(now + Duration::minutes(10), now));
    }

    #[tokio::test]
    async fn refresh_replaces_the_pair() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let vault = vault(store.clone());
        let user = Uuid::new_v4();

        vault
            .store_tokens("gmail", user, "old-a", "old-r", Utc::now(), Vec::new(), None)
            .await
            .unwrap();
        vault
            .apply_refresh("gmail", user, "new-a", "new-r", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let tokens = vault.get_tokens("gmail", user).await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "new-a");
        let record = store.get_token("gmail", user).await.unwrap().unwrap();
        assert!(record.last_used_at.is_some());
    }

    #[tokio::test]
    async fn revoke_deletes_and_is_idempotent() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let vault = vault(store);
        let user = Uuid::new_v4();

        vault
            .store_tokens("gmail", user, "a", "r", Utc::now(), Vec::new(), None)
            .await
            .unwrap();
        assert!(vault.revoke("gmail", user).await.unwrap());
        assert!(!vault.revoke("gmail", user).await.unwrap());
        assert!(vault.get_tokens("gmail", user).await.unwrap().is_none());
    }
}
