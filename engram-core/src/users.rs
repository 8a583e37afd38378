//! User accounts
//!
//! Users are created explicitly and soft-deactivated, never deleted.
//! Passwords are hashed with PBKDF2-HMAC-SHA256 and a random per-user
//! salt; the stored form is `pbkdf2-sha256$<iterations>$<salt>$<hash>`
//! (both parts base64). Token formats and session handling live at the
//! transport boundary, outside this crate.

use crate::constants::defaults;
use crate::error::{Error, Result};
use crate::storage::RelationalStore;
use crate::types::{UserAccount, UserRole};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::OsRng;
use chrono::Utc;
use hmac::Hmac;
use sha2::Sha256;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Account management over the relational store.
pub struct UserService {
    store: Arc<dyn RelationalStore>,
}

impl UserService {
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Create a user with a freshly hashed password.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<Uuid> {
        if username.trim().is_empty() || email.trim().is_empty() {
            return Err(Error::InvalidInput("username and email are required".into()));
        }
        if password.len() < 8 {
            return Err(Error::InvalidInput("password must be at least 8 characters".into()));
        }

        let now = Utc::now();
        let user = UserAccount {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            role,
            password_hash: hash_password(password)?,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user).await?;
        info!(user_id = %user.user_id, username, "user created");
        Ok(user.user_id)
    }

    /// Check a password against the stored hash.
    pub async fn verify_password(&self, user_id: Uuid, password: &str) -> Result<bool> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(false);
        };
        if !user.is_active {
            return Ok(false);
        }
        verify_password_hash(password, &user.password_hash)
    }

    /// Soft-deactivate an account; its data remains.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<()> {
        self.store.set_user_active(user_id, false).await?;
        info!(user_id = %user_id, "user deactivated");
        Ok(())
    }

    /// Re-activate an account.
    pub async fn reactivate(&self, user_id: Uuid) -> Result<()> {
        self.store.set_user_active(user_id, true).await
    }
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let hash = derive(password, &salt)?;
    Ok(format!(
        "{HASH_SCHEME}${}${}${}",
        defaults::TOKEN_KDF_ITERATIONS,
        BASE64.encode(salt),
        BASE64.encode(hash),
    ))
}

/// Verify a password against a stored `pbkdf2-sha256$...` hash.
pub fn verify_password_hash(password: &str, stored: &str) -> Result<bool> {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 4 || parts[0] != HASH_SCHEME {
        return Err(Error::InvalidInput("unrecognized password hash format".into()));
    }
    let salt = BASE64
        .decode(parts[2])
        .map_err(|_| Error::InvalidInput("malformed password salt".into()))?;
    let expected = BASE64
        .decode(parts[3])
        .map_err(|_| Error::InvalidInput("malformed password hash".into()))?;

    let actual = derive(password, &salt)?;
    // Constant-time comparison; length mismatch is an immediate reject.
    if actual.len() != expected.len() {
        return Ok(false);
    }
    let mut diff = 0u8;
    for (a, b) in actual.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    Ok(diff == 0)
}

fn derive(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN]> {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(
        password.as_bytes(),
        salt,
        defaults::TOKEN_KDF_ITERATIONS,
        &mut out,
    )
    .map_err(|_| Error::InvalidInput("password hashing failed".into()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRelationalStore;

    #[test]
    fn hash_verifies_and_salts_are_unique() {
        let first = hash_password("correct horse battery").unwrap();
        let second = hash_password("correct horse battery").unwrap();
        assert_ne!(first, second);
        assert!(verify_password_hash("correct horse battery", &first).unwrap());
        assert!(!verify_password_hash("wrong password!", &first).unwrap());
    }

    #[test]
    fn malformed_hash_is_rejected() {
        assert!(verify_password_hash("x", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn register_then_verify() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let users = UserService::new(store);

        let id = users
            .register("sam", "sam@example.com", "hunter2hunter2", UserRole::Member)
            .await
            .unwrap();
        assert!(users.verify_password(id, "hunter2hunter2").await.unwrap());
        assert!(!users.verify_password(id, "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn deactivated_users_cannot_authenticate() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let users = UserService::new(store.clone());

        let id = users
            .register("sam", "sam@example.com", "hunter2hunter2", UserRole::Member)
            .await
            .unwrap();
        users.deactivate(id).await.unwrap();
        assert!(!users.verify_password(id, "hunter2hunter2").await.unwrap());

        // The row survives deactivation.
        assert!(store.get_user(id).await.unwrap().is_some());

        users.reactivate(id).await.unwrap();
        assert!(users.verify_password(id, "hunter2hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn weak_passwords_are_rejected() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let users = UserService::new(store);
        let result = users.register("sam", "sam@example.com", "short", UserRole::Member).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
