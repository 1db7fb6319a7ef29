//! Storage contracts for the durable credential tier and the ephemeral correlation tier.
//!
//! Both tiers are injected as trait objects. Correctness under concurrency is
//! delegated to the atomic primitives each back-end provides:
//!
//! - [`CredentialStore::rotate_refresh_token`] revokes the presented token and
//!   persists its replacement in one conditional operation.
//! - [`EphemeralStore::take`] is a single fetch-and-delete.
//!
//! The engines never emulate either with a read followed by a write.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{future::Future, pin::Pin, time::Duration};
use tracing::error;
use uuid::Uuid;

use crate::error::Error;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

pub const DEFAULT_ROLE: &str = "user";

/// Identity record as returned to callers; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    /// `None` for accounts that only sign in through an identity provider.
    pub password_hash: Option<String>,
    pub display_name: String,
    pub role: String,
}

/// Minimal fields needed to check a password login.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: Option<String>,
}

#[derive(Debug)]
pub enum InsertUserOutcome {
    Created(User),
    Conflict,
}

/// Persisted refresh token. Only the SHA-256 digest of the bearer value is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A token is usable iff it exists, is not revoked and `now < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub ttl: Duration,
}

/// Replacement minted during rotation; the owner is taken from the presented record.
#[derive(Debug, Clone)]
pub struct ReplacementToken {
    pub token_hash: Vec<u8>,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertTokenOutcome {
    Inserted,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Presented token revoked and replacement persisted for `user_id`.
    Rotated { user_id: Uuid },
    /// Presented token was unrevoked but past expiry; it is now revoked.
    Expired,
    /// Unknown or already revoked.
    Invalid,
    /// Replacement digest already exists; nothing was changed.
    ReplacementConflict,
}

/// Durable store for users and refresh tokens.
pub trait CredentialStore: Send + Sync {
    fn insert_user<'a>(&'a self, user: NewUser) -> StoreFuture<'a, InsertUserOutcome>;

    fn find_user_by_email<'a>(&'a self, email: &'a str)
        -> StoreFuture<'a, Option<UserCredentials>>;

    fn insert_refresh_token<'a>(
        &'a self,
        token: NewRefreshToken,
    ) -> StoreFuture<'a, InsertTokenOutcome>;

    /// Atomically revoke `presented_hash` if still valid and persist `replacement`
    /// for the same user. Expired-but-unrevoked tokens are revoked as a side effect.
    fn rotate_refresh_token<'a>(
        &'a self,
        presented_hash: &'a [u8],
        replacement: ReplacementToken,
    ) -> StoreFuture<'a, RotateOutcome>;

    /// Revoke a token if present. Returns whether a live record changed state.
    fn revoke_refresh_token<'a>(&'a self, token_hash: &'a [u8]) -> StoreFuture<'a, bool>;

    fn find_refresh_token<'a>(
        &'a self,
        token_hash: &'a [u8],
    ) -> StoreFuture<'a, Option<RefreshTokenRecord>>;
}

/// Shared key-value store with per-key TTL.
pub trait EphemeralStore: Send + Sync {
    /// Insert or overwrite `key`; the TTL clock starts now.
    fn put<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Read a live entry without consuming it.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Fetch and delete in one operation. Returns `None` if missing or expired.
    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Remove lapsed entries under `prefix`, returning how many were removed.
    fn purge_expired<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64>;

    /// Count unexpired entries under `prefix`.
    fn count_live<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64>;
}

/// Run a store operation under the configured timeout.
///
/// Failures and timeouts both surface as [`Error::StorageUnavailable`]; nothing
/// is retried here.
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T, Error>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!(operation, "store operation failed: {err:#}");
            Err(Error::StorageUnavailable(err.context(operation)))
        }
        Err(_) => {
            error!(operation, ?timeout, "store operation timed out");
            Err(Error::StorageUnavailable(anyhow::anyhow!(
                "{operation} timed out after {timeout:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn record(revoked: bool, expires_at: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::nil(),
            token_hash: vec![1, 2, 3],
            user_id: Uuid::nil(),
            expires_at,
            revoked,
            revoked_at: None,
            replaced_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn refresh_record_validity() {
        let now = Utc::now();
        let later = now + TimeDelta::seconds(60);

        assert!(record(false, later).is_valid_at(now));
        assert!(!record(true, later).is_valid_at(now));
        assert!(!record(false, now).is_valid_at(now));
        assert!(!record(false, later).is_valid_at(later));
    }

    #[tokio::test]
    async fn bounded_maps_errors_to_storage_unavailable() {
        let result: Result<(), Error> = bounded(Duration::from_secs(1), "insert user", async {
            Err(anyhow::anyhow!("connection refused"))
        })
        .await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_maps_timeouts_to_storage_unavailable() {
        let result: Result<(), Error> = bounded(Duration::from_millis(50), "take", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let Err(err) = result else {
            panic!("expected a timeout");
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("take timed out"));
    }

    #[tokio::test]
    async fn bounded_passes_values_through() {
        let result = bounded(Duration::from_secs(1), "count", async { Ok(7_u64) }).await;
        assert!(matches!(result, Ok(7)));
    }
}
