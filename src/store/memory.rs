//! In-process back-ends for both storage tiers.
//!
//! Every operation runs under a single `tokio::sync::Mutex`, which makes rotation
//! and fetch-and-delete atomic for callers in this process. Ephemeral entries
//! expire passively: reads ignore lapsed entries, but they stay in memory until
//! taken or purged.

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    CredentialStore, EphemeralStore, InsertTokenOutcome, InsertUserOutcome, NewRefreshToken,
    NewUser, RefreshTokenRecord, ReplacementToken, RotateOutcome, StoreFuture, User,
    UserCredentials,
};

struct StoredUser {
    user: User,
    password_hash: Option<String>,
}

#[derive(Default)]
struct Credentials {
    users: HashMap<Uuid, StoredUser>,
    emails: HashMap<String, Uuid>,
    tokens: HashMap<Vec<u8>, RefreshTokenRecord>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Credentials>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users, for tests asserting that no duplicate was created.
    pub async fn user_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    /// Number of refresh-token records for a user, including revoked ones.
    pub async fn token_count(&self, user_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .tokens
            .values()
            .filter(|record| record.user_id == user_id)
            .count()
    }
}

fn expiry_from_ttl(ttl: Duration) -> anyhow::Result<chrono::DateTime<Utc>> {
    let ttl = TimeDelta::from_std(ttl).context("refresh token ttl out of range")?;
    Utc::now()
        .checked_add_signed(ttl)
        .context("refresh token expiry overflow")
}

impl CredentialStore for MemoryCredentialStore {
    fn insert_user<'a>(&'a self, user: NewUser) -> StoreFuture<'a, InsertUserOutcome> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.emails.contains_key(&user.email) {
                return Ok(InsertUserOutcome::Conflict);
            }
            let created = User {
                id: Uuid::now_v7(),
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                created_at: Utc::now(),
            };
            state.emails.insert(created.email.clone(), created.id);
            state.users.insert(
                created.id,
                StoredUser {
                    user: created.clone(),
                    password_hash: user.password_hash,
                },
            );
            Ok(InsertUserOutcome::Created(created))
        })
    }

    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> StoreFuture<'a, Option<UserCredentials>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            Ok(state
                .emails
                .get(email)
                .and_then(|id| state.users.get(id))
                .map(|stored| UserCredentials {
                    user: stored.user.clone(),
                    password_hash: stored.password_hash.clone(),
                }))
        })
    }

    fn insert_refresh_token<'a>(
        &'a self,
        token: NewRefreshToken,
    ) -> StoreFuture<'a, InsertTokenOutcome> {
        Box::pin(async move {
            let expires_at = expiry_from_ttl(token.ttl)?;
            let mut state = self.inner.lock().await;
            if state.tokens.contains_key(&token.token_hash) {
                return Ok(InsertTokenOutcome::Conflict);
            }
            let record = RefreshTokenRecord {
                id: Uuid::now_v7(),
                token_hash: token.token_hash.clone(),
                user_id: token.user_id,
                expires_at,
                revoked: false,
                revoked_at: None,
                replaced_by: None,
                created_at: Utc::now(),
            };
            state.tokens.insert(token.token_hash, record);
            Ok(InsertTokenOutcome::Inserted)
        })
    }

    fn rotate_refresh_token<'a>(
        &'a self,
        presented_hash: &'a [u8],
        replacement: ReplacementToken,
    ) -> StoreFuture<'a, RotateOutcome> {
        Box::pin(async move {
            let expires_at = expiry_from_ttl(replacement.ttl)?;
            let mut state = self.inner.lock().await;
            let now = Utc::now();

            let Some(presented) = state.tokens.get_mut(presented_hash) else {
                return Ok(RotateOutcome::Invalid);
            };
            if presented.revoked {
                return Ok(RotateOutcome::Invalid);
            }
            if now >= presented.expires_at {
                presented.revoked = true;
                presented.revoked_at = Some(now);
                return Ok(RotateOutcome::Expired);
            }
            let user_id = presented.user_id;

            if state.tokens.contains_key(&replacement.token_hash) {
                return Ok(RotateOutcome::ReplacementConflict);
            }

            let replacement_id = Uuid::now_v7();
            state.tokens.insert(
                replacement.token_hash.clone(),
                RefreshTokenRecord {
                    id: replacement_id,
                    token_hash: replacement.token_hash,
                    user_id,
                    expires_at,
                    revoked: false,
                    revoked_at: None,
                    replaced_by: None,
                    created_at: now,
                },
            );
            if let Some(presented) = state.tokens.get_mut(presented_hash) {
                presented.revoked = true;
                presented.revoked_at = Some(now);
                presented.replaced_by = Some(replacement_id);
            }
            Ok(RotateOutcome::Rotated { user_id })
        })
    }

    fn revoke_refresh_token<'a>(&'a self, token_hash: &'a [u8]) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.tokens.get_mut(token_hash) {
                Some(record) if !record.revoked => {
                    record.revoked = true;
                    record.revoked_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn find_refresh_token<'a>(
        &'a self,
        token_hash: &'a [u8],
    ) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
        Box::pin(async move { Ok(self.inner.lock().await.tokens.get(token_hash).cloned()) })
    }
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryEphemeralStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryEphemeralStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held in memory, including lapsed ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    fn put<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = Instant::now()
                .checked_add(ttl)
                .context("ephemeral ttl overflow")?;
            self.entries
                .lock()
                .await
                .insert(key.to_string(), Entry { value, expires_at });
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let now = Instant::now();
            let entries = self.entries.lock().await;
            Ok(entries
                .get(key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.clone()))
        })
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            Ok(entries
                .remove(key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value))
        })
    }

    fn purge_expired<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|key, entry| !key.starts_with(prefix) || entry.is_live(now));
            Ok(u64::try_from(before - entries.len())?)
        })
    }

    fn count_live<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let now = Instant::now();
            let entries = self.entries.lock().await;
            let count = entries
                .iter()
                .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
                .count();
            Ok(u64::try_from(count)?)
        })
    }
}
