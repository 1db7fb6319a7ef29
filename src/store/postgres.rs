//! Postgres back-ends for both storage tiers.
//!
//! Refresh-token rotation runs in one transaction driven by a conditional
//! `UPDATE ... RETURNING`; ephemeral fetch-and-delete is a single
//! `DELETE ... RETURNING`. Schema lives in `migrations/`.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    CredentialStore, EphemeralStore, InsertTokenOutcome, InsertUserOutcome, NewRefreshToken,
    NewUser, RefreshTokenRecord, ReplacementToken, RotateOutcome, StoreFuture, User,
    UserCredentials,
};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn ttl_seconds(ttl: Duration) -> Result<i64> {
    i64::try_from(ttl.as_secs()).context("ttl out of range")
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role: row.try_get("role")?,
        created_at: row.try_get("created_at")?,
    })
}

fn refresh_record_from_row(row: &PgRow) -> Result<RefreshTokenRecord, sqlx::Error> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by: row.try_get("replaced_by")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_user_inner(&self, user: NewUser) -> Result<InsertUserOutcome> {
        let query = r"
            INSERT INTO users (email, password_hash, display_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, display_name, role, created_at
        ";
        let result = sqlx::query(query)
            .bind(&user.email)
            .bind(user.password_hash.as_deref())
            .bind(&user.display_name)
            .bind(&user.role)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(row) => Ok(InsertUserOutcome::Created(
                user_from_row(&row).context("failed to decode user row")?,
            )),
            Err(err) if is_unique_violation(&err) => Ok(InsertUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_user_by_email_inner(&self, email: &str) -> Result<Option<UserCredentials>> {
        let query = r"
            SELECT id, email, password_hash, display_name, role, created_at
            FROM users
            WHERE email = $1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(UserCredentials {
            user: user_from_row(&row).context("failed to decode user row")?,
            password_hash: row
                .try_get("password_hash")
                .context("failed to decode password hash")?,
        }))
    }

    async fn insert_refresh_token_inner(&self, token: NewRefreshToken) -> Result<InsertTokenOutcome> {
        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        let result = sqlx::query(query)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(ttl_seconds(token.ttl)?)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertTokenOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertTokenOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert refresh token"),
        }
    }

    async fn rotate_refresh_token_inner(
        &self,
        presented_hash: &[u8],
        replacement: ReplacementToken,
    ) -> Result<RotateOutcome> {
        let ttl = ttl_seconds(replacement.ttl)?;
        let mut tx = self.pool.begin().await.context("begin rotation transaction")?;

        // Row lock + re-check under READ COMMITTED: of two concurrent rotations of
        // the same token, the second sees revoked = TRUE and matches nothing.
        let query = r"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1
              AND revoked = FALSE
              AND expires_at > NOW()
            RETURNING id, user_id
        ";
        let row = sqlx::query(query)
            .bind(presented_hash)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke presented refresh token")?;

        let Some(row) = row else {
            // Nothing matched. An unrevoked row left over here has expired; consume
            // it so it can never be presented again.
            let query = r"
                UPDATE refresh_tokens
                SET revoked = TRUE, revoked_at = NOW()
                WHERE token_hash = $1
                  AND revoked = FALSE
                RETURNING id
            ";
            let expired = sqlx::query(query)
                .bind(presented_hash)
                .fetch_optional(&mut *tx)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to revoke expired refresh token")?;
            tx.commit().await.context("commit rotation transaction")?;
            return Ok(if expired.is_some() {
                RotateOutcome::Expired
            } else {
                RotateOutcome::Invalid
            });
        };

        let presented_id: Uuid = row.try_get("id")?;
        let user_id: Uuid = row.try_get("user_id")?;

        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            RETURNING id
        ";
        let inserted = sqlx::query(query)
            .bind(user_id)
            .bind(&replacement.token_hash)
            .bind(ttl)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await;

        let replacement_id: Uuid = match inserted {
            Ok(row) => row.try_get("id")?,
            Err(err) if is_unique_violation(&err) => {
                let _ = tx.rollback().await;
                return Ok(RotateOutcome::ReplacementConflict);
            }
            Err(err) => return Err(err).context("failed to insert replacement refresh token"),
        };

        let query = "UPDATE refresh_tokens SET replaced_by = $1 WHERE id = $2";
        sqlx::query(query)
            .bind(replacement_id)
            .bind(presented_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to link replacement refresh token")?;

        tx.commit().await.context("commit rotation transaction")?;
        Ok(RotateOutcome::Rotated { user_id })
    }

    async fn revoke_refresh_token_inner(&self, token_hash: &[u8]) -> Result<bool> {
        // Logout is idempotent; it's fine if no rows are updated.
        let query = r"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1
              AND revoked = FALSE
        ";
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_refresh_token_inner(&self, token_hash: &[u8]) -> Result<Option<RefreshTokenRecord>> {
        let query = r"
            SELECT id, token_hash, user_id, expires_at, revoked, revoked_at, replaced_by, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup refresh token")?;
        row.as_ref()
            .map(refresh_record_from_row)
            .transpose()
            .context("failed to decode refresh token row")
    }
}

impl CredentialStore for PgCredentialStore {
    fn insert_user<'a>(&'a self, user: NewUser) -> StoreFuture<'a, InsertUserOutcome> {
        Box::pin(self.insert_user_inner(user))
    }

    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> StoreFuture<'a, Option<UserCredentials>> {
        Box::pin(self.find_user_by_email_inner(email))
    }

    fn insert_refresh_token<'a>(
        &'a self,
        token: NewRefreshToken,
    ) -> StoreFuture<'a, InsertTokenOutcome> {
        Box::pin(self.insert_refresh_token_inner(token))
    }

    fn rotate_refresh_token<'a>(
        &'a self,
        presented_hash: &'a [u8],
        replacement: ReplacementToken,
    ) -> StoreFuture<'a, RotateOutcome> {
        Box::pin(self.rotate_refresh_token_inner(presented_hash, replacement))
    }

    fn revoke_refresh_token<'a>(&'a self, token_hash: &'a [u8]) -> StoreFuture<'a, bool> {
        Box::pin(self.revoke_refresh_token_inner(token_hash))
    }

    fn find_refresh_token<'a>(
        &'a self,
        token_hash: &'a [u8],
    ) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
        Box::pin(self.find_refresh_token_inner(token_hash))
    }
}

/// Ephemeral entries in a table keyed by namespaced string.
///
/// Postgres has no native TTL, so lapsed rows are filtered on read and removed by
/// [`EphemeralStore::purge_expired`] (the `credence sweep` loop).
#[derive(Clone, Debug)]
pub struct PgEphemeralStore {
    pool: PgPool,
}

impl PgEphemeralStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn put_inner(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let query = r"
            INSERT INTO ephemeral_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
        ";
        let ttl_millis = i64::try_from(ttl.as_millis()).context("ttl out of range")?;
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl_millis)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to store ephemeral entry")?;
        Ok(())
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Value>> {
        let query = r"
            SELECT value
            FROM ephemeral_entries
            WHERE key = $1
              AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read ephemeral entry")?;
        row.map(|row| row.try_get("value"))
            .transpose()
            .context("failed to decode ephemeral entry")
    }

    async fn take_inner(&self, key: &str) -> Result<Option<Value>> {
        let query = r"
            DELETE FROM ephemeral_entries
            WHERE key = $1
              AND expires_at > NOW()
            RETURNING value
        ";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to take ephemeral entry")?;
        row.map(|row| row.try_get("value"))
            .transpose()
            .context("failed to decode ephemeral entry")
    }

    async fn purge_expired_inner(&self, prefix: &str) -> Result<u64> {
        let query = r"
            DELETE FROM ephemeral_entries
            WHERE left(key, length($1)) = $1
              AND expires_at <= NOW()
        ";
        let result = sqlx::query(query)
            .bind(prefix)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge expired ephemeral entries")?;
        Ok(result.rows_affected())
    }

    async fn count_live_inner(&self, prefix: &str) -> Result<u64> {
        let query = r"
            SELECT COUNT(*) AS live
            FROM ephemeral_entries
            WHERE left(key, length($1)) = $1
              AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(prefix)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count ephemeral entries")?;
        let live: i64 = row.try_get("live")?;
        u64::try_from(live).context("negative ephemeral entry count")
    }
}

impl EphemeralStore for PgEphemeralStore {
    fn put<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(self.put_inner(key, value, ttl))
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(self.get_inner(key))
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(self.take_inner(key))
    }

    fn purge_expired<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(self.purge_expired_inner(prefix))
    }

    fn count_live<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(self.count_live_inner(prefix))
    }
}
