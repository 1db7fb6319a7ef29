//! Token issuance and verification.
//!
//! Two credential kinds with different trust models:
//! - access tokens are stateless PASETO `v4.public` tokens checked by signature
//!   and expiry alone ([`access`]);
//! - refresh tokens are opaque bearer secrets looked up server-side by digest
//!   and revoked on use ([`refresh`]).

pub mod access;
pub mod keys;
pub mod refresh;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::Error;
use crate::store::{bounded, CredentialStore, InsertTokenOutcome, NewRefreshToken};

use self::access::{AccessTokenClaims, VerificationOptions};
use self::keys::SigningKeys;
use self::refresh::{generate_refresh_token, hash_refresh_token};

const REFRESH_TOKEN_ATTEMPTS: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// Identity carried by a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessIdentity {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    store: Arc<dyn CredentialStore>,
    keys: Arc<SigningKeys>,
    config: CoreConfig,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, keys: Arc<SigningKeys>, config: CoreConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &SigningKeys {
        &self.keys
    }

    /// Mint a signed access token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lifetime is out of range or signing fails.
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.access_token_ttl().as_secs())
            .map_err(|_| Error::Internal(anyhow!("access token ttl out of range")))?;
        let claims = AccessTokenClaims {
            iss: self.config.issuer().to_string(),
            aud: self.config.audience().to_string(),
            sub: user_id.to_string(),
            iat: access::rfc3339_from_unix(now).map_err(internal("format iat"))?,
            exp: access::rfc3339_from_unix(now.saturating_add(ttl))
                .map_err(internal("format exp"))?,
            jti: Uuid::new_v4().to_string(),
        };
        access::sign(&claims, &self.keys).map_err(internal("sign access token"))
    }

    /// Mint a refresh token and persist its digest before returning the raw value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the insert fails or times out, and
    /// [`Error::Internal`] if no unique value could be generated.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, Error> {
        for _ in 0..REFRESH_TOKEN_ATTEMPTS {
            let token = generate_refresh_token().map_err(Error::Internal)?;
            let record = NewRefreshToken {
                token_hash: hash_refresh_token(&token),
                user_id,
                ttl: self.config.refresh_token_ttl(),
            };
            let outcome = bounded(
                self.config.store_timeout(),
                "insert refresh token",
                self.store.insert_refresh_token(record),
            )
            .await?;

            match outcome {
                InsertTokenOutcome::Inserted => return Ok(token),
                InsertTokenOutcome::Conflict => {
                    debug!(%user_id, "refresh token digest collision, regenerating");
                }
            }
        }

        Err(Error::Internal(anyhow!(
            "failed to generate unique refresh token"
        )))
    }

    /// Issue a fresh access/refresh pair. The refresh token is durable before
    /// either value is returned.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::issue_refresh_token`] and [`Self::issue_access_token`].
    pub async fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, Error> {
        let refresh_token = self.issue_refresh_token(user_id).await?;
        let access_token = self.issue_access_token(user_id)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Signature and expiry check against the current time. No I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any rejection.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessIdentity, Error> {
        self.verify_access_token_at(token, Utc::now())
    }

    /// Same as [`Self::verify_access_token`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any rejection.
    pub fn verify_access_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessIdentity, Error> {
        let options = VerificationOptions {
            expected_issuer: self.config.issuer(),
            expected_audience: self.config.audience(),
            now_unix_seconds: now.timestamp(),
        };
        let claims = access::verify(token, &self.keys, &options).map_err(|err| {
            debug!("access token rejected: {err}");
            Error::InvalidToken
        })?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| Error::InvalidToken)?;
        let expires_at = access::unix_from_rfc3339(&claims.exp)
            .ok()
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or(Error::InvalidToken)?;

        Ok(AccessIdentity {
            user_id,
            expires_at,
        })
    }
}

fn internal(operation: &'static str) -> impl Fn(access::Error) -> Error {
    move |err| Error::Internal(anyhow!(err).context(operation))
}
