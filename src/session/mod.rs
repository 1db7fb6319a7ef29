//! Register, login, refresh and logout over the credential store.
//!
//! Each refresh-token value moves through `ACTIVE -> {ROTATED, EXPIRED, LOGGED-OUT}`
//! and never comes back. Rotation and expiry detection are a single conditional
//! store operation, so of two requests presenting the same token at most one
//! gets a new pair.

mod password;

use anyhow::anyhow;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::Error;
use crate::store::{
    bounded, CredentialStore, InsertUserOutcome, NewUser, ReplacementToken, RotateOutcome, User,
    DEFAULT_ROLE,
};
use crate::token::keys::SigningKeys;
use crate::token::refresh::{generate_refresh_token, hash_refresh_token};
use crate::token::{AccessIdentity, TokenIssuer, TokenPair};
use crate::utils::normalize_email;

use self::password::{hash_password, verify_dummy, verify_password};

const ROTATION_ATTEMPTS: usize = 3;

/// Successful register/login payload. The user record never carries the password hash.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

pub struct SessionEngine {
    store: Arc<dyn CredentialStore>,
    issuer: TokenIssuer,
}

impl SessionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, keys: Arc<SigningKeys>, config: CoreConfig) -> Self {
        let issuer = TokenIssuer::new(store.clone(), keys, config);
        Self { store, issuer }
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    fn config(&self) -> &CoreConfig {
        self.issuer.config()
    }

    /// Create a password account and open its first session.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateIdentity`] if the email is already registered.
    /// - [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession, Error> {
        let email = normalize_email(email);
        let password_hash = hash_password(password.to_string())
            .await
            .map_err(Error::Internal)?;

        let new_user = NewUser {
            email,
            password_hash: Some(password_hash),
            display_name: display_name.trim().to_string(),
            role: DEFAULT_ROLE.to_string(),
        };
        let outcome = bounded(
            self.config().store_timeout(),
            "insert user",
            self.store.insert_user(new_user),
        )
        .await?;

        let user = match outcome {
            InsertUserOutcome::Created(user) => user,
            InsertUserOutcome::Conflict => {
                debug!("registration rejected: email already registered");
                return Err(Error::DuplicateIdentity);
            }
        };

        let pair = self.issuer.issue_pair(user.id).await?;
        debug!(user_id = %user.id, "user registered");
        Ok(AuthSession {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// Check a password and open a new session.
    ///
    /// Other refresh tokens held by the same user stay valid.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCredential`] if the user is unknown, has no password or the
    ///   password does not match.
    /// - [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, Error> {
        let email = normalize_email(email);
        let credentials = bounded(
            self.config().store_timeout(),
            "find user by email",
            self.store.find_user_by_email(&email),
        )
        .await?;

        let Some(credentials) = credentials else {
            verify_dummy(password.to_string()).await;
            debug!("login rejected: unknown email");
            return Err(Error::InvalidCredential);
        };

        let Some(password_hash) = credentials.password_hash else {
            verify_dummy(password.to_string()).await;
            debug!(user_id = %credentials.user.id, "login rejected: account has no password");
            return Err(Error::InvalidCredential);
        };

        let matches = verify_password(password.to_string(), password_hash)
            .await
            .map_err(Error::Internal)?;
        if !matches {
            debug!(user_id = %credentials.user.id, "login rejected: password mismatch");
            return Err(Error::InvalidCredential);
        }

        let user = credentials.user;
        let pair = self.issuer.issue_pair(user.id).await?;
        debug!(user_id = %user.id, "login succeeded, existing sessions left active");
        Ok(AuthSession {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// Exchange a refresh token for a new pair, revoking the presented token.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidToken`] if the token is unknown or already revoked.
    /// - [`Error::TokenExpired`] if the token was past expiry; it is revoked as well,
    ///   so later attempts get [`Error::InvalidToken`].
    /// - [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        let presented = hash_refresh_token(refresh_token);

        for _ in 0..ROTATION_ATTEMPTS {
            let replacement_token = generate_refresh_token().map_err(Error::Internal)?;
            let replacement = ReplacementToken {
                token_hash: hash_refresh_token(&replacement_token),
                ttl: self.config().refresh_token_ttl(),
            };
            let outcome = bounded(
                self.config().store_timeout(),
                "rotate refresh token",
                self.store.rotate_refresh_token(&presented, replacement),
            )
            .await?;

            match outcome {
                RotateOutcome::Rotated { user_id } => {
                    let access_token = self.issuer.issue_access_token(user_id)?;
                    debug!(%user_id, "refresh token rotated");
                    return Ok(TokenPair {
                        access_token,
                        refresh_token: replacement_token,
                    });
                }
                RotateOutcome::Expired => {
                    warn!("expired refresh token presented, revoked");
                    return Err(Error::TokenExpired);
                }
                RotateOutcome::Invalid => {
                    warn!("unknown or revoked refresh token presented");
                    return Err(Error::InvalidToken);
                }
                RotateOutcome::ReplacementConflict => {
                    debug!("replacement refresh token collided, regenerating");
                }
            }
        }

        Err(Error::Internal(anyhow!(
            "failed to generate unique refresh token"
        )))
    }

    /// Revoke a refresh token. Unknown or already revoked tokens are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), Error> {
        let token_hash = hash_refresh_token(refresh_token);
        let revoked = bounded(
            self.config().store_timeout(),
            "revoke refresh token",
            self.store.revoke_refresh_token(&token_hash),
        )
        .await?;
        debug!(revoked, "logout");
        Ok(())
    }

    /// Stateless access-token check for request middleware.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any rejection.
    pub fn verify_access_token(&self, access_token: &str) -> Result<AccessIdentity, Error> {
        self.issuer.verify_access_token(access_token)
    }

    /// User id from an access token, for callers that need nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any rejection.
    pub fn authenticate(&self, access_token: &str) -> Result<Uuid, Error> {
        Ok(self.verify_access_token(access_token)?.user_id)
    }
}
