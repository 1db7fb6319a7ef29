//! One-time correlation state for identity-provider handshakes.
//!
//! Three namespaces in the ephemeral store, each with its own TTL:
//!
//! - `state:{id}` binds an outbound redirect to the flow that started it and is
//!   consumed by the first successful [`StateManager::verify_state`].
//! - `verifier:{id}` holds the PKCE code verifier and is consumed by the first
//!   successful [`StateManager::get_code_verifier`].
//! - `temp:{key}` is scratch storage. Reads do not delete it; it lives until its
//!   TTL lapses.

pub mod pkce;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::Error;
use crate::store::{bounded, EphemeralStore};
use crate::utils::random_urlsafe_token;

use self::pkce::{CodeVerifier, CHALLENGE_METHOD_S256};

pub const STATE_PREFIX: &str = "state:";
pub const VERIFIER_PREFIX: &str = "verifier:";
pub const TEMP_PREFIX: &str = "temp:";

/// What a state id resolves to on the callback leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub user_id: Uuid,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStats {
    pub active_states: u64,
    pub active_verifiers: u64,
    pub temp_data_count: u64,
}

/// Values for the outbound authorization redirect.
#[derive(Debug, Clone)]
pub struct PkceStart {
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: &'static str,
    pub code_verifier: CodeVerifier,
}

/// Everything the callback leg needs for the code exchange.
#[derive(Debug, Clone)]
pub struct PkceCallback {
    pub payload: StatePayload,
    pub code_verifier: CodeVerifier,
}

pub struct StateManager {
    store: Arc<dyn EphemeralStore>,
    config: CoreConfig,
}

impl StateManager {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Start a flow for `user_id` with `provider`, returning the state id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the entry cannot be written.
    pub async fn create_state(&self, user_id: Uuid, provider: &str) -> Result<String, Error> {
        let state_id = random_urlsafe_token().map_err(Error::Internal)?;
        let payload = StatePayload {
            user_id,
            provider: provider.to_string(),
            created_at: Utc::now(),
        };
        let value = to_value(&payload)?;
        self.put(state_key(&state_id), value, self.config.state_ttl(), "store state")
            .await?;
        debug!(%user_id, provider, "federation state created");
        Ok(state_id)
    }

    /// Consume a state id. `None` if it is unknown, expired or already used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn verify_state(&self, state_id: &str) -> Result<Option<StatePayload>, Error> {
        let key = state_key(state_id);
        let value = bounded(
            self.config.store_timeout(),
            "take state",
            self.store.take(&key),
        )
        .await?;

        let Some(value) = value else {
            debug!("federation state not found or already consumed");
            return Ok(None);
        };
        let payload: StatePayload = from_value(value)?;
        debug!(user_id = %payload.user_id, provider = %payload.provider, "federation state verified");
        Ok(Some(payload))
    }

    /// [`Self::verify_state`] for callers that want a typed failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateNotFound`] if the state is missing, expired or consumed.
    pub async fn require_state(&self, state_id: &str) -> Result<StatePayload, Error> {
        self.verify_state(state_id)
            .await?
            .ok_or(Error::StateNotFound)
    }

    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the entry cannot be written.
    pub async fn store_code_verifier(&self, state_id: &str, verifier: &str) -> Result<(), Error> {
        self.put(
            verifier_key(state_id),
            Value::String(verifier.to_string()),
            self.config.verifier_ttl(),
            "store code verifier",
        )
        .await
    }

    /// Consume the verifier stored under `state_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn get_code_verifier(&self, state_id: &str) -> Result<Option<String>, Error> {
        let key = verifier_key(state_id);
        let value = bounded(
            self.config.store_timeout(),
            "take code verifier",
            self.store.take(&key),
        )
        .await?;
        value.map(from_value).transpose()
    }

    /// Store scratch data under `temp:{key}`; `ttl` defaults to the configured temp TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `data` cannot be serialized and
    /// [`Error::StorageUnavailable`] if the entry cannot be written.
    pub async fn store_temp_data<T>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let value = to_value(data)?;
        let ttl = ttl.unwrap_or_else(|| self.config.temp_data_ttl());
        self.put(temp_key(key), value, ttl, "store temp data").await
    }

    /// Read scratch data without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the stored value does not decode as `T` and
    /// [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn get_temp_data<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        let key = temp_key(key);
        let value = bounded(
            self.config.store_timeout(),
            "get temp data",
            self.store.get(&key),
        )
        .await?;
        value.map(from_value).transpose()
    }

    /// Remove lapsed entries in all three namespaces. Only useful for back-ends
    /// that expire on read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn cleanup(&self) -> Result<u64, Error> {
        let mut removed = 0;
        for prefix in [STATE_PREFIX, VERIFIER_PREFIX, TEMP_PREFIX] {
            removed += bounded(
                self.config.store_timeout(),
                "purge expired entries",
                self.store.purge_expired(prefix),
            )
            .await?;
        }
        if removed > 0 {
            info!(removed, "expired federation entries removed");
        }
        Ok(removed)
    }

    /// Live entry counts. No side effects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] on store failure or timeout.
    pub async fn stats(&self) -> Result<StateStats, Error> {
        Ok(StateStats {
            active_states: self.count(STATE_PREFIX).await?,
            active_verifiers: self.count(VERIFIER_PREFIX).await?,
            temp_data_count: self.count(TEMP_PREFIX).await?,
        })
    }

    /// Create a state and a PKCE verifier under the same id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if either entry cannot be written.
    pub async fn begin_pkce(&self, user_id: Uuid, provider: &str) -> Result<PkceStart, Error> {
        let code_verifier = CodeVerifier::generate().map_err(Error::Internal)?;
        let state = self.create_state(user_id, provider).await?;
        self.store_code_verifier(&state, code_verifier.as_str())
            .await?;
        Ok(PkceStart {
            code_challenge: code_verifier.challenge_s256(),
            code_challenge_method: CHALLENGE_METHOD_S256,
            state,
            code_verifier,
        })
    }

    /// Consume both the state and its verifier for the code exchange.
    ///
    /// Both entries are taken before either is checked, so a failed callback
    /// leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateNotFound`] if either entry is missing, expired or consumed.
    pub async fn complete_pkce(&self, state_id: &str) -> Result<PkceCallback, Error> {
        let (payload, verifier) = tokio::join!(
            self.verify_state(state_id),
            self.get_code_verifier(state_id)
        );
        let payload = payload?.ok_or(Error::StateNotFound)?;
        let code_verifier = verifier?
            .and_then(|verifier| CodeVerifier::parse(&verifier))
            .ok_or(Error::StateNotFound)?;
        Ok(PkceCallback {
            payload,
            code_verifier,
        })
    }

    async fn put(
        &self,
        key: String,
        value: Value,
        ttl: Duration,
        operation: &'static str,
    ) -> Result<(), Error> {
        bounded(
            self.config.store_timeout(),
            operation,
            self.store.put(&key, value, ttl),
        )
        .await
    }

    async fn count(&self, prefix: &str) -> Result<u64, Error> {
        bounded(
            self.config.store_timeout(),
            "count live entries",
            self.store.count_live(prefix),
        )
        .await
    }
}

fn state_key(state_id: &str) -> String {
    format!("{STATE_PREFIX}{state_id}")
}

fn verifier_key(state_id: &str) -> String {
    format!("{VERIFIER_PREFIX}{state_id}")
}

fn temp_key(key: &str) -> String {
    format!("{TEMP_PREFIX}{key}")
}

fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value, Error> {
    serde_json::to_value(data)
        .context("failed to encode ephemeral entry")
        .map_err(Error::Internal)
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value)
        .context("failed to decode ephemeral entry")
        .map_err(Error::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryEphemeralStore;
    use serde_json::json;

    fn manager() -> (Arc<MemoryEphemeralStore>, StateManager) {
        let store = Arc::new(MemoryEphemeralStore::new());
        let manager = StateManager::new(store.clone(), CoreConfig::new());
        (store, manager)
    }

    #[tokio::test]
    async fn state_ids_are_long_and_unique() -> Result<(), Error> {
        let (_, manager) = manager();
        let user_id = Uuid::new_v4();
        let first = manager.create_state(user_id, "instagram").await?;
        let second = manager.create_state(user_id, "instagram").await?;
        assert!(first.len() >= 32);
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn state_payload_uses_camel_case() -> Result<(), Error> {
        let (store, manager) = manager();
        let user_id = Uuid::new_v4();
        let state = manager.create_state(user_id, "tiktok").await?;
        let stored = store
            .get(&state_key(&state))
            .await
            .map_err(Error::StorageUnavailable)?;
        let Some(stored) = stored else {
            panic!("state was not stored");
        };
        assert_eq!(stored["userId"], json!(user_id));
        assert_eq!(stored["provider"], json!("tiktok"));
        assert!(stored.get("createdAt").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() -> Result<(), Error> {
        let (_, manager) = manager();
        let state = manager.create_state(Uuid::new_v4(), "youtube").await?;
        manager.store_code_verifier(&state, "verifier-value").await?;
        manager.store_temp_data(&state, "scratch", None).await?;

        assert!(manager.verify_state(&state).await?.is_some());
        assert_eq!(
            manager.get_code_verifier(&state).await?.as_deref(),
            Some("verifier-value")
        );
        assert_eq!(
            manager.get_temp_data::<String>(&state).await?.as_deref(),
            Some("scratch")
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_state_is_none_or_typed_failure() -> Result<(), Error> {
        let (_, manager) = manager();
        assert!(manager.verify_state("never-issued").await?.is_none());
        assert!(manager.get_code_verifier("never-issued").await?.is_none());
        assert!(matches!(
            manager.require_state("never-issued").await,
            Err(Error::StateNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_live_entries_without_consuming() -> Result<(), Error> {
        let (_, manager) = manager();
        let state = manager.create_state(Uuid::new_v4(), "gmail").await?;
        manager.store_code_verifier(&state, "v").await?;
        manager.store_temp_data("a", &json!({"step": 1}), None).await?;
        manager.store_temp_data("b", &json!({"step": 2}), None).await?;

        let expected = StateStats {
            active_states: 1,
            active_verifiers: 1,
            temp_data_count: 2,
        };
        assert_eq!(manager.stats().await?, expected);
        assert_eq!(manager.stats().await?, expected);
        Ok(())
    }

    #[tokio::test]
    async fn stats_serialize_in_camel_case() -> Result<(), Error> {
        let (_, manager) = manager();
        let stats = serde_json::to_value(manager.stats().await?)
            .map_err(|err| Error::Internal(err.into()))?;
        assert_eq!(
            stats,
            json!({"activeStates": 0, "activeVerifiers": 0, "tempDataCount": 0})
        );
        Ok(())
    }

    #[tokio::test]
    async fn temp_data_type_mismatch_is_internal() -> Result<(), Error> {
        let (_, manager) = manager();
        manager.store_temp_data("k", "text", None).await?;
        let result = manager.get_temp_data::<u32>("k").await;
        assert!(matches!(result, Err(Error::Internal(_))));
        Ok(())
    }

    #[tokio::test]
    async fn pkce_round_trip() -> Result<(), Error> {
        let (_, manager) = manager();
        let user_id = Uuid::new_v4();
        let start = manager.begin_pkce(user_id, "twitter").await?;
        assert_eq!(start.code_challenge_method, "S256");
        assert_eq!(
            start.code_challenge,
            pkce::code_challenge_s256(start.code_verifier.as_str())
        );

        let callback = manager.complete_pkce(&start.state).await?;
        assert_eq!(callback.payload.user_id, user_id);
        assert_eq!(callback.payload.provider, "twitter");
        assert_eq!(callback.code_verifier, start.code_verifier);

        assert!(matches!(
            manager.complete_pkce(&start.state).await,
            Err(Error::StateNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn pkce_with_consumed_state_still_takes_verifier() -> Result<(), Error> {
        let (_, manager) = manager();
        let start = manager.begin_pkce(Uuid::new_v4(), "twitter").await?;
        assert!(manager.verify_state(&start.state).await?.is_some());

        assert!(matches!(
            manager.complete_pkce(&start.state).await,
            Err(Error::StateNotFound)
        ));
        assert_eq!(manager.stats().await?, StateStats::default());
        assert!(manager.get_code_verifier(&start.state).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn pkce_without_verifier_fails() -> Result<(), Error> {
        let (_, manager) = manager();
        let state = manager.create_state(Uuid::new_v4(), "twitter").await?;
        assert!(matches!(
            manager.complete_pkce(&state).await,
            Err(Error::StateNotFound)
        ));
        Ok(())
    }
}
