//! Engine configuration: token lifetimes, correlation TTLs and store timeouts.

use std::time::Duration;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_STATE_TTL_SECONDS: u64 = 600;
const DEFAULT_VERIFIER_TTL_SECONDS: u64 = 600;
const DEFAULT_TEMP_DATA_TTL_SECONDS: u64 = 600;
const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_ISSUER: &str = "credence";
const DEFAULT_AUDIENCE: &str = "credence-api";

#[derive(Clone, Debug)]
pub struct CoreConfig {
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    issuer: String,
    audience: String,
    state_ttl: Duration,
    verifier_ttl: Duration,
    temp_data_ttl: Duration,
    store_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECONDS),
            verifier_ttl: Duration::from_secs(DEFAULT_VERIFIER_TTL_SECONDS),
            temp_data_ttl: Duration::from_secs(DEFAULT_TEMP_DATA_TTL_SECONDS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_verifier_ttl(mut self, ttl: Duration) -> Self {
        self.verifier_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_temp_data_ttl(mut self, ttl: Duration) -> Self {
        self.temp_data_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    #[must_use]
    pub fn verifier_ttl(&self) -> Duration {
        self.verifier_ttl
    }

    #[must_use]
    pub fn temp_data_ttl(&self) -> Duration {
        self.temp_data_ttl
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}
