//! Argon2id password hashing on the blocking pool.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::warn;

/// Compared against when the account does not exist, so unknown emails cost
/// the same as wrong passwords. Parameters must match `Argon2::default()`.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$Y3JlZGVuY2UtZHVtbXkxNg$ZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1+f4CBgoM";

fn hash_blocking(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

fn verify_blocking(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash a password into a PHC string.
pub(crate) async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .context("password hashing task failed")?
}

/// Check a password against a stored PHC string.
pub(crate) async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
        .await
        .context("password verification task failed")?
}

/// Burn one verification against a throwaway hash. The match result is discarded.
pub(crate) async fn verify_dummy(password: String) {
    match tokio::task::spawn_blocking(move || verify_blocking(&password, DUMMY_HASH)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("dummy password verification failed: {err:#}"),
        Err(err) => warn!("dummy password verification task failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::Params;

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hash = hash_password("Secret123!".to_string()).await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Secret123!".to_string(), hash.clone()).await?);
        assert!(!verify_password("secret123!".to_string(), hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ() -> Result<()> {
        let first = hash_password("Secret123!".to_string()).await?;
        let second = hash_password("Secret123!".to_string()).await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let result = verify_password("Secret123!".to_string(), "not-a-phc".to_string()).await;
        assert!(result.is_err());
    }

    #[test]
    fn dummy_hash_uses_default_parameters() -> Result<()> {
        let parsed = PasswordHash::new(DUMMY_HASH).map_err(|err| anyhow!("{err}"))?;
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        let params = Params::try_from(&parsed).map_err(|err| anyhow!("{err}"))?;
        let defaults = Params::default();
        assert_eq!(params.m_cost(), defaults.m_cost());
        assert_eq!(params.t_cost(), defaults.t_cost());
        assert_eq!(params.p_cost(), defaults.p_cost());
        Ok(())
    }

    #[tokio::test]
    async fn dummy_hash_is_verifiable() -> Result<()> {
        assert!(!verify_password("anything".to_string(), DUMMY_HASH.to_string()).await?);
        verify_dummy("anything".to_string()).await;
        Ok(())
    }
}
