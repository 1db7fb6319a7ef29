//! Opaque refresh tokens. The bearer value is random; only its digest is stored.

use crate::utils::{random_urlsafe_token, sha256};

/// Generate a refresh token with 256 bits of entropy.
///
/// # Errors
///
/// Returns an error if the OS generator fails.
pub fn generate_refresh_token() -> anyhow::Result<String> {
    random_urlsafe_token()
}

/// Digest used as the lookup key in the credential store.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    sha256(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_unique_and_hash_deterministically() -> anyhow::Result<()> {
        let first = generate_refresh_token()?;
        let second = generate_refresh_token()?;
        assert_ne!(first, second);
        assert_eq!(hash_refresh_token(&first), hash_refresh_token(&first));
        assert_ne!(hash_refresh_token(&first), hash_refresh_token(&second));
        Ok(())
    }

    #[test]
    fn digest_does_not_contain_the_token() -> anyhow::Result<()> {
        let token = generate_refresh_token()?;
        let digest = hash_refresh_token(&token);
        assert_eq!(digest.len(), 32);
        assert_ne!(digest, token.as_bytes());
        Ok(())
    }
}
