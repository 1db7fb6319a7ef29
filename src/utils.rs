//! Small helpers for random identifiers, email normalization and digests.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const RANDOM_TOKEN_BYTES: usize = 32;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 32 bytes from the OS generator, base64url without padding (43 characters).
pub(crate) fn random_urlsafe_token() -> Result<String> {
    let mut bytes = [0u8; RANDOM_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

pub(crate) fn sha256(value: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().to_vec()
}
