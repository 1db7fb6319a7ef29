//! PKCE (RFC 7636) verifier generation and `S256` challenges.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::utils::random_urlsafe_token;

pub const CHALLENGE_METHOD_S256: &str = "S256";

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// High-entropy verifier kept server-side until the code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeVerifier(String);

impl fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeVerifier(..)")
    }
}

impl CodeVerifier {
    /// 32 random bytes, base64url without padding (43 characters).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS generator fails.
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(random_urlsafe_token()?))
    }

    /// Accept a verifier produced elsewhere if it satisfies RFC 7636 §4.1.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        is_valid_verifier(value).then(|| Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    #[must_use]
    pub fn challenge_s256(&self) -> String {
        code_challenge_s256(&self.0)
    }
}

/// `BASE64URL(SHA256(ASCII(verifier)))`.
#[must_use]
pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// 43 to 128 characters from the unreserved set `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(value: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}
