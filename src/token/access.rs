//! Stateless access tokens: PASETO `v4.public` with a `{kid}` footer.
//!
//! Verification needs only the verify key set; there is no storage lookup, so
//! request middleware can call [`verify`] on every request.

use pasetors::errors::Error as PasetorsError;
use pasetors::footer::Footer;
use pasetors::token::UntrustedToken;
use pasetors::version4::{PublicToken, V4};
use pasetors::Public;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::keys::SigningKeys;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid footer")]
    InvalidFooter,
    #[error("missing footer")]
    MissingFooter,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported paserk")]
    UnsupportedPaserk,
    #[error("invalid paserk id")]
    InvalidKeyId,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid key type")]
    InvalidKeyType,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid subject")]
    InvalidSubject,
    #[error("invalid issued-at")]
    InvalidIat,
    #[error("invalid expiration")]
    InvalidExp,
    #[error("token expired")]
    Expired,
    #[error("invalid length")]
    InvalidLength,
    #[error("time format error")]
    TimeFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub aud: String,
    /// User id.
    pub sub: String,
    pub iat: String,
    pub exp: String,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AccessTokenFooter {
    kid: String,
}

pub struct VerificationOptions<'a> {
    pub expected_issuer: &'a str,
    pub expected_audience: &'a str,
    pub now_unix_seconds: i64,
}

/// Sign `claims` with the active key.
///
/// # Errors
///
/// Returns an error if JSON encoding or signing fails.
pub fn sign(claims: &AccessTokenClaims, keys: &SigningKeys) -> Result<String, Error> {
    let footer = AccessTokenFooter {
        kid: keys.active_kid().to_string(),
    };
    let payload = serde_json::to_vec(claims)?;
    let footer = serde_json::to_vec(&footer)?;
    PublicToken::sign(keys.secret_key(), &payload, Some(footer.as_slice()), None)
        .map_err(|err| map_paseto_error(&err))
}

/// Verify an access token and return its claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the footer `kid` is not in the verify set,
/// - the signature is invalid,
/// - the claims fail validation (`iss`, `aud`, `iat`, `exp`).
pub fn verify(
    token: &str,
    keys: &SigningKeys,
    options: &VerificationOptions<'_>,
) -> Result<AccessTokenClaims, Error> {
    let untrusted =
        UntrustedToken::<Public, V4>::try_from(token).map_err(|err| map_paseto_error(&err))?;
    let footer_bytes = untrusted.untrusted_footer();
    if footer_bytes.is_empty() {
        return Err(Error::MissingFooter);
    }

    let kid = footer_kid(footer_bytes)?;
    let entry = keys
        .find_by_kid(&kid)
        .ok_or_else(|| Error::UnknownKid(kid.clone()))?;
    let public_key = entry.to_public_key()?;

    let trusted = PublicToken::verify(&public_key, &untrusted, None, None)
        .map_err(|err| map_paseto_error(&err))?;
    let claims: AccessTokenClaims = serde_json::from_str(trusted.payload())?;
    validate_claims(&claims, options)?;
    Ok(claims)
}

/// Convert a unix timestamp to RFC3339.
///
/// # Errors
///
/// Returns an error if formatting fails.
pub fn rfc3339_from_unix(unix_seconds: i64) -> Result<String, Error> {
    let dt = OffsetDateTime::from_unix_timestamp(unix_seconds).map_err(|_| Error::TimeFormat)?;
    dt.format(&Rfc3339).map_err(|_| Error::TimeFormat)
}

/// Parse an RFC3339 timestamp into unix seconds.
///
/// # Errors
///
/// Returns an error if parsing fails.
pub fn unix_from_rfc3339(value: &str) -> Result<i64, Error> {
    let dt = OffsetDateTime::parse(value, &Rfc3339).map_err(|_| Error::TimeFormat)?;
    Ok(dt.unix_timestamp())
}

fn validate_claims(
    claims: &AccessTokenClaims,
    options: &VerificationOptions<'_>,
) -> Result<(), Error> {
    if claims.iss != options.expected_issuer {
        return Err(Error::InvalidIssuer);
    }
    if claims.aud != options.expected_audience {
        return Err(Error::InvalidAudience);
    }
    if claims.sub.is_empty() {
        return Err(Error::InvalidSubject);
    }

    let iat = unix_from_rfc3339(&claims.iat).map_err(|_| Error::InvalidIat)?;
    let exp = unix_from_rfc3339(&claims.exp).map_err(|_| Error::InvalidExp)?;

    if iat > options.now_unix_seconds {
        return Err(Error::InvalidIat);
    }
    if exp <= iat {
        return Err(Error::InvalidExp);
    }
    if exp <= options.now_unix_seconds {
        return Err(Error::Expired);
    }
    Ok(())
}

fn footer_kid(footer_bytes: &[u8]) -> Result<String, Error> {
    let mut footer = Footer::new();
    footer
        .parse_bytes(footer_bytes)
        .map_err(|_| Error::InvalidFooter)?;
    let kid = footer
        .get_claim("kid")
        .and_then(|value| value.as_str())
        .ok_or(Error::InvalidFooter)?;
    Ok(kid.to_string())
}

fn map_paseto_error(err: &PasetorsError) -> Error {
    match err {
        PasetorsError::Base64 => Error::Base64,
        PasetorsError::TokenValidation => Error::InvalidSignature,
        PasetorsError::FooterParsing => Error::InvalidFooter,
        PasetorsError::LossyConversion => Error::InvalidLength,
        PasetorsError::Key => Error::InvalidKeyType,
        _ => Error::TokenFormat,
    }
}
