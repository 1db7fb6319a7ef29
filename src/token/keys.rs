//! Ed25519 signing keys for access tokens, addressed by PASERK id.
//!
//! The active key signs; every key in the verify set (the active one plus any
//! retired ones still inside the access-token lifetime) can verify. Each key is
//! identified by its `k4.pid.*` PASERK id, which travels in the token footer.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::SigningKey;
use pasetors::errors::Error as PasetorsError;
use pasetors::keys::{AsymmetricPublicKey, AsymmetricSecretKey};
use pasetors::paserk::{FormatAsPaserk, Id};
use pasetors::version4::V4;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

use super::access::Error;

pub const SEED_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyEntry {
    pub kid: String,
    pub paserk: String,
}

impl PublicKeyEntry {
    /// Build an entry from raw Ed25519 public key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key bytes are rejected or PASERK formatting fails.
    pub fn from_ed25519_public_key_bytes(public_key: &[u8; 32]) -> Result<Self, Error> {
        let key = AsymmetricPublicKey::<V4>::from(public_key.as_slice())
            .map_err(|_| Error::InvalidKeyType)?;
        Ok(Self {
            kid: format_kid(&key)?,
            paserk: format_paserk(&key)?,
        })
    }

    /// Parse a `k4.public.*` PASERK.
    ///
    /// # Errors
    ///
    /// Returns an error if the PASERK is malformed.
    pub fn from_paserk(paserk: &str) -> Result<Self, Error> {
        let key = public_key_from_paserk(paserk)?;
        Ok(Self {
            kid: format_kid(&key)?,
            paserk: paserk.to_string(),
        })
    }

    /// Convert this entry to a PASETO public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PASERK is invalid.
    pub fn to_public_key(&self) -> Result<AsymmetricPublicKey<V4>, Error> {
        public_key_from_paserk(&self.paserk)
    }
}

pub struct SigningKeys {
    secret_key: AsymmetricSecretKey<V4>,
    active_kid: String,
    verifying: Vec<PublicKeyEntry>,
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("active_kid", &self.active_kid)
            .field("verifying", &self.verifying)
            .finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Derive the active key pair from a 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key pair is rejected or the derived public key
    /// cannot be formatted as PASERK.
    pub fn from_seed(seed: &SecretBox<[u8; SEED_LEN]>) -> Result<Self, Error> {
        let signing_key = SigningKey::from_bytes(seed.expose_secret());
        // PASETO v4 secret keys are the seed followed by the public key.
        let keypair = SecretBox::new(Box::new(signing_key.to_keypair_bytes()));
        let secret_key = AsymmetricSecretKey::<V4>::from(keypair.expose_secret().as_slice())
            .map_err(|err| map_paserk_error(&err))?;
        let active = PublicKeyEntry::from_ed25519_public_key_bytes(
            &signing_key.verifying_key().to_bytes(),
        )?;
        Ok(Self {
            secret_key,
            active_kid: active.kid.clone(),
            verifying: vec![active],
        })
    }

    /// Keep accepting tokens signed by a retired key.
    #[must_use]
    pub fn with_retired_key(mut self, entry: PublicKeyEntry) -> Self {
        if self.find_by_kid(&entry.kid).is_none() {
            self.verifying.push(entry);
        }
        self
    }

    #[must_use]
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    #[must_use]
    pub fn active_public_key(&self) -> Option<&PublicKeyEntry> {
        self.find_by_kid(&self.active_kid)
    }

    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&PublicKeyEntry> {
        self.verifying.iter().find(|entry| entry.kid == kid)
    }

    pub(crate) fn secret_key(&self) -> &AsymmetricSecretKey<V4> {
        &self.secret_key
    }
}

/// Fresh signing seed from the OS generator.
///
/// # Errors
///
/// Returns an error if the OS generator fails.
pub fn generate_seed() -> anyhow::Result<SecretBox<[u8; SEED_LEN]>> {
    let mut seed = Box::new([0u8; SEED_LEN]);
    OsRng.try_fill_bytes(seed.as_mut_slice())?;
    Ok(SecretBox::new(seed))
}

/// Decode a base64url (unpadded) seed as passed on the command line.
///
/// # Errors
///
/// Returns an error if the value is not base64url or not 32 bytes.
pub fn seed_from_base64(encoded: &str) -> Result<SecretBox<[u8; SEED_LEN]>, Error> {
    let mut seed = Box::new([0u8; SEED_LEN]);
    let decoded = Base64UrlUnpadded::decode(encoded.trim(), seed.as_mut_slice())
        .map_err(|_| Error::Base64)?;
    if decoded.len() != SEED_LEN {
        return Err(Error::InvalidKeyLength);
    }
    Ok(SecretBox::new(seed))
}

#[must_use]
pub fn seed_to_base64(seed: &SecretBox<[u8; SEED_LEN]>) -> String {
    Base64UrlUnpadded::encode_string(seed.expose_secret())
}

fn public_key_from_paserk(paserk: &str) -> Result<AsymmetricPublicKey<V4>, Error> {
    AsymmetricPublicKey::<V4>::try_from(paserk).map_err(|err| map_paserk_error(&err))
}

fn format_paserk(key: &AsymmetricPublicKey<V4>) -> Result<String, Error> {
    let mut paserk = String::new();
    key.fmt(&mut paserk).map_err(|_| Error::InvalidKeyType)?;
    Ok(paserk)
}

fn format_kid(key: &AsymmetricPublicKey<V4>) -> Result<String, Error> {
    let id = Id::from(key);
    let mut kid = String::new();
    id.fmt(&mut kid).map_err(|_| Error::InvalidKeyId)?;
    Ok(kid)
}

fn map_paserk_error(err: &PasetorsError) -> Error {
    match err {
        PasetorsError::Base64 => Error::Base64,
        PasetorsError::Key => Error::InvalidKeyType,
        _ => Error::UnsupportedPaserk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(byte: u8) -> SecretBox<[u8; SEED_LEN]> {
        SecretBox::new(Box::new([byte; SEED_LEN]))
    }

    #[test]
    fn paserk_pid_matches_known_vector() -> Result<(), Error> {
        let paserk = "k4.public.cHFyc3R1dnd4eXp7fH1-f4CBgoOEhYaHiImKi4yNjo8";
        let entry = PublicKeyEntry::from_paserk(paserk)?;
        assert_eq!(entry.kid, "k4.pid.9ShR3xc8-qVJ_di0tc9nx0IDIqbatdeM2mqLFBJsKRHs");
        Ok(())
    }

    #[test]
    fn active_kid_is_stable_for_a_seed() -> Result<(), Error> {
        let first = SigningKeys::from_seed(&seed(7))?;
        let second = SigningKeys::from_seed(&seed(7))?;
        let other = SigningKeys::from_seed(&seed(9))?;
        assert_eq!(first.active_kid(), second.active_kid());
        assert_ne!(first.active_kid(), other.active_kid());
        assert!(first.active_kid().starts_with("k4.pid."));
        Ok(())
    }

    #[test]
    fn retired_keys_join_the_verify_set_once() -> Result<(), Error> {
        let retired = SigningKeys::from_seed(&seed(1))?;
        let retired_entry = retired.active_public_key().cloned();
        let Some(retired_entry) = retired_entry else {
            return Err(Error::InvalidKeyType);
        };

        let keys = SigningKeys::from_seed(&seed(2))?
            .with_retired_key(retired_entry.clone())
            .with_retired_key(retired_entry.clone());
        assert_eq!(keys.verifying.len(), 2);
        assert_eq!(keys.find_by_kid(&retired_entry.kid), Some(&retired_entry));
        Ok(())
    }

    #[test]
    fn seed_base64_round_trip_and_length_check() -> Result<(), Error> {
        let encoded = seed_to_base64(&seed(3));
        let decoded = seed_from_base64(&encoded)?;
        assert_eq!(decoded.expose_secret(), &[3u8; SEED_LEN]);

        assert!(matches!(seed_from_base64("c2hvcnQ"), Err(Error::InvalidKeyLength)));
        assert!(matches!(seed_from_base64("not base64!"), Err(Error::Base64)));
        Ok(())
    }

    #[test]
    fn debug_output_hides_signing_key() -> Result<(), Error> {
        let keys = SigningKeys::from_seed(&seed(5))?;
        let debug = format!("{keys:?}");
        assert!(debug.contains("active_kid"));
        assert!(!debug.contains("secret_key"));
        Ok(())
    }
}
