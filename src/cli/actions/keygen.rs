use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::token::keys::{generate_seed, seed_from_base64, seed_to_base64, SigningKeys};

#[derive(Debug)]
pub struct Args {
    pub signing_seed: Option<SecretString>,
}

/// Printed to stdout. `seed` is only present for freshly generated keys.
#[derive(Debug, Serialize)]
pub struct KeyDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub kid: String,
    pub paserk: String,
}

/// # Errors
/// Returns an error if the seed is malformed or key derivation fails.
pub fn describe(args: &Args) -> Result<KeyDescription> {
    let (seed, generated) = match &args.signing_seed {
        Some(encoded) => (
            seed_from_base64(encoded.expose_secret()).context("invalid signing seed")?,
            false,
        ),
        None => (generate_seed()?, true),
    };

    let keys = SigningKeys::from_seed(&seed).context("failed to derive signing key")?;
    let public = keys
        .active_public_key()
        .context("active key missing from verify set")?;

    Ok(KeyDescription {
        seed: generated.then(|| seed_to_base64(&seed)),
        kid: public.kid.clone(),
        paserk: public.paserk.clone(),
    })
}

/// # Errors
/// Returns an error if the key cannot be described or serialized.
pub fn execute(args: &Args) -> Result<()> {
    let description = describe(args)?;
    let json = serde_json::to_string_pretty(&description)?;
    println!("{json}");
    Ok(())
}
