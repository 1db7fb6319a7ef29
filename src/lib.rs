//! # Credence
//!
//! Credential lifecycle and identity-federation correlation state.
//!
//! ## Sessions
//!
//! [`session::SessionEngine`] registers users, checks passwords and hands out a
//! pair of credentials:
//!
//! - an **access token**, a short-lived PASETO `v4.public` token verified by
//!   signature and expiry alone, without a storage round trip;
//! - a **refresh token**, an opaque random string stored server-side as a SHA-256
//!   digest and revoked every time it is used.
//!
//! Refreshing rotates the token in one conditional store operation. Whoever
//! presents a given refresh token first gets the new pair; every later attempt
//! with the same value fails, which makes a stolen token visible instead of
//! silently usable.
//!
//! ## Federation state
//!
//! [`federation::StateManager`] keeps the short-lived values an OAuth-style
//! connect flow needs between its outbound redirect and its callback: state ids,
//! PKCE verifiers and scratch data. State ids and verifiers are consumed by an
//! atomic fetch-and-delete, so each can be redeemed at most once.
//!
//! ## Storage
//!
//! Both engines take their stores as trait objects ([`store::CredentialStore`],
//! [`store::EphemeralStore`]). Postgres and in-memory back-ends are provided.

pub mod cli;
pub mod config;
pub mod error;
pub mod federation;
pub mod session;
pub mod store;
pub mod token;

mod utils;

pub use config::CoreConfig;
pub use error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
