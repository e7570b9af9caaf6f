//! # Nopass (passwordless device-bound login)
//!
//! A mobile number is bound to exactly one device at a time. Registering
//! issues a short numeric challenge; verifying it makes that device the
//! single active device for the number. Relying sites then ask for a login
//! confirmation, which is pushed to the active device, and the user's
//! accept or deny is recorded in a per-device trust ledger that sites can
//! query.
//!
//! Storage is Postgres when a DSN is configured and in-memory otherwise.
//! Push delivery goes through Firebase Cloud Messaging or a logging stub.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
