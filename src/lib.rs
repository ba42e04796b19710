//! # Shekel (sessions, email verification and credentials)
//!
//! `shekel` onboards users of the money-transfers service. Every visitor gets an
//! anonymous, cookie-bound session; email ownership is proven with one-time
//! numeric codes; registration creates the user and binds it to the caller's
//! session inside a single database transaction.
//!
//! ## Verification codes
//!
//! Codes are scoped by purpose (`registration` or `recovery`) so the two flows
//! never cross-validate. Only the most recent code for an (email, purpose) pair is
//! consulted.
//!
//! - **Cooldown:** a new code is refused while the previous one is younger than 60 seconds.
//! - **Expiry:** codes are valid for 5 minutes.
//! - **Attempts:** after more than 5 wrong submissions a code is rejected for good.
//!
//! Registration codes are 4 digits; recovery codes are 16 digits because they
//! authorize a password change.
//!
//! ## Failures
//!
//! Every failure is rendered as `{"status": "error", "error": "<message>"}`. Internal
//! errors and timeouts are additionally reported to a chat webhook in the
//! background.

pub mod api;
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
