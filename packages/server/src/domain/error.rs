//! Domain errors.

use thiserror::Error;

/// Value object validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("user id must not be empty")]
    EmptyUserId,
    #[error("user id is too long ({0} chars)")]
    UserIdTooLong(usize),
}

/// Presence store failure. Never fatal to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error("presence backend error: {0}")]
    Backend(String),
    #[error("presence backend returned an unknown status '{0}'")]
    InvalidStatus(String),
}

/// Profile lookup failure. Rosters are still sent without profile data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile lookup failed: {0}")]
    Lookup(String),
}
