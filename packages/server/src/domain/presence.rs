//! Presence types and the presence store port.

use std::{collections::HashMap, fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{PresenceError, UserId};

/// Online/offline status of a logical user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(PresenceError::InvalidStatus(other.to_string())),
        }
    }
}

/// TTL-keyed presence store.
///
/// Records expire after the store's TTL; an absent or expired record means offline.
/// Concurrent writers to the same user are last-write-wins.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// (Re)write the user's record as online with a fresh TTL.
    async fn set_online(&self, user_id: &UserId) -> Result<(), PresenceError>;

    /// Write the user's record as offline with a fresh TTL.
    async fn set_offline(&self, user_id: &UserId) -> Result<(), PresenceError>;

    /// Status of one user. A missing record is `Offline`, never an error.
    async fn get_status(&self, user_id: &UserId) -> Result<PresenceStatus, PresenceError>;

    /// Every unexpired record in the store.
    async fn get_all_statuses(&self) -> Result<HashMap<UserId, PresenceStatus>, PresenceError>;
}
