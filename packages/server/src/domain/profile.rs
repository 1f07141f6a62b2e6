//! User profiles and the profile lookup port.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ProfileError, UserId};

/// Public profile metadata attached to roster snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub about: String,
}

/// External profile lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Profiles for the given users. Users without a profile are simply absent from the map.
    async fn get_profiles(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, Profile>, ProfileError>;
}
