//! InMemory profile directory.
//!
//! Stand-in for the user repository: profiles are seeded at startup (optionally from a JSON
//! file) and looked up by id for roster snapshots.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Profile, ProfileError, ProfileLookup, UserId};

/// Profile directory held in memory.
#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<UserId, Profile>>,
}

impl InMemoryProfileDirectory {
    pub fn new(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|profile| (profile.id.clone(), profile))
                    .collect(),
            ),
        }
    }

    /// Load a JSON array of profiles.
    pub async fn from_json_file(path: &Path) -> Result<Self, ProfileError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProfileError::Lookup(format!("{}: {}", path.display(), e)))?;
        let profiles: Vec<Profile> = serde_json::from_str(&contents)
            .map_err(|e| ProfileError::Lookup(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded {} profiles from {}", profiles.len(), path.display());
        Ok(Self::new(profiles))
    }

    /// Insert or replace a profile.
    pub async fn upsert(&self, profile: Profile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileLookup for InMemoryProfileDirectory {
    async fn get_profiles(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, Profile>, ProfileError> {
        let profiles = self.profiles.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}
