//! InMemory presence store.
//!
//! Records carry an expiry instant; expired records are treated as absent and pruned lazily
//! on listing. Uses `tokio::time::Instant` so paused-clock tests can drive expiry.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use crate::domain::{PresenceError, PresenceStatus, PresenceStore, UserId};

#[derive(Debug, Clone, Copy)]
struct PresenceRecord {
    status: PresenceStatus,
    expires_at: Instant,
}

/// In-memory presence store with per-record TTL.
pub struct InMemoryPresenceStore {
    ttl: Duration,
    records: Mutex<HashMap<UserId, PresenceRecord>>,
}

impl InMemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    async fn write(&self, user_id: &UserId, status: PresenceStatus) {
        let record = PresenceRecord {
            status,
            expires_at: Instant::now() + self.ttl,
        };
        self.records.lock().await.insert(user_id.clone(), record);
        tracing::debug!(user_id = %user_id, status = %status, "Presence record written");
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set_online(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.write(user_id, PresenceStatus::Online).await;
        Ok(())
    }

    async fn set_offline(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.write(user_id, PresenceStatus::Offline).await;
        Ok(())
    }

    async fn get_status(&self, user_id: &UserId) -> Result<PresenceStatus, PresenceError> {
        let records = self.records.lock().await;
        let now = Instant::now();
        Ok(records
            .get(user_id)
            .filter(|record| record.expires_at > now)
            .map(|record| record.status)
            .unwrap_or(PresenceStatus::Offline))
    }

    async fn get_all_statuses(&self) -> Result<HashMap<UserId, PresenceStatus>, PresenceError> {
        let mut records = self.records.lock().await;
        let now = Instant::now();
        records.retain(|_, record| record.expires_at > now);
        Ok(records
            .iter()
            .map(|(user_id, record)| (user_id.clone(), record.status))
            .collect())
    }
}
