//! Redis presence store.
//!
//! Keys are `user:status:<user id>` holding `online`/`offline` with an `EX` TTL, so several hub
//! instances share one presence view.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::domain::{PresenceError, PresenceStatus, PresenceStore, UserId};

const KEY_PREFIX: &str = "user:status:";

impl From<redis::RedisError> for PresenceError {
    fn from(e: redis::RedisError) -> Self {
        PresenceError::Backend(e.to_string())
    }
}

/// Presence store backed by Redis.
pub struct RedisPresenceStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisPresenceStore {
    /// Connect to `redis_url`. The TTL is rounded up to whole seconds.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, PresenceError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        let ttl_secs = ttl_secs(ttl);
        tracing::info!(ttl_secs, "Connected to Redis presence store");
        Ok(Self { conn, ttl_secs })
    }

    fn key(user_id: &UserId) -> String {
        format!("{}{}", KEY_PREFIX, user_id.as_str())
    }

    async fn write(&self, user_id: &UserId, status: PresenceStatus) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::key(user_id), status.as_str(), self.ttl_secs)
            .await?;
        Ok(())
    }
}

/// `EX` takes whole seconds; round up and never go below one.
fn ttl_secs(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_online(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.write(user_id, PresenceStatus::Online).await
    }

    async fn set_offline(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.write(user_id, PresenceStatus::Offline).await
    }

    async fn get_status(&self, user_id: &UserId) -> Result<PresenceStatus, PresenceError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::key(user_id)).await?;
        match value {
            Some(status) => status.parse(),
            None => Ok(PresenceStatus::Offline),
        }
    }

    async fn get_all_statuses(&self) -> Result<HashMap<UserId, PresenceStatus>, PresenceError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", KEY_PREFIX)).await?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut statuses = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            // Expired between KEYS and MGET.
            let Some(value) = value else { continue };
            let Ok(user_id) = UserId::new(key[KEY_PREFIX.len()..].to_string()) else {
                continue;
            };
            let status = value.parse().unwrap_or_else(|e| {
                tracing::warn!(user_id = %user_id, "Unreadable presence record: {}", e);
                PresenceStatus::Offline
            });
            statuses.insert(user_id, status);
        }
        Ok(statuses)
    }
}
