//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::hub::{HubSnapshot, HubStats};
use hiroba_shared::time::millis_to_rfc3339;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDto {
    pub status: String,
    pub connections: usize,
}

/// One live connection in the debug view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDto {
    pub id: String,
    pub user_id: Option<String>,
    /// RFC 3339 (UTC)
    pub connected_at: Option<String>,
    /// Milliseconds since the last inbound frame.
    pub idle_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStatsDto {
    pub broadcasts: u64,
    pub delivered_frames: u64,
    pub slow_consumers_dropped: u64,
}

impl From<HubStats> for HubStatsDto {
    fn from(stats: HubStats) -> Self {
        Self {
            broadcasts: stats.broadcasts,
            delivered_frames: stats.delivered_frames,
            slow_consumers_dropped: stats.slow_consumers_dropped,
        }
    }
}

/// `/debug/hub` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStateDto {
    pub connection_count: usize,
    pub identified_count: usize,
    pub connections: Vec<ConnectionDto>,
    pub known_users: Vec<String>,
    pub stats: HubStatsDto,
    pub max_connections: usize,
    pub available_slots: usize,
}

impl HubStateDto {
    pub fn new(snapshot: &HubSnapshot, max_connections: usize, available_slots: usize) -> Self {
        let now = Instant::now();
        let connections = snapshot
            .connections
            .iter()
            .map(|conn| ConnectionDto {
                id: conn.id.to_string(),
                user_id: conn.user_id.as_ref().map(|id| id.as_str().to_string()),
                connected_at: millis_to_rfc3339(conn.connected_at),
                idle_ms: now.saturating_duration_since(conn.last_activity).as_millis() as u64,
            })
            .collect();

        Self {
            connection_count: snapshot.connections.len(),
            identified_count: snapshot.identified_count(),
            connections,
            known_users: snapshot
                .known_users
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            stats: snapshot.stats.into(),
            max_connections,
            available_slots,
        }
    }
}
