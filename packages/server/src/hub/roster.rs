//! Roster assembly and the periodic presence broadcast.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::Notify,
    time::{Instant, MissedTickBehavior},
};

use crate::domain::{
    OutboundMessage, PresenceError, PresenceStatus, PresenceStore, ProfileLookup, Roster, UserId,
};

use super::{HubError, HubHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("presence store unavailable: {0}")]
    Presence(#[from] PresenceError),
}

/// Status of every user in `known`.
///
/// A user is online when the store says so, or when it is bound to a connection of this
/// process that showed activity within `ttl`. Everyone else is offline.
pub fn reconcile_statuses(
    known: &[UserId],
    stored: &HashMap<UserId, PresenceStatus>,
    live: &HashMap<UserId, Instant>,
    now: Instant,
    ttl: Duration,
) -> BTreeMap<UserId, PresenceStatus> {
    known
        .iter()
        .map(|user_id| {
            let stored_online = stored.get(user_id) == Some(&PresenceStatus::Online);
            let recently_active = live
                .get(user_id)
                .is_some_and(|last| now.saturating_duration_since(*last) < ttl);
            let status = if stored_online || recently_active {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            };
            (user_id.clone(), status)
        })
        .collect()
}

/// Builds roster snapshots from the registry, the presence store and the profile lookup.
pub struct RosterBuilder {
    hub: HubHandle,
    store: Arc<dyn PresenceStore>,
    profiles: Arc<dyn ProfileLookup>,
    presence_ttl: Duration,
}

impl RosterBuilder {
    pub fn new(
        hub: HubHandle,
        store: Arc<dyn PresenceStore>,
        profiles: Arc<dyn ProfileLookup>,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            hub,
            store,
            profiles,
            presence_ttl,
        }
    }

    /// Known users of this process plus every user in the store, with reconciled statuses.
    /// A failing profile lookup yields a roster without profiles.
    pub async fn build(&self) -> Result<Roster, RosterError> {
        let snapshot = self.hub.snapshot().await?;
        let stored = self.store.get_all_statuses().await?;

        let users: Vec<UserId> = snapshot
            .known_users
            .iter()
            .chain(stored.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let statuses = reconcile_statuses(
            &users,
            &stored,
            &snapshot.live_users(),
            Instant::now(),
            self.presence_ttl,
        );

        let profiles = if users.is_empty() {
            BTreeMap::new()
        } else {
            match self.profiles.get_profiles(&users).await {
                Ok(profiles) => profiles.into_iter().collect(),
                Err(e) => {
                    tracing::warn!("Profile lookup failed, sending roster without profiles: {}", e);
                    BTreeMap::new()
                }
            }
        };

        Ok(Roster {
            users,
            statuses,
            profiles,
        })
    }
}

/// Fans out a roster snapshot on every tick and whenever `trigger` is notified.
pub struct PresenceBroadcaster {
    builder: Arc<RosterBuilder>,
    hub: HubHandle,
    interval: Duration,
    trigger: Arc<Notify>,
}

impl PresenceBroadcaster {
    pub fn new(
        builder: Arc<RosterBuilder>,
        hub: HubHandle,
        interval: Duration,
        trigger: Arc<Notify>,
    ) -> Self {
        Self {
            builder,
            hub,
            interval,
            trigger,
        }
    }

    /// Runs until the engine stops.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
                _ = self.hub.closed() => break,
            }

            let roster = match self.builder.build().await {
                Ok(roster) => roster,
                Err(RosterError::Hub(_)) => break,
                Err(e) => {
                    tracing::warn!("Skipping roster broadcast: {}", e);
                    continue;
                }
            };
            tracing::debug!(users = roster.users.len(), "Broadcasting roster");
            if self
                .hub
                .broadcast(OutboundMessage::RosterSnapshot(roster), None)
                .await
                .is_err()
            {
                break;
            }
        }
        tracing::info!("Presence broadcaster stopped");
    }
}
