//! Connection hub.
//!
//! All registry mutation and fan-out decisions go through one coordination point, the
//! [`BroadcastEngine`]; everything else talks to it through a cloneable [`HubHandle`]. Presence
//! store writes are applied behind it by a [`presence::PresenceWorker`].

pub mod close;
pub mod engine;
pub mod presence;
pub mod registry;
pub mod roster;

use thiserror::Error;

pub use close::CloseSignal;
pub use engine::{BroadcastEngine, ConnectionSummary, HubHandle, HubSnapshot, HubStats};
pub use registry::{ConnectionEntry, ConnectionRegistry, OutboundSender};
pub use roster::{PresenceBroadcaster, RosterBuilder, RosterError};

/// Hub communication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("broadcast engine has stopped")]
    EngineStopped,
}
