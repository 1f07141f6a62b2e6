//! Typed messages flowing through the hub.
//!
//! Inbound frames are decoded into [`InboundMessage`] by the wire codec; everything the hub
//! delivers to connections is an [`OutboundMessage`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{PresenceStatus, Profile, UserId};

/// JSON object payload kept in its original key order.
pub type Payload = Map<String, Value>;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Identity-bearing join.
    UserJoin { user_id: UserId },
    /// Explicit leave; releases the connection's identity.
    UserLeave,
    /// Chat text. Malformed frames also land here with the raw text.
    Chat { payload: Payload },
    ProfileUpdate { payload: Payload },
    StatusRequest,
    Heartbeat,
    /// Unrecognized (or outbound-only) type, forwarded verbatim.
    PassThrough { raw: String },
}

/// Consolidated list of known users with status and optional profile data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    /// Sorted user ids.
    pub users: Vec<UserId>,
    pub statuses: BTreeMap<UserId, PresenceStatus>,
    pub profiles: BTreeMap<UserId, Profile>,
}

impl Roster {
    pub fn status_of(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.statuses.get(user_id).copied()
    }
}

/// Message delivered to connections. Exactly one variant per message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    UserJoined { user_id: UserId },
    UserLeft { user_id: UserId },
    /// Chat text; `sender` is injected into the payload on encoding.
    ChatText {
        sender: Option<UserId>,
        payload: Payload,
    },
    StatusChanged {
        user_id: UserId,
        status: PresenceStatus,
    },
    RosterSnapshot(Roster),
    ProfileUpdate {
        sender: Option<UserId>,
        payload: Payload,
    },
    /// Never forwarded to other connections.
    Heartbeat,
    /// Raw frame text of an unrecognized type.
    PassThrough(String),
}

impl OutboundMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::UserJoined { .. } => "user_join",
            OutboundMessage::UserLeft { .. } => "user_leave",
            OutboundMessage::ChatText { .. } => "message",
            OutboundMessage::StatusChanged { .. } => "status_change",
            OutboundMessage::RosterSnapshot(_) => "user_list",
            OutboundMessage::ProfileUpdate { .. } => "profile_update",
            OutboundMessage::Heartbeat => "heartbeat",
            OutboundMessage::PassThrough(_) => "pass_through",
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, OutboundMessage::Heartbeat)
    }
}
