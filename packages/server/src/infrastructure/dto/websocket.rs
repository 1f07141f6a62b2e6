//! WebSocket wire frames.
//!
//! One JSON object per text frame, discriminated by `type`. Chat and profile payloads are kept
//! as parsed (key order preserved) so they are re-emitted unchanged apart from `sender`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    InboundMessage, OutboundMessage, Payload, PresenceStatus, Profile, Roster, UserId,
};

/// Recognized values of the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    UserJoin,
    UserLeave,
    Message,
    UserList,
    StatusChange,
    StatusRequest,
    ProfileUpdate,
    Heartbeat,
}

impl FrameType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_join" => Some(FrameType::UserJoin),
            "user_leave" => Some(FrameType::UserLeave),
            "message" => Some(FrameType::Message),
            "user_list" => Some(FrameType::UserList),
            "status_change" => Some(FrameType::StatusChange),
            "status_request" => Some(FrameType::StatusRequest),
            "profile_update" => Some(FrameType::ProfileUpdate),
            "heartbeat" => Some(FrameType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::UserJoin => "user_join",
            FrameType::UserLeave => "user_leave",
            FrameType::Message => "message",
            FrameType::UserList => "user_list",
            FrameType::StatusChange => "status_change",
            FrameType::StatusRequest => "status_request",
            FrameType::ProfileUpdate => "profile_update",
            FrameType::Heartbeat => "heartbeat",
        }
    }
}

/// Server-generated frame (presence, roster, heartbeat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<BTreeMap<String, PresenceStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<BTreeMap<String, ProfileDto>>,
}

impl WireFrame {
    fn bare(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            user_id: None,
            status: None,
            users: None,
            statuses: None,
            profiles: None,
        }
    }

    fn presence(frame_type: FrameType, user_id: &UserId, status: PresenceStatus) -> Self {
        Self {
            user_id: Some(user_id.as_str().to_string()),
            status: Some(status),
            ..Self::bare(frame_type)
        }
    }
}

/// Profile as it appears inside a roster frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDto {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub about: String,
}

impl From<&Profile> for ProfileDto {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.as_str().to_string(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            about: profile.about.clone(),
        }
    }
}

impl From<&Roster> for WireFrame {
    fn from(roster: &Roster) -> Self {
        let profiles = (!roster.profiles.is_empty()).then(|| {
            roster
                .profiles
                .iter()
                .map(|(id, profile)| (id.as_str().to_string(), ProfileDto::from(profile)))
                .collect()
        });
        Self {
            users: Some(
                roster
                    .users
                    .iter()
                    .map(|id| id.as_str().to_string())
                    .collect(),
            ),
            statuses: Some(
                roster
                    .statuses
                    .iter()
                    .map(|(id, status)| (id.as_str().to_string(), *status))
                    .collect(),
            ),
            profiles,
            ..Self::bare(FrameType::UserList)
        }
    }
}

/// Decode one inbound text frame.
///
/// Never fails: undecodable input becomes a chat message carrying the raw text, and objects of
/// an unknown type are passed through verbatim.
pub fn decode_inbound(text: &str) -> InboundMessage {
    let payload = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) => return raw_chat(text),
        Err(e) => {
            tracing::debug!("Frame is not JSON, treating as raw text: {}", e);
            return raw_chat(text);
        }
    };

    let frame_type = payload
        .get("type")
        .and_then(Value::as_str)
        .and_then(FrameType::parse);

    match frame_type {
        Some(FrameType::UserJoin) => {
            match payload
                .get("userId")
                .and_then(Value::as_str)
                .map(|id| UserId::new(id.to_string()))
            {
                Some(Ok(user_id)) => InboundMessage::UserJoin { user_id },
                _ => {
                    tracing::debug!("user_join without a valid userId, treating as raw text");
                    raw_chat(text)
                }
            }
        }
        Some(FrameType::UserLeave) => InboundMessage::UserLeave,
        Some(FrameType::Message) => InboundMessage::Chat { payload },
        Some(FrameType::ProfileUpdate) => InboundMessage::ProfileUpdate { payload },
        Some(FrameType::StatusRequest) => InboundMessage::StatusRequest,
        Some(FrameType::Heartbeat) => InboundMessage::Heartbeat,
        Some(FrameType::UserList) | Some(FrameType::StatusChange) | None => {
            InboundMessage::PassThrough {
                raw: text.to_string(),
            }
        }
    }
}

fn raw_chat(text: &str) -> InboundMessage {
    let mut payload = Payload::new();
    payload.insert(
        "type".to_string(),
        Value::String(FrameType::Message.as_str().to_string()),
    );
    payload.insert("text".to_string(), Value::String(text.to_string()));
    InboundMessage::Chat { payload }
}

/// Encode an outbound message into frame text.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    match message {
        OutboundMessage::UserJoined { user_id } => serde_json::to_string(&WireFrame::presence(
            FrameType::UserJoin,
            user_id,
            PresenceStatus::Online,
        )),
        OutboundMessage::UserLeft { user_id } => serde_json::to_string(&WireFrame::presence(
            FrameType::UserLeave,
            user_id,
            PresenceStatus::Offline,
        )),
        OutboundMessage::StatusChanged { user_id, status } => serde_json::to_string(
            &WireFrame::presence(FrameType::StatusChange, user_id, *status),
        ),
        OutboundMessage::RosterSnapshot(roster) => serde_json::to_string(&WireFrame::from(roster)),
        OutboundMessage::Heartbeat => {
            serde_json::to_string(&WireFrame::bare(FrameType::Heartbeat))
        }
        OutboundMessage::ChatText { sender, payload }
        | OutboundMessage::ProfileUpdate { sender, payload } => {
            serde_json::to_string(&with_sender(payload, sender.as_ref()))
        }
        OutboundMessage::PassThrough(raw) => Ok(raw.clone()),
    }
}

/// Copy of `payload` with `sender` set to the bound identity, or removed when anonymous.
fn with_sender(payload: &Payload, sender: Option<&UserId>) -> Payload {
    let mut payload = payload.clone();
    match sender {
        Some(user_id) => {
            payload.insert(
                "sender".to_string(),
                Value::String(user_id.as_str().to_string()),
            );
        }
        None => {
            payload.shift_remove("sender");
        }
    }
    payload
}
