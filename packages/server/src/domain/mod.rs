//! Domain layer.
//!
//! Value objects, the outbound message union, presence/roster types, and the collaborator
//! traits the hub depends on. Concrete collaborators live in the infrastructure layer.

pub mod error;
pub mod message;
pub mod presence;
pub mod profile;
pub mod value_object;

pub use error::{PresenceError, ProfileError, ValueObjectError};
pub use message::{InboundMessage, OutboundMessage, Payload, Roster};
pub use presence::{PresenceStatus, PresenceStore};
pub use profile::{Profile, ProfileLookup};
pub use value_object::{ConnectionId, UserId};
