//! Infrastructure layer.
//!
//! Concrete implementations of the domain ports (presence store, profile lookup) and the wire
//! DTOs.

pub mod dto;
pub mod presence;
pub mod profile;
