//! Data Transfer Objects.
//!
//! DTOs are organized by protocol:
//! - `websocket`: wire frames and the inbound/outbound codec
//! - `http`: debug/health API responses

pub mod http;
pub mod websocket;
