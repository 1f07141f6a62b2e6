//! Hiroba connection hub.
//!
//! Accepts WebSocket connections, binds each to a user identity, fans messages out to every
//! other live connection, and keeps a TTL-based presence view that is periodically broadcast
//! as a roster snapshot.

// layers
pub mod config;
pub mod domain;
pub mod hub;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
