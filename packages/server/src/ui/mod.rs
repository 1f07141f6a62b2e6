//! Transport layer: Axum router, WebSocket connection tasks and HTTP handlers.

mod connection;
mod handler;
mod server;
mod signal;
pub mod state;

pub use connection::TransportError;
pub use server::{Server, ServerError};
pub use signal::shutdown_signal;
