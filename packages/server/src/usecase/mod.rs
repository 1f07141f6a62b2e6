//! UseCase layer.
//!
//! Per-connection operations invoked by the transport: frame dispatch and the close sequence.

pub mod close_connection;
pub mod dispatch_frame;
pub mod error;

pub use close_connection::CloseConnectionUseCase;
pub use dispatch_frame::{ConnectionContext, DispatchFrameUseCase};
pub use error::DispatchFrameError;
