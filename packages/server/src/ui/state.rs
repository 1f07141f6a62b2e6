//! Shared application state.

use std::sync::Arc;

use governor::Quota;
use tokio::sync::Semaphore;

use crate::{
    config::HubConfig,
    hub::HubHandle,
    usecase::{CloseConnectionUseCase, DispatchFrameUseCase},
};

pub struct AppState {
    pub config: HubConfig,
    pub hub: HubHandle,
    /// One permit per live connection; acquired before the upgrade.
    pub admission: Arc<Semaphore>,
    /// Per-connection inbound rate.
    pub quota: Quota,
    pub dispatch_frame_usecase: Arc<DispatchFrameUseCase>,
    pub close_connection_usecase: Arc<CloseConnectionUseCase>,
}

impl AppState {
    pub fn active_connections(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.admission.available_permits())
    }
}
