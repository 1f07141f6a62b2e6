//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{Router, routing::get};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{Notify, Semaphore},
};
use tower_http::trace::TraceLayer;

use crate::{
    config::{ConfigError, HubConfig},
    domain::{PresenceStore, ProfileLookup},
    hub::{BroadcastEngine, PresenceBroadcaster, RosterBuilder},
    usecase::{CloseConnectionUseCase, DispatchFrameUseCase},
};

use super::{
    handler::{debug_hub_state, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket connection hub server
///
/// # Example
///
/// ```ignore
/// let server = Server::new(HubConfig::default(), store, profiles)?;
/// server.run("127.0.0.1", 8080).await?;
/// ```
pub struct Server {
    config: HubConfig,
    store: Arc<dyn PresenceStore>,
    profiles: Arc<dyn ProfileLookup>,
}

impl Server {
    /// Create a new Server. Fails if `config` does not validate.
    pub fn new(
        config: HubConfig,
        store: Arc<dyn PresenceStore>,
        profiles: Arc<dyn ProfileLookup>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            profiles,
        })
    }

    /// Bind to `host:port` and serve until Ctrl+C / SIGTERM.
    pub async fn run(self, host: &str, port: u16) -> Result<(), ServerError> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Spawns the broadcast engine and the presence broadcaster; on shutdown every connection is
    /// closed and both tasks are awaited.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let quota = self.config.rate_quota()?;
        let roster_trigger = Arc::new(Notify::new());
        let (engine, hub) =
            BroadcastEngine::new(&self.config, self.store.clone(), roster_trigger.clone());
        let engine_task = tokio::spawn(engine.run());

        let roster = Arc::new(RosterBuilder::new(
            hub.clone(),
            self.store.clone(),
            self.profiles,
            self.config.presence_ttl,
        ));
        let broadcaster = PresenceBroadcaster::new(
            roster.clone(),
            hub.clone(),
            self.config.roster_interval,
            roster_trigger,
        );
        let broadcaster_task = tokio::spawn(broadcaster.run());

        let app_state = Arc::new(AppState {
            admission: Arc::new(Semaphore::new(self.config.max_connections)),
            quota,
            dispatch_frame_usecase: Arc::new(DispatchFrameUseCase::new(hub.clone(), roster)),
            close_connection_usecase: Arc::new(CloseConnectionUseCase::new(hub.clone())),
            hub: hub.clone(),
            config: self.config,
        });

        let app = Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/debug/hub", get(debug_hub_state))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state);

        tracing::info!("Hiroba hub listening on {}", listener.local_addr()?);

        let shutdown_hub = hub.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                if shutdown_hub.shutdown().await.is_err() {
                    tracing::debug!("Engine already stopped");
                }
            })
            .await;

        // The engine may still be running if serving failed.
        let _ = hub.shutdown().await;
        drop(hub);
        if let Err(e) = engine_task.await {
            tracing::error!("Broadcast engine task failed: {}", e);
        }
        if let Err(e) = broadcaster_task.await {
            tracing::error!("Presence broadcaster task failed: {}", e);
        }

        tracing::info!("Server shutdown complete");
        Ok(result?)
    }
}
