//! Hiroba hub server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --host 0.0.0.0 --port 3000 --profiles profiles.json
//! cargo run --bin hiroba-server --features redis-backend -- --redis-url redis://127.0.0.1/
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use hiroba_server::{
    config::HubConfig,
    domain::{PresenceError, PresenceStore, ProfileLookup},
    infrastructure::{presence::InMemoryPresenceStore, profile::InMemoryProfileDirectory},
    ui::Server,
};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-server")]
#[command(about = "WebSocket connection hub with presence tracking", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "HIROBA_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "HIROBA_PORT", default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(long, env = "HIROBA_MAX_CONNECTIONS", default_value_t = 10_000)]
    max_connections: usize,

    /// Inbound frames per second allowed on each connection
    #[arg(long, env = "HIROBA_MESSAGES_PER_SECOND", default_value_t = 5.0)]
    messages_per_second: f64,

    /// Burst size of the per-connection rate limiter
    #[arg(long, env = "HIROBA_BURST", default_value_t = 1)]
    burst: u32,

    /// Seconds without any inbound frame before a connection is closed
    #[arg(long, env = "HIROBA_READ_DEADLINE_SECS", default_value_t = 60)]
    read_deadline_secs: u64,

    /// Seconds allowed for a single frame write
    #[arg(long, env = "HIROBA_WRITE_DEADLINE_SECS", default_value_t = 10)]
    write_deadline_secs: u64,

    /// Keepalive ping period in seconds [default: 9/10 of the read deadline]
    #[arg(long, env = "HIROBA_KEEPALIVE_SECS")]
    keepalive_secs: Option<u64>,

    /// Presence record TTL in seconds
    #[arg(long, env = "HIROBA_PRESENCE_TTL_SECS", default_value_t = 300)]
    presence_ttl_secs: u64,

    /// Roster broadcast period in milliseconds
    #[arg(long, env = "HIROBA_ROSTER_INTERVAL_MS", default_value_t = 5_000)]
    roster_interval_ms: u64,

    /// Milliseconds allowed for a single presence store call
    #[arg(long, env = "HIROBA_STORE_TIMEOUT_MS", default_value_t = 2_000)]
    store_timeout_ms: u64,

    /// Per-connection outbound queue capacity
    #[arg(long, env = "HIROBA_OUTBOUND_QUEUE", default_value_t = 256)]
    outbound_queue_capacity: usize,

    /// Broadcast engine event queue capacity
    #[arg(long, env = "HIROBA_ENGINE_QUEUE", default_value_t = 1_024)]
    engine_queue_capacity: usize,

    /// Largest accepted inbound frame in bytes
    #[arg(long, env = "HIROBA_MAX_FRAME_BYTES", default_value_t = 4_096)]
    max_frame_bytes: usize,

    /// Log level for the hub crates (overridden by RUST_LOG)
    #[arg(long, env = "HIROBA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// JSON file with an array of profiles to seed the profile directory
    #[arg(long, env = "HIROBA_PROFILES")]
    profiles: Option<PathBuf>,

    /// Redis URL of a shared presence store
    #[cfg(feature = "redis-backend")]
    #[arg(long, env = "HIROBA_REDIS_URL")]
    redis_url: Option<String>,
}

impl Args {
    fn hub_config(&self) -> HubConfig {
        let read_deadline = Duration::from_secs(self.read_deadline_secs);
        HubConfig {
            max_connections: self.max_connections,
            messages_per_second: self.messages_per_second,
            burst: self.burst,
            read_deadline,
            write_deadline: Duration::from_secs(self.write_deadline_secs),
            keepalive_interval: self
                .keepalive_secs
                .map(Duration::from_secs)
                .unwrap_or(read_deadline * 9 / 10),
            presence_ttl: Duration::from_secs(self.presence_ttl_secs),
            roster_interval: Duration::from_millis(self.roster_interval_ms),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            outbound_queue_capacity: self.outbound_queue_capacity,
            engine_queue_capacity: self.engine_queue_capacity,
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    async fn presence_store(&self, ttl: Duration) -> Result<Arc<dyn PresenceStore>, PresenceError> {
        #[cfg(feature = "redis-backend")]
        if let Some(url) = &self.redis_url {
            let store =
                hiroba_server::infrastructure::presence::RedisPresenceStore::connect(url, ttl)
                    .await?;
            return Ok(Arc::new(store));
        }
        Ok(Arc::new(InMemoryPresenceStore::new(ttl)))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(
        &["hiroba_server", "hiroba_shared", "tower_http"],
        &args.log_level,
    );

    // Initialize dependencies in order:
    // 1. HubConfig
    // 2. PresenceStore
    // 3. ProfileLookup
    // 4. Server
    let config = args.hub_config();

    let store = match args.presence_store(config.presence_ttl).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to set up presence store: {}", e);
            std::process::exit(1);
        }
    };

    let profiles: Arc<dyn ProfileLookup> = match &args.profiles {
        Some(path) => match InMemoryProfileDirectory::from_json_file(path).await {
            Ok(directory) => Arc::new(directory),
            Err(e) => {
                tracing::error!("Failed to load profiles from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Arc::new(InMemoryProfileDirectory::default()),
    };

    let server = match Server::new(config, store, profiles) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = server.run(&args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
