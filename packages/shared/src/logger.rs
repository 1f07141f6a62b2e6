//! Logging setup for the Hiroba binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `targets` lists the crate/binary targets that get `default_level`; everything else stays at
/// the subscriber's default (`error`). `RUST_LOG` overrides the whole filter when set.
///
/// # Examples
///
/// ```no_run
/// use hiroba_shared::logger::setup_logger;
///
/// setup_logger(&["hiroba_server", "hiroba_shared"], "debug");
/// ```
pub fn setup_logger(targets: &[&str], default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(targets, default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build an `EnvFilter` directive string such as `hiroba_server=info,tower_http=info`.
fn default_filter(targets: &[&str], default_level: &str) -> String {
    targets
        .iter()
        .map(|target| format!("{}={}", target.replace('-', "_"), default_level))
        .collect::<Vec<_>>()
        .join(",")
}
