use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once the global subscriber is installed
static TRACING_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns `false` when a
/// subscriber was already installed (by an earlier call or by the host
/// application); that is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        TRACING_INSTALLED.store(true, Ordering::Relaxed);
    }
    installed
}

/// Whether this crate installed the global subscriber
pub fn is_tracing_installed() -> bool {
    TRACING_INSTALLED.load(Ordering::Relaxed)
}
