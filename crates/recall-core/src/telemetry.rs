//! Tracing setup for `recalld` and embedding hosts.
//!
//! Ingest passes run inside a `recall.worker` span carrying `worker_id`, and
//! retrieval runs inside a `retrieve_with_deadline` span carrying
//! `expert_id`. The JSON format keeps those span fields on every line, so
//! `job.retry` or `retrieval.degraded` events can be grouped per worker or
//! expert downstream.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `level` applies when `RUST_LOG` is unset; `RUST_LOG=recall_core=debug`
/// surfaces per-job backoff and facet warnings. A host that already
/// installed a subscriber keeps it.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
