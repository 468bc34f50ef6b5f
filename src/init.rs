//! Initialization helpers for the daemon startup.

use crate::config::{Config, PolicyConfig};
use crate::policy::{KeyValueStore, MemoryStore, SqliteStore};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

const QUIET_TARGETS: &[&str] = &["hickory_proto", "axum", "hyper"];

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.logging.level.clone();

        // Suppress dependency chatter unless explicitly named
        for target in QUIET_TARGETS {
            if !filter.contains(target) {
                filter.push_str(&format!(",{}=warn", target));
            }
        }

        tracing_subscriber::EnvFilter::new(filter)
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Opens the persistent policy store selected by `[policy] backend`.
pub fn open_policy_store(config: &PolicyConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend.as_str() {
        "sqlite" => {
            let store = SqliteStore::open(&config.sqlite_path).with_context(|| {
                format!("Failed to open policy database at {}", config.sqlite_path)
            })?;
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("Policy store is in-memory; changes will not survive a restart.");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => bail!("Unknown policy backend '{}'", other),
    }
}
