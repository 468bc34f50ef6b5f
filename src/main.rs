use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use kidguard::api::{start_api_server, ApiState};
use kidguard::clock::{Clock, SystemClock};
use kidguard::config::Config;
use kidguard::foreground::{spawn_dispatcher, ActionFeed, ForegroundEngine, SnapshotScreen};
use kidguard::init::{open_policy_store, setup_logging};
use kidguard::logger::BlockNotifier;
use kidguard::policy::PolicyHandle;
use kidguard::sinkhole::{FdInterface, Sinkhole};
use kidguard::stats::StatsCollector;

const ACTION_FEED_CAPACITY: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "kidguard.toml".to_string());
    let config_exists = std::path::Path::new(&config_path).exists();
    let config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting kidguard...");
    if !config_exists {
        info!("Config file not found, using defaults.");
    }

    // 3. Open Policy Store
    let store = open_policy_store(&config.policy)?;
    let policy = Arc::new(PolicyHandle::load(store));

    // 4. Init Stats
    let stats = StatsCollector::new();
    if config.stats.enable {
        stats.spawn_logger(config.stats.log_interval_seconds);
    }

    // 5. Init Block Notifier
    let notifier = BlockNotifier::new(&config.logging);

    // 6. Start Sinkhole on the host-provided interface
    let sinkhole = if config.sinkhole.enable {
        match config.sinkhole.tun_fd {
            Some(fd) => {
                // SAFETY: the host hands this descriptor to us exclusively.
                let device = unsafe { FdInterface::from_raw_fd(fd) }?;
                let sinkhole = Arc::new(Sinkhole::new(
                    config.sinkhole.clone(),
                    policy.clone(),
                    notifier.clone(),
                    stats.clone(),
                ));
                sinkhole.start(device)?;
                info!(
                    "Sinkhole intercepting {} resolver routes via {}",
                    config.sinkhole.routes.len(),
                    config.sinkhole.local_address
                );
                Some(sinkhole)
            }
            None => {
                warn!("No tun_fd configured; DNS sinkhole disabled.");
                None
            }
        }
    } else {
        None
    };

    // 7. Start Foreground Engine
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let screen = Arc::new(SnapshotScreen::new());
    let actions = Arc::new(ActionFeed::new(ACTION_FEED_CAPACITY));
    let focus_sender = if config.foreground.enable {
        let engine = ForegroundEngine::new(
            config.foreground.clone(),
            policy.clone(),
            actions.clone(),
            screen.clone(),
            stats.clone(),
        );
        let (tx, _handle) = spawn_dispatcher(engine, config.foreground.event_buffer);
        Some(tx)
    } else {
        None
    };

    // 8. Start API Server
    if config.api.enable {
        let api_state = Arc::new(ApiState {
            policy: policy.clone(),
            stats: stats.clone(),
            notifier: notifier.clone(),
            sinkhole: sinkhole.clone(),
            focus_sender,
            screen,
            actions,
            clock,
            controlling_package: config.foreground.controlling_package.clone(),
            routes: config.sinkhole.routes.clone(),
        });
        let api_config = config.api.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state, &api_config).await {
                error!("API server stopped: {:#}", e);
            }
        });
    }

    // 9. Graceful Shutdown
    signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    if let Some(sinkhole) = sinkhole {
        sinkhole.stop();
    }

    Ok(())
}
