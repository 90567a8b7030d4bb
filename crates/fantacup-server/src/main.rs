// Fantacup tracker entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database
// 4. Seed ownership and team aliases
// 5. Build the fixtures client and update coordinator
// 6. Spawn scheduler loops
// 7. Spawn WebSocket server task
// 8. Wait for Ctrl+C, then abort background tasks

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use fantacup_core::config;
use fantacup_core::db::Database;
use fantacup_core::fixtures::client::ApiFootballClient;
use fantacup_core::seed;
use fantacup_server::api::Api;
use fantacup_server::scheduler::{self, ScheduleTimes};
use fantacup_server::updater::{UpdateCoordinator, UpdateSettings};
use fantacup_server::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file)
    init_tracing()?;
    info!("Fantacup tracker starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} (league {}, season {})",
        config.tournament.name, config.tournament.league_id, config.tournament.season
    );

    // 3. Open database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Seed ownership and team aliases
    seed::seed_ownership(&db, Path::new(&config.owners_path))
        .context("failed to load ownership seed")?;
    if let Some(aliases) = &config.aliases_path {
        seed::seed_aliases(&db, Path::new(aliases)).context("failed to load team aliases")?;
    }

    // 5. Build the fixtures client and update coordinator
    let source = Arc::new(ApiFootballClient::from_config(&config));
    let coordinator = Arc::new(UpdateCoordinator::new(
        Arc::clone(&db),
        source,
        UpdateSettings::from_config(&config),
    ));

    // 6. Spawn scheduler loops
    let mut handles = scheduler::spawn(Arc::clone(&coordinator), ScheduleTimes::from_config(&config));

    // 7. Spawn WebSocket server task
    let ws_port = config.ws_port;
    let api = Arc::new(Api::new(coordinator));
    handles.push(tokio::spawn(async move {
        match ws_server::bind(ws_port).await {
            Ok(listener) => {
                if let Err(e) = ws_server::run(listener, api).await {
                    error!("WebSocket server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind WebSocket server on port {}: {}", ws_port, e);
            }
        }
    }));

    // 8. Wait for Ctrl+C
    info!("Tracker ready. WebSocket server on 127.0.0.1:{}", ws_port);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutdown requested");
    for handle in handles {
        handle.abort();
    }

    info!("Fantacup tracker shut down cleanly");
    Ok(())
}

/// Default filter when `RUST_LOG` is unset: our crates at info, the HTTP and
/// WebSocket stacks at warn.
const DEFAULT_LOG_FILTER: &str = "fantacup_core=info,fantacup_server=info,warn";

/// Append to `logs/fantacup.log`, so history survives restarts.
fn init_tracing() -> anyhow::Result<()> {
    use std::sync::Mutex;
    use tracing_subscriber::EnvFilter;

    let log_path = Path::new("logs").join("fantacup.log");
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
