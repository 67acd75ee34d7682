//! Streamhub server binary.
//!
//! Wires the configured store, the hub and the `WebSocket` gateway
//! together and serves until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `streamhub-config.yaml` (or defaults)
//! 2. Initialize structured logging (tracing)
//! 3. Connect the backing store (Redis or in-memory)
//! 4. Wait until the store answers pings
//! 5. Serve the gateway until a shutdown signal arrives

mod error;

use std::path::Path;
use std::sync::Arc;

use streamhub_core::{Hub, LogFormat, LoggingConfig, StoreBackend, StoreConfig, StreamhubConfig};
use streamhub_gateway::GatewayState;
use streamhub_store::{MemoryStore, RedisStore, Store};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, resolved against the working directory.
const CONFIG_FILE: &str = "streamhub-config.yaml";

/// Environment variable naming an alternative configuration file.
const CONFIG_ENV: &str = "STREAMHUB_CONFIG";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, store connection or the gateway
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is configured from it, so this runs first.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging)?;
    info!(
        config = source.as_deref().unwrap_or("defaults"),
        backend = ?config.store.backend,
        prefix = config.hub.prefix,
        port = config.gateway.port,
        "streamhub-server starting"
    );

    // 3. Connect the store.
    let (store, redis) = connect_store(&config.store).await?;

    // 4. Build the hub and wait for the store.
    let hub = Hub::new(store, &config.hub);
    hub.wait_ready().await.map_err(AppError::from)?;
    info!("store ready");

    // 5. Serve until Ctrl-C.
    let state = Arc::new(GatewayState::new(hub, config.gateway));
    streamhub_gateway::start_server(Arc::clone(&state), shutdown_signal())
        .await
        .map_err(AppError::from)?;

    info!(
        live_sessions = state.live_sessions(),
        active_subscriptions = state.active_subscriptions(),
        "gateway drained"
    );

    if let Some(redis) = redis
        && let Err(e) = redis.quit().await
    {
        warn!(error = %e, "closing Redis connection failed");
    }

    info!("streamhub-server stopped");
    Ok(())
}

/// Load configuration from `$STREAMHUB_CONFIG`, then `streamhub-config.yaml`.
///
/// A missing file is not an error: defaults plus environment overrides
/// are used instead. Returns the path that was read, if any.
fn load_config() -> Result<(StreamhubConfig, Option<String>), AppError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_e| CONFIG_FILE.to_owned());
    if Path::new(&path).exists() {
        let config = StreamhubConfig::from_file(Path::new(&path))?;
        Ok((config, Some(path)))
    } else {
        let mut config = StreamhubConfig::default();
        config.apply_env_overrides();
        Ok((config, None))
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_tracing(logging: &LoggingConfig) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_e| EnvFilter::try_new(&logging.level))
        .map_err(|e| AppError::Logging {
            message: format!("invalid log filter {:?}: {e}", logging.level),
        })?;

    let installed = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
    installed.map_err(|e| AppError::Logging {
        message: format!("{e}"),
    })
}

/// Open the configured backend.
///
/// The Redis handle is returned separately so `main` can close it on exit.
async fn connect_store(
    config: &StoreConfig,
) -> Result<(Arc<dyn Store>, Option<RedisStore>), AppError> {
    match config.backend {
        StoreBackend::Redis => {
            info!(url = config.url, "connecting to Redis");
            let redis = RedisStore::connect_with(&config.url, config.reconnect()).await?;
            Ok((Arc::new(redis.clone()), Some(redis)))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store; data is lost on exit");
            Ok((Arc::new(MemoryStore::new()), None))
        }
    }
}

/// Resolve on Ctrl-C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            // Without a signal handler the server can only be killed.
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
