mod api;
mod metrics;
mod state;

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ortelius_core::batch::{BatchClient, HttpBatchClient, SimulatedBatchClient};
use ortelius_core::config::{
    load_config, validate_config, BatchBackend, Config, SanitizedConfig, StorageBackend,
};
use ortelius_core::project::{ProjectStore, SqliteProjectStore};
use ortelius_core::storage::{GcsObjectStore, MemoryObjectStore, ObjectStore};

use crate::api::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("ORTELIUS_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    info!("Loading configuration from {}", config_path);
    let config = load_config(&config_path)?;
    validate_config(&config)?;

    let sanitized = serde_json::to_string(&SanitizedConfig::from(&config))?;
    let config_hash = format!("{:x}", Sha256::digest(sanitized.as_bytes()));
    info!("Configuration loaded (hash {})", &config_hash[..16]);

    let project_store: Arc<dyn ProjectStore> =
        Arc::new(SqliteProjectStore::new(&config.database.path)?);
    info!(
        "Project store initialized at {}",
        config.database.path.display()
    );

    let object_store = build_object_store(&config)?;
    let batch_client = build_batch_client(&config)?;

    metrics::register_metrics();

    let state = Arc::new(AppState::new(
        config.clone(),
        project_store,
        object_store,
        batch_client,
    )?);

    if let Some(runner) = state.runner() {
        runner.start();
    }

    let app = create_router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(runner) = state.runner() {
        runner.stop();
    }
    info!("Shutdown complete");
    Ok(())
}

fn build_object_store(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let base_url = format!(
                "http://{}:{}/api/v1/storage",
                loopback_host(&config.server.host),
                config.server.port
            );
            info!("Using in-memory object storage (dev mode)");
            Ok(Arc::new(MemoryObjectStore::new(base_url, "dev-signing-key")))
        }
        StorageBackend::Gcs => {
            let gcs = config
                .storage
                .gcs
                .clone()
                .context("storage.gcs section is required for the gcs backend")?;
            info!(
                "Using GCS object storage (buckets: {}, {})",
                config.storage.uploads_bucket, config.storage.outputs_bucket
            );
            Ok(Arc::new(GcsObjectStore::new(
                gcs,
                config.storage.uploads_bucket.clone(),
                config.storage.outputs_bucket.clone(),
            )))
        }
    }
}

fn build_batch_client(config: &Config) -> anyhow::Result<Arc<dyn BatchClient>> {
    match config.batch.backend {
        BatchBackend::Simulated => {
            info!("Using simulated batch backend");
            Ok(Arc::new(SimulatedBatchClient::new(
                config.batch.simulated.clone(),
            )))
        }
        BatchBackend::Cloud => {
            let cloud = config
                .batch
                .cloud
                .clone()
                .context("batch.cloud section is required for the cloud backend")?;
            info!(
                "Using cloud batch backend ({}/{})",
                cloud.project, cloud.region
            );
            Ok(Arc::new(HttpBatchClient::new(cloud)))
        }
    }
}

/// Signed URLs for the memory backend must be reachable by clients,
/// which the wildcard bind address is not.
fn loopback_host(host: &str) -> &str {
    if host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        host
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
