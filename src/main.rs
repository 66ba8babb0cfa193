use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sfs::{
    api, bus::EventBus, config::Config, object_store::LocalStore, storage, upload,
    upload::UploadService, widget, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sfs starting");

    let config = Config::load()?;

    let db = storage::Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    let blobs = LocalStore::new(&config.storage.blob_dir)?;
    info!("Storing blobs at: {}", config.storage.blob_dir);

    let (bus, hub) = EventBus::start(config.bus.clone());
    let uploads = UploadService::new(db.clone(), Arc::new(blobs), bus.clone(), &config.upload);

    // Background tasks: maintenance and in-process listeners
    let compaction = storage::spawn_compaction(db, config.storage.compact_interval);
    tokio::spawn(upload::log_file_events(bus.clone()));
    tokio::spawn(widget::run_widget_renderer(bus.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        bus: bus.clone(),
        uploads: uploads.clone(),
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for in-flight uploads");
    uploads.shutdown(config.upload.shutdown_grace).await;

    info!("Shutting down background tasks");
    compaction.abort();
    bus.close();
    if let Err(e) = hub.await {
        tracing::error!(error = %e, "Event bus stopped abnormally");
    }

    info!("Shutdown complete");
    Ok(())
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
