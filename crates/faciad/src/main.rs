use std::sync::Arc;

use anyhow::Result;
use facia_core::FaceAnalyzer;
use facia_onnx::OnnxFaceAnalyzer;
use facia_store::GalleryStore;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod manager;

use config::Config;
use manager::GalleryManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faciad starting");
    let config = Config::from_env();

    let store = GalleryStore::open(&config.db_path, &config.faces_dir).await?;
    let manager = Arc::new(GalleryManager::new(store, config.match_threshold));
    let admitted = manager.reload().await?;
    tracing::info!(
        records = admitted,
        threshold = config.match_threshold,
        "gallery loaded"
    );

    // Fail fast if the models are missing; a daemon that cannot analyze
    // images has nothing to serve.
    let analyzer: Arc<dyn FaceAnalyzer> = Arc::new(OnnxFaceAnalyzer::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )?);

    let app = api::router(manager, analyzer);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "faciad listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faciad shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
