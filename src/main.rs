use std::sync::Arc;

use downloader_backend::{
    artifact::ArtifactStore,
    config::{PUBLIC_DOWNLOADS_PREFIX, Settings},
    error::ApiError,
    extractor::YtDlpExtractor,
    orchestrator::Orchestrator,
    pacing::{NoPacing, PacingPolicy, RandomPacing},
    routes::{self, AppState},
    strategy::DefaultCatalog,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "downloader_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let settings = Settings::from_env();

    let store = ArtifactStore::new(&settings.download_dir, PUBLIC_DOWNLOADS_PREFIX);
    store.ensure_dir().await?;

    let pacing: Arc<dyn PacingPolicy> = if settings.pacing_enabled {
        Arc::new(RandomPacing::default())
    } else {
        warn!("PACING_ENABLED=false: attempts will run without delays.");
        Arc::new(NoPacing)
    };

    let orchestrator = Orchestrator::new(
        store,
        Arc::new(DefaultCatalog),
        pacing,
        Arc::new(YtDlpExtractor::new(settings.yt_dlp_bin.clone())),
    );
    if settings.public_base_url.is_none() {
        warn!(
            "PUBLIC_BASE_URL is not set. Download links will be built from the request Host header over http, which is only suitable for development."
        );
    }

    let state = AppState::new(orchestrator, settings.public_base_url.clone());
    let app = routes::router(state, &settings)?;

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not bind {}: {error}",
                settings.bind_addr
            ))
        })?;

    info!(
        "Backend ready on http://{} serving {:?}",
        settings.bind_addr, settings.download_dir
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
