use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use token_monitor::routes::{create_router, AppState};
use token_monitor::services::CacheTtl;
use token_monitor::utils::init_logger;
use token_monitor::{storage, Cache, Settings, UsageDataStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the working directory if present
    dotenvy::dotenv().ok();

    // Load configuration first (needed for logger initialization)
    let settings = Settings::new()?;

    init_logger(&settings)?;

    info!("🚀 Token monitor starting...");

    if let Err(e) = settings.validate() {
        error!("❌ Configuration validation failed: {}", e);
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }
    info!("✅ Configuration validated");

    let backend = storage::connect(&settings)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open storage backend: {}", e))?;

    // Falls back to the in-process cache when Redis is unreachable
    let cache = Cache::connect(&settings).await;
    info!("🗄️  Cache backend: {:?}", cache.kind());

    let store = Arc::new(UsageDataStore::new(
        backend.clone(),
        cache,
        CacheTtl::from_settings(&settings.cache),
    ));
    info!("📊 Usage data store initialized");

    let app = create_router(Arc::new(AppState { store }));

    let bind_addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("🚀 Server ready on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("👋 Shutting down...");
    backend.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}
