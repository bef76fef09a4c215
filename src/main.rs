use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::{create_router, AppState, CompositionRoot, Config};
use rollcall_db::{init_database, RedbPersistence};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Optional: ROLLCALL_DB_PATH (default: ./rollcall.redb)");
            eprintln!("Optional: ROLLCALL_LISTEN_ADDR (default: 127.0.0.1:3000)");
            eprintln!("Optional: ROLLCALL_STATE_KEY (default: appState)");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting Rollcall server");
    tracing::info!("Listen address: {}", config.listen_addr);
    tracing::info!("Database: {}", config.db_path.display());

    // Open database
    let db = match init_database(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Database error: {}", e);
            std::process::exit(1);
        }
    };
    let port = Arc::new(RedbPersistence::new(db));

    // Compose modules
    let runtime = Arc::new(CompositionRoot::with_state_key(port, &config.state_key));
    if let Err(e) = runtime.start() {
        eprintln!("Startup error: {}", e);
        std::process::exit(1);
    }

    let app = create_router(AppState::new(runtime.clone()));

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", config.listen_addr, e);
            runtime.shutdown();
            std::process::exit(1);
        }
    };

    tracing::info!("Server running at http://{}", config.listen_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    runtime.shutdown();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("Shutdown requested");
}
