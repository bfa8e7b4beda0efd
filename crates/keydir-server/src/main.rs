//! Key Directory Server Binary
//!
//! Runs the directory HTTP server and its epoch ticker.

use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use keydir_server::{
    app_state, create_router, open_directory, spawn_ticker, tick_period, DirectoryKeys,
    FileStore, MemoryStore, ServerConfig, StateStore,
};

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env().expect("Invalid configuration");

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Initialize storage
    let store: Arc<dyn StateStore> = match &config.state_path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    let keys = DirectoryKeys::from_config(&config);
    let directory = open_directory(keys, store.as_ref(), &config)
        .await
        .expect("Failed to open directory");

    info!(
        kid = %directory.public_key().kid(),
        epoch = directory.current_epoch(),
        state_path = ?config.state_path,
        port = config.port,
        "Starting key directory server"
    );

    let port = config.port;
    let deadline = tick_period(&directory);
    let state = app_state(directory, store, config);
    let _ticker = spawn_ticker(state.clone(), deadline);

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Key directory listening");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
