//! Order Book Sync - Level-3 Replica Service
//!
//! Keeps per-order replicas of exchange order books in sync from REST
//! snapshots and the full channel WebSocket feed, and publishes aggregated
//! state to other system components.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderbook_sync::{
    AppState, BookView, Config, FeedMetrics, OrderBookManager, Publisher, RestSnapshotProvider,
    WebSocketManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Order Book Sync");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        products = ?config.products,
        max_buffered_events = ?config.max_buffered_events,
        "Configuration loaded"
    );

    // One replica per configured product
    let mut books = OrderBookManager::with_buffer_limit(config.max_buffered_events);
    for product_id in &config.products {
        books.add_product(product_id);
    }

    let metrics = Arc::new(FeedMetrics::new()?);

    // Initialize publisher for IPC
    let publisher = Arc::new(Publisher::new(&config.ipc_socket_path).await?);

    // Create shared application state
    let state = Arc::new(AppState {
        orderbook_manager: Arc::new(RwLock::new(books)),
        publisher,
        config: config.clone(),
        metrics,
    });

    // Start health check server
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Start WebSocket manager
    let provider = Arc::new(RestSnapshotProvider::new(&config.rest_endpoint)?);
    let mut ws_manager = WebSocketManager::new(state, provider);
    ws_manager.run().await?;

    Ok(())
}

/// Start HTTP server for health checks, metrics and book inspection
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/book/:product", get(book))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let manager = state.orderbook_manager.read().await;
    let products: serde_json::Map<String, serde_json::Value> = manager
        .products()
        .into_iter()
        .map(|product_id| {
            let live = manager.is_live(&product_id);
            let sequence = manager.get(&product_id).and_then(|book| book.sequence());
            (
                product_id,
                serde_json::json!({ "live": live, "sequence": sequence }),
            )
        })
        .collect();
    let all_live = products.values().all(|p| p["live"] == true);

    Json(serde_json::json!({
        "status": if all_live { "healthy" } else { "syncing" },
        "component": "orderbook-sync",
        "products": products,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    state.metrics.encode().map_err(|e| {
        warn!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn book(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
) -> Result<Json<BookView>, StatusCode> {
    let manager = state.orderbook_manager.read().await;
    manager
        .current_view(&product.to_uppercase())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
