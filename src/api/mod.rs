//! API module - Axum HTTP server and routes
//!
//! All API endpoints for the prediction market.

mod handlers;
mod websocket;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ==========================================
        // Status & Health
        // ==========================================
        .route("/api/health", get(handlers::health_check))
        .route(
            "/api/pricing-config",
            get(handlers::get_pricing_config).put(handlers::update_pricing_config),
        )

        // ==========================================
        // Users & Positions
        // ==========================================
        .route("/api/users", post(handlers::register_user))
        .route("/api/users/:id", get(handlers::get_user))
        .route("/api/users/:id/positions", get(handlers::get_user_positions))

        // ==========================================
        // Markets
        // ==========================================
        .route(
            "/api/markets",
            get(handlers::list_markets).post(handlers::create_market),
        )
        .route("/api/markets/:id", get(handlers::get_market))
        .route("/api/markets/:id/trades", get(handlers::get_market_trades))
        .route("/api/markets/:id/stats", get(handlers::get_market_stats))
        .route("/api/markets/:id/resolve", post(handlers::resolve_market))

        // ==========================================
        // Quote & Trade Execution
        // ==========================================
        .route("/api/markets/:id/quote", get(handlers::get_quote))
        .route("/api/trades", post(handlers::execute_trade))

        // ==========================================
        // WebSocket for real-time updates
        // ==========================================
        .route("/ws", get(websocket::ws_handler))

        // Apply middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
