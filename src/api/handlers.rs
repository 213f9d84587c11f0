//! API request handlers
//!
//! All endpoint handlers for the market API.

use crate::db::NewMarket;
use crate::trading::TradeError;
use crate::types::{PricingConfigUpdate, TradeRequest};
use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const MAX_TRADES_LIMIT: usize = 500;

// ==========================================
// Response Helpers
// ==========================================

fn error_with_status(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": error
        }))
    ).into_response()
}

pub fn error_response(error: &str) -> Response {
    error_with_status(StatusCode::INTERNAL_SERVER_ERROR, error)
}

pub fn bad_request(error: &str) -> Response {
    error_with_status(StatusCode::BAD_REQUEST, error)
}

pub fn not_found(error: &str) -> Response {
    error_with_status(StatusCode::NOT_FOUND, error)
}

pub fn conflict(error: &str) -> Response {
    error_with_status(StatusCode::CONFLICT, error)
}

fn trade_error_response(err: TradeError) -> Response {
    let message = err.to_string();
    match err {
        TradeError::Validation(_) => bad_request(&message),
        TradeError::NotFound(_) => not_found(&message),
        TradeError::State(_) | TradeError::Slippage { .. } => conflict(&message),
        TradeError::Store(_) => error_response(&message),
    }
}

fn success<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data
    })).into_response()
}

fn respond<T: Serialize>(result: Result<T, TradeError>) -> Response {
    match result {
        Ok(data) => success(data),
        Err(e) => trade_error_response(e),
    }
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub outcome: String,
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub status: Option<String>,
}

/// Raw strings so bad input gets the API's own error body
#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub side: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize { 50 }

// ==========================================
// Health & Config Handlers
// ==========================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "market_backend",
        "storage": state.engine.storage_backend(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn get_pricing_config(State(state): State<Arc<AppState>>) -> Response {
    success(state.engine.pricing_config())
}

pub async fn update_pricing_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PricingConfigUpdate>, JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(&e.body_text()),
    };
    match state.engine.update_pricing_config(update) {
        Ok(config) => success(config),
        Err(e) => bad_request(&e.to_string()),
    }
}

// ==========================================
// User Handlers
// ==========================================

pub async fn register_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(&e.body_text()),
    };
    respond(state.engine.register_user(&req.wallet_address).await)
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    respond(state.engine.get_user(user_id).await)
}

pub async fn get_user_positions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    respond(state.engine.user_positions(user_id).await)
}

// ==========================================
// Market Handlers
// ==========================================

pub async fn create_market(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewMarket>, JsonRejection>,
) -> Response {
    let Json(new_market) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(&e.body_text()),
    };
    match state.engine.create_market(new_market).await {
        Ok(market) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "success": true,
                "data": market
            }))
        ).into_response(),
        Err(e) => trade_error_response(e),
    }
}

pub async fn list_markets(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MarketsQuery>, QueryRejection>,
) -> Response {
    let Query(params) = match query {
        Ok(query) => query,
        Err(e) => return bad_request(&e.body_text()),
    };
    respond(state.engine.list_markets(params.status.as_deref()).await)
}

pub async fn get_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
) -> Response {
    respond(state.engine.get_market(market_id).await)
}

pub async fn get_market_trades(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    query: Result<Query<TradesQuery>, QueryRejection>,
) -> Response {
    let Query(params) = match query {
        Ok(query) => query,
        Err(e) => return bad_request(&e.body_text()),
    };
    let limit = params.limit.clamp(1, MAX_TRADES_LIMIT);
    respond(state.engine.market_trades(market_id, limit).await)
}

pub async fn get_market_stats(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
) -> Response {
    respond(state.engine.market_stats(market_id).await)
}

pub async fn resolve_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(&e.body_text()),
    };
    respond(state.engine.resolve_market(market_id, &req.outcome).await)
}

// ==========================================
// Quote & Trade Handlers
// ==========================================

pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Query(params): Query<QuoteQuery>,
) -> Response {
    let Some(side) = params.side else {
        return bad_request("Query parameter 'side' is required");
    };
    let amount = match params.amount.as_deref().map(|a| a.trim().parse::<Decimal>()) {
        Some(Ok(amount)) => amount,
        Some(Err(_)) => return bad_request("Amount must be a number"),
        None => return bad_request("Query parameter 'amount' is required"),
    };

    respond(state.engine.quote(market_id, &side, amount).await)
}

pub async fn execute_trade(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TradeRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(&e.body_text()),
    };
    respond(state.engine.execute_trade(req).await)
}
