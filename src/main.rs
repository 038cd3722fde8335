use std::collections::VecDeque;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};

mod book;
mod config;
mod engine;
mod error;
mod state;
mod tasks;

use crate::book::{Order, Side};
use crate::config::load_config;
use crate::engine::Engine;
use crate::error::ApiError;
use crate::state::{AppState, PerfCounters, RECENT_TRADES_CAP};
use crate::tasks::start_background_tasks;

const TRADES_DEFAULT_LIMIT: usize = 50;

// ===== Wire schema =====

/// Incoming order body. `Index` is internal bookkeeping; any value a client
/// sends for it is ignored.
#[derive(Debug, Deserialize)]
struct OrderPayload {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Type")]
    side: Side,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Amount")]
    amount: i64,
}

#[derive(Debug, Serialize)]
struct OrderView {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Type")]
    side: Side,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Amount")]
    amount: i64,
    #[serde(rename = "Index")]
    index: i64,
}

impl OrderView {
    fn from_order(o: &Order) -> Self {
        Self {
            id: o.id,
            side: o.side,
            price: cents_to_f64(o.price_cents),
            amount: o.amount,
            index: o.heap_index,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

// Wire prices are numeric; the engine works in integer cents.
fn price_to_cents(price: f64) -> Option<i64> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let cents = (Decimal::try_from(price).ok()?.round_dp(2) * Decimal::from(100)).to_i64()?;
    (cents > 0).then_some(cents)
}

fn cents_to_f64(cents: i64) -> f64 {
    (Decimal::from(cents) / Decimal::from(100))
        .round_dp(2)
        .to_f64()
        .unwrap_or(0.0)
}

// ===== HTTP handlers =====

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<OrderPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    state.perf.submit_received.fetch_add(1, Ordering::Relaxed);
    let Ok(Json(req)) = payload else {
        state.perf.submit_rejected_invalid.fetch_add(1, Ordering::Relaxed);
        return Err(ApiError::bad_request("Invalid order format"));
    };
    if req.amount <= 0 {
        state.perf.submit_rejected_invalid.fetch_add(1, Ordering::Relaxed);
        return Err(ApiError::bad_request("Amount must be > 0"));
    }
    let Some(price_cents) = price_to_cents(req.price) else {
        state.perf.submit_rejected_invalid.fetch_add(1, Ordering::Relaxed);
        return Err(ApiError::bad_request("Price must be a positive finite number"));
    };
    state
        .engine
        .submit(Order::new(req.id, req.side, price_cents, req.amount))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"status": "ACCEPTED"})),
    ))
}

async fn get_orders(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snap = state.engine.book_snapshot().await;
    let buys: Vec<OrderView> = snap.buys.iter().map(OrderView::from_order).collect();
    let sells: Vec<OrderView> = snap.sells.iter().map(OrderView::from_order).collect();
    Ok(Json(serde_json::json!({"buys": buys, "sells": sells})))
}

async fn get_highest_buy_order(
    State(state): State<AppState>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state
        .engine
        .best_buy()
        .await
        .ok_or_else(|| ApiError::not_found("No resting buy orders"))?;
    Ok(Json(OrderView::from_order(&order)))
}

async fn get_highest_sell_order(
    State(state): State<AppState>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state
        .engine
        .best_sell()
        .await
        .ok_or_else(|| ApiError::not_found("No resting sell orders"))?;
    Ok(Json(OrderView::from_order(&order)))
}

async fn get_recent_trades(
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = q
        .limit
        .unwrap_or(TRADES_DEFAULT_LIMIT)
        .max(1)
        .min(RECENT_TRADES_CAP);
    let list = state.recent_trades.lock().await;
    let trades: Vec<serde_json::Value> = list
        .iter()
        .take(limit)
        .map(|t| {
            serde_json::json!({
                "timestamp": (t.ts_ms as f64) / 1000.0,
                "buy_order_id": t.buy_order_id,
                "sell_order_id": t.sell_order_id,
                "price": cents_to_f64(t.price_cents),
                "quantity": t.quantity,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({"count": trades.len(), "trades": trades})))
}

async fn get_system_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (resting_buy, resting_sell) = state.engine.depth().await;
    Ok(Json(serde_json::json!({
        "orders": {"resting_buy": resting_buy, "resting_sell": resting_sell},
        "counters": state.perf.snapshot_json(),
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(load_config()?);

    let (ingress_tx, ingress_rx) = mpsc::channel::<Order>(cfg.engine.ingress_queue_cap);
    let engine = Arc::new(Engine::new(cfg.engine.trade_price, ingress_tx));

    let state = AppState {
        cfg: cfg.clone(),
        engine,
        perf: Arc::new(PerfCounters::new()),
        recent_trades: Arc::new(Mutex::new(VecDeque::new())),
    };

    start_background_tasks(state.clone(), ingress_rx);

    let allowed_headers = [CONTENT_TYPE, ACCEPT];
    let allowed_methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors = if cfg.api.cors_origins.iter().any(|x| x == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/orders", post(create_order).get(get_orders))
        .route("/highest-buy-order", get(get_highest_buy_order))
        .route("/highest-sell-order", get(get_highest_sell_order))
        .route("/trades", get(get_recent_trades))
        .route("/stats", get(get_system_stats))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.api.host, cfg.api.port)
        .parse()
        .context("invalid API_HOST/API_PORT")?;
    eprintln!("[startup] matchbook listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
