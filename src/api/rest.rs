// =============================================================================
// Read API — Axum 0.7
// =============================================================================
//
// Every handler borrows the relevant engine/store handle out of the typed
// `AppState` and calls the corresponding engine-level operation directly — no
// business logic lives here. Engine operations already return safe defaults,
// so a handler's only job is status-code mapping.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::util::unix_time;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/heatmap/:coin", get(heatmap))
        .route("/hlp/positions", get(hlp_positions))
        .route("/hlp/sentiment", get(hlp_sentiment))
        .route("/order-flow/:coin", get(orderflow))
        .route("/whales/:coin", get(whales))
        .route("/smart-money", get(smart_money_rankings))
        .route("/watchlist", get(watchlist))
        .route("/watchlist/changes", get(smart_money_changes))
        .route("/watchlist/:addr/profile", get(wallet_profile))
        .route("/watchlist/:addr", post(add_watch).delete(remove_watch))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(cors)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let conn = state.store.read_conn();
    let addresses_discovered: i64 = conn.query_row("SELECT COUNT(*) FROM addresses", [], |r| r.get(0)).unwrap_or(0);
    let positions_tracked: i64 = conn.query_row("SELECT COUNT(*) FROM positions", [], |r| r.get(0)).unwrap_or(0);
    drop(conn);

    let ws_healthy = state.trade_stream.is_healthy();
    let status = if ws_healthy { "ok" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "uptime_seconds": state.uptime_seconds(),
        "addresses_discovered": addresses_discovered,
        "positions_tracked": positions_tracked,
        "ws_healthy": ws_healthy,
    }))
}

async fn heatmap(State(state): State<Arc<AppState>>, Path(coin): Path<String>) -> impl IntoResponse {
    match state.heatmap.get_heatmap(&coin) {
        Some(h) => {
            let data_age_seconds = unix_time() - h.summary.computed_at;
            let mut value = serde_json::to_value(h).unwrap();
            if let Some(obj) = value.as_object_mut() {
                obj.insert("data_age_seconds".to_string(), serde_json::json!(data_age_seconds));
            }
            Json(value).into_response()
        }
        None => (StatusCode::NOT_FOUND, "heatmap not available").into_response(),
    }
}

async fn hlp_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hlp_tracker.get_positions())
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    #[serde(default = "default_sentiment_hours")]
    hours: f64,
}
fn default_sentiment_hours() -> f64 {
    24.0
}

async fn hlp_sentiment(State(state): State<Arc<AppState>>, Query(q): Query<HoursQuery>) -> impl IntoResponse {
    let hours = q.hours.clamp(1.0, 168.0);
    match state.hlp_tracker.get_sentiment(hours) {
        Ok(s) => Json(s).into_response(),
        Err(e) => {
            warn!(error = %e, "hlp sentiment query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response()
        }
    }
}

async fn orderflow(State(state): State<Arc<AppState>>, Path(coin): Path<String>) -> impl IntoResponse {
    Json(state.order_flow.get_order_flow(&coin))
}

#[derive(Debug, Deserialize)]
struct TopNQuery {
    #[serde(default = "default_top_n")]
    top_n: u32,
}
fn default_top_n() -> u32 {
    50
}

async fn whales(State(state): State<Arc<AppState>>, Path(coin): Path<String>, Query(q): Query<TopNQuery>) -> impl IntoResponse {
    let top_n = q.top_n.clamp(1, 500);
    match state.whale_tracker.get_whales(&coin, top_n) {
        Ok(r) => Json(r).into_response(),
        Err(e) => {
            warn!(error = %e, "whale query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SmartMoneyQuery {
    #[serde(default = "default_top_n_smart_money")]
    top_n: usize,
    min_win_rate: Option<f64>,
    style: Option<String>,
    #[serde(default)]
    exclude_bots: bool,
    min_trades: Option<i64>,
}
fn default_top_n_smart_money() -> usize {
    50
}

async fn smart_money_rankings(State(state): State<Arc<AppState>>, Query(q): Query<SmartMoneyQuery>) -> impl IntoResponse {
    let top_n = q.top_n.clamp(1, 200);
    let rankings = match state.smart_money.get_rankings(top_n) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "smart money rankings query failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response();
        }
    };

    let filtered: Vec<_> = rankings
        .rankings
        .into_iter()
        .filter(|r| q.min_win_rate.map_or(true, |min| r.win_rate.unwrap_or(0.0) >= min))
        .filter(|r| q.style.as_ref().map_or(true, |s| r.style.as_deref() == Some(s.as_str())))
        .filter(|r| !q.exclude_bots || !r.is_bot)
        .filter(|r| q.min_trades.map_or(true, |min| r.trade_count.unwrap_or(0) >= min))
        .collect();

    Json(serde_json::json!({
        "rankings": filtered,
        "count": filtered.len(),
        "window_hours": rankings.window_hours,
    }))
    .into_response()
}

async fn watchlist(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let conn = state.store.read_conn();
    let result: rusqlite::Result<Vec<crate::store::models::WatchedWalletRow>> = (|| {
        let mut stmt = conn.prepare(
            "SELECT address, label, added_at, is_active, notes, tags FROM watched_wallets WHERE is_active = 1",
        )?;
        stmt.query_map([], |r| {
            Ok(crate::store::models::WatchedWalletRow {
                address: r.get(0)?,
                label: r.get(1)?,
                added_at: r.get(2)?,
                is_active: r.get(3)?,
                notes: r.get(4)?,
                tags: r.get(5)?,
            })
        })?
        .collect()
    })();
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "watchlist query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response()
        }
    }
}

async fn wallet_profile(State(state): State<Arc<AppState>>, Path(addr): Path<String>) -> impl IntoResponse {
    let address = addr.to_lowercase();
    let conn = state.store.read_conn();
    let result = conn.query_row(
        "SELECT address, computed_at, win_rate, trade_count, profit_factor, avg_hold_hours, \
         avg_pnl_pct, max_drawdown, style, is_bot, equity FROM wallet_profiles WHERE address = ?1",
        [&address],
        |r| {
            Ok(crate::store::models::WalletProfileRow {
                address: r.get(0)?,
                computed_at: r.get(1)?,
                win_rate: r.get(2)?,
                trade_count: r.get(3)?,
                profit_factor: r.get(4)?,
                avg_hold_hours: r.get(5)?,
                avg_pnl_pct: r.get(6)?,
                max_drawdown: r.get(7)?,
                style: r.get(8)?,
                is_bot: r.get(9)?,
                equity: r.get(10)?,
            })
        },
    );
    match result {
        Ok(profile) => Json(profile).into_response(),
        Err(rusqlite::Error::QueryReturnedNoRows) => (StatusCode::NOT_FOUND, "no profile for address").into_response(),
        Err(e) => {
            warn!(error = %e, "wallet profile query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MinutesQuery {
    #[serde(default = "default_changes_minutes")]
    minutes: f64,
}
fn default_changes_minutes() -> f64 {
    60.0
}

async fn smart_money_changes(State(state): State<Arc<AppState>>, Query(q): Query<MinutesQuery>) -> impl IntoResponse {
    let minutes = q.minutes.clamp(1.0, 1440.0);
    let cutoff = unix_time() - minutes * 60.0;
    let conn = state.store.read_conn();
    let result: rusqlite::Result<Vec<crate::store::models::PositionChangeRow>> = (|| {
        let mut stmt = conn.prepare(
            "SELECT id, address, coin, action, side, size_usd, price, detected_at FROM position_changes \
             WHERE detected_at >= ?1 ORDER BY detected_at DESC",
        )?;
        stmt.query_map([cutoff], |r| {
            Ok(crate::store::models::PositionChangeRow {
                id: r.get(0)?,
                address: r.get(1)?,
                coin: r.get(2)?,
                action: r.get(3)?,
                side: r.get(4)?,
                size_usd: r.get(5)?,
                price: r.get(6)?,
                detected_at: r.get(7)?,
            })
        })?
        .collect()
    })();
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "position changes query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response()
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct WatchRequest {
    #[serde(default)]
    label: String,
}

const MIN_ADDRESS_LEN: usize = 10;

async fn add_watch(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
    Query(req): Query<WatchRequest>,
) -> impl IntoResponse {
    let addr = addr.to_lowercase();
    if addr.len() < MIN_ADDRESS_LEN {
        return (StatusCode::BAD_REQUEST, "address is too short").into_response();
    }
    let conn = state.store.write_lock();
    let result = conn.execute(
        "INSERT INTO watched_wallets (address, label, added_at, is_active) VALUES (?1, ?2, ?3, 1) \
         ON CONFLICT(address) DO UPDATE SET label = excluded.label, is_active = 1",
        rusqlite::params![addr, req.label, unix_time()],
    );
    match result {
        Ok(_) => (StatusCode::OK, "watched").into_response(),
        Err(e) => {
            warn!(error = %e, "failed to add watch");
            (StatusCode::INTERNAL_SERVER_ERROR, "insert failed").into_response()
        }
    }
}

async fn remove_watch(State(state): State<Arc<AppState>>, Path(addr): Path<String>) -> impl IntoResponse {
    let addr = addr.to_lowercase();
    let conn = state.store.write_lock();
    match conn.execute("UPDATE watched_wallets SET is_active = 0 WHERE address = ?1", [&addr]) {
        Ok(0) => (StatusCode::NOT_FOUND, "address not watched").into_response(),
        Ok(_) => (StatusCode::OK, "unwatched").into_response(),
        Err(e) => {
            warn!(error = %e, "failed to remove watch");
            (StatusCode::INTERNAL_SERVER_ERROR, "update failed").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    uptime_seconds: u64,
    rate_limiter: crate::rate_limiter::RateLimiterStats,
    trade_stream: serde_json::Value,
    position_poller: serde_json::Value,
    hlp_tracker: serde_json::Value,
    heatmap: serde_json::Value,
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        rate_limiter: state.rate_limiter.stats(),
        trade_stream: state.trade_stream.stats(),
        position_poller: state.position_poller.stats(),
        hlp_tracker: state.hlp_tracker.stats(),
        heatmap: state.heatmap.stats(),
    })
}
