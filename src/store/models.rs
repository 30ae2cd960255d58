// =============================================================================
// Row types mirrored from the SQLite schema
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AddressRow {
    pub address: String,
    pub first_seen: f64,
    pub last_seen: f64,
    pub trade_count: i64,
    pub last_polled: Option<f64>,
    pub tier: i64,
    pub total_size_usd: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PositionRow {
    pub address: String,
    pub coin: String,
    pub side: String,
    pub size: f64,
    pub size_usd: f64,
    pub entry_px: f64,
    pub mark_px: f64,
    pub leverage: f64,
    pub margin_used: f64,
    pub liq_px: Option<f64>,
    pub unrealized_pnl: f64,
    pub updated_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HlpSnapshotRow {
    pub vault_address: String,
    pub coin: String,
    pub snapshot_at: f64,
    pub side: String,
    pub size: f64,
    pub size_usd: f64,
    pub entry_px: f64,
    pub mark_px: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PnlSnapshotRow {
    pub address: String,
    pub snapshot_at: f64,
    pub equity: f64,
    pub unrealized: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchedWalletRow {
    pub address: String,
    pub label: String,
    pub added_at: f64,
    pub is_active: bool,
    pub notes: String,
    pub tags: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct WalletProfileRow {
    pub address: String,
    pub computed_at: f64,
    pub win_rate: Option<f64>,
    pub trade_count: Option<i64>,
    pub profit_factor: Option<f64>,
    pub avg_hold_hours: Option<f64>,
    pub avg_pnl_pct: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub style: Option<String>,
    pub is_bot: bool,
    pub equity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionChangeRow {
    pub id: i64,
    pub address: String,
    pub coin: String,
    pub action: String,
    pub side: Option<String>,
    pub size_usd: Option<f64>,
    pub price: Option<f64>,
    pub detected_at: f64,
}
