// =============================================================================
// Configuration — TOML-loaded, defaulted, atomically persisted
// =============================================================================
//
// Every field carries `#[serde(default = "...")]` so an older or partial
// config file still loads cleanly. `Config::load` falls back to defaults
// with a warning when the file is absent; `Config::save` uses the same
// atomic tmp + rename pattern the engine uses for its own runtime state.
//
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;

fn default_true() -> bool {
    true
}

// --- server ------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// --- db ------------------------------------------------------------

fn default_db_path() -> String {
    "storage/hynous-data.db".to_string()
}
fn default_prune_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_prune_days")]
    pub prune_days: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            prune_days: default_prune_days(),
        }
    }
}

// --- rate_limit ------------------------------------------------------------

fn default_max_weight_per_min() -> u32 {
    1200
}
fn default_safety_pct() -> u32 {
    85
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_weight_per_min")]
    pub max_weight_per_min: u32,
    #[serde(default = "default_safety_pct")]
    pub safety_pct: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_weight_per_min: default_max_weight_per_min(),
            safety_pct: default_safety_pct(),
        }
    }
}

// --- trade_stream ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStreamConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TradeStreamConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// --- position_poller ------------------------------------------------------------

fn default_workers() -> usize {
    8
}
fn default_tier1_interval() -> u64 {
    30
}
fn default_tier2_interval() -> u64 {
    120
}
fn default_tier3_interval() -> u64 {
    600
}
fn default_whale_threshold() -> f64 {
    1_000_000.0
}
fn default_mid_threshold() -> f64 {
    100_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionPollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_tier1_interval")]
    pub tier1_interval: u64,
    #[serde(default = "default_tier2_interval")]
    pub tier2_interval: u64,
    #[serde(default = "default_tier3_interval")]
    pub tier3_interval: u64,
    #[serde(default = "default_whale_threshold")]
    pub whale_threshold: f64,
    #[serde(default = "default_mid_threshold")]
    pub mid_threshold: f64,
}

impl Default for PositionPollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_workers(),
            tier1_interval: default_tier1_interval(),
            tier2_interval: default_tier2_interval(),
            tier3_interval: default_tier3_interval(),
            whale_threshold: default_whale_threshold(),
            mid_threshold: default_mid_threshold(),
        }
    }
}

// --- hlp_tracker ------------------------------------------------------------

fn default_poll_interval() -> u64 {
    60
}
fn default_vaults() -> Vec<String> {
    vec![
        "0xdfc24b077bc1425ad1dea75bcb6f8158e10df303".to_string(),
        "0x010461c14e146ac35fe42271bdc1134ee31c703a".to_string(),
        "0x35cfc9c671b9a2f43fa23f3f08fb46e6a893463e".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlpTrackerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_vaults")]
    pub vaults: Vec<String>,
}

impl Default for HlpTrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_poll_interval(),
            vaults: default_vaults(),
        }
    }
}

// --- heatmap ------------------------------------------------------------

fn default_recompute_interval() -> u64 {
    10
}
fn default_bucket_count() -> u32 {
    50
}
fn default_range_pct() -> f64 {
    15.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapConfig {
    #[serde(default = "default_recompute_interval")]
    pub recompute_interval: u64,
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,
    #[serde(default = "default_range_pct")]
    pub range_pct: f64,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            recompute_interval: default_recompute_interval(),
            bucket_count: default_bucket_count(),
            range_pct: default_range_pct(),
        }
    }
}

// --- order_flow ------------------------------------------------------------

fn default_windows() -> Vec<u64> {
    vec![60, 300, 900, 3600]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFlowConfig {
    #[serde(default = "default_windows")]
    pub windows: Vec<u64>,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            windows: default_windows(),
        }
    }
}

// --- smart_money ------------------------------------------------------------

fn default_profile_window_days() -> u32 {
    7
}
fn default_profile_refresh_hours() -> u32 {
    2
}
fn default_min_equity() -> f64 {
    50_000.0
}
fn default_min_trades_for_profile() -> u32 {
    5
}
fn default_bot_trades_per_day() -> f64 {
    50.0
}
fn default_bot_avg_hold_min() -> f64 {
    2.0
}
fn default_max_profiles_per_cycle() -> u32 {
    50
}
fn default_alert_min_size_usd() -> f64 {
    50_000.0
}
fn default_alert_min_win_rate() -> f64 {
    0.55
}
fn default_auto_curate_min_win_rate() -> f64 {
    0.55
}
fn default_auto_curate_min_trades() -> u32 {
    10
}
fn default_auto_curate_min_profit_factor() -> f64 {
    1.5
}
fn default_auto_curate_max_wallets() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartMoneyConfig {
    #[serde(default = "default_profile_window_days")]
    pub profile_window_days: u32,
    #[serde(default = "default_profile_refresh_hours")]
    pub profile_refresh_hours: u32,
    #[serde(default = "default_min_equity")]
    pub min_equity: f64,
    #[serde(default = "default_min_trades_for_profile")]
    pub min_trades_for_profile: u32,
    #[serde(default = "default_bot_trades_per_day")]
    pub bot_trades_per_day: f64,
    #[serde(default = "default_bot_avg_hold_min")]
    pub bot_avg_hold_min: f64,
    #[serde(default = "default_max_profiles_per_cycle")]
    pub max_profiles_per_cycle: u32,
    #[serde(default = "default_alert_min_size_usd")]
    pub alert_min_size_usd: f64,
    #[serde(default = "default_alert_min_win_rate")]
    pub alert_min_win_rate: f64,
    #[serde(default = "default_true")]
    pub auto_curate_enabled: bool,
    #[serde(default = "default_auto_curate_min_win_rate")]
    pub auto_curate_min_win_rate: f64,
    #[serde(default = "default_auto_curate_min_trades")]
    pub auto_curate_min_trades: u32,
    #[serde(default = "default_auto_curate_min_profit_factor")]
    pub auto_curate_min_profit_factor: f64,
    #[serde(default = "default_auto_curate_max_wallets")]
    pub auto_curate_max_wallets: u32,
    #[serde(default = "default_true")]
    pub auto_curate_exclude_bots: bool,
}

impl Default for SmartMoneyConfig {
    fn default() -> Self {
        Self {
            profile_window_days: default_profile_window_days(),
            profile_refresh_hours: default_profile_refresh_hours(),
            min_equity: default_min_equity(),
            min_trades_for_profile: default_min_trades_for_profile(),
            bot_trades_per_day: default_bot_trades_per_day(),
            bot_avg_hold_min: default_bot_avg_hold_min(),
            max_profiles_per_cycle: default_max_profiles_per_cycle(),
            alert_min_size_usd: default_alert_min_size_usd(),
            alert_min_win_rate: default_alert_min_win_rate(),
            auto_curate_enabled: true,
            auto_curate_min_win_rate: default_auto_curate_min_win_rate(),
            auto_curate_min_trades: default_auto_curate_min_trades(),
            auto_curate_min_profit_factor: default_auto_curate_min_profit_factor(),
            auto_curate_max_wallets: default_auto_curate_max_wallets(),
            auto_curate_exclude_bots: true,
        }
    }
}

// --- logging ------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// --- top-level ------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub trade_stream: TradeStreamConfig,
    #[serde(default)]
    pub position_poller: PositionPollerConfig,
    #[serde(default)]
    pub hlp_tracker: HlpTrackerConfig,
    #[serde(default)]
    pub heatmap: HeatmapConfig,
    #[serde(default)]
    pub order_flow: OrderFlowConfig,
    #[serde(default)]
    pub smart_money: SmartMoneyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`. Falls back to
    /// `Config::default()` with a warning if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| CoreError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        use anyhow::Context;
        let path = path.as_ref();

        let content = toml::to_string_pretty(self).context("failed to serialise config")?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8100);
        assert_eq!(cfg.rate_limit.max_weight_per_min, 1200);
        assert_eq!(cfg.rate_limit.safety_pct, 85);
        assert_eq!(cfg.position_poller.workers, 8);
        assert_eq!(cfg.hlp_tracker.vaults.len(), 3);
        assert_eq!(cfg.order_flow.windows, vec![60, 300, 900, 3600]);
        assert!((cfg.smart_money.alert_min_win_rate - 0.55).abs() < f64::EPSILON);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn deserialise_empty_toml_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.db.prune_days, 7);
    }

    #[test]
    fn deserialise_partial_toml_fills_defaults() {
        let toml_str = r#"
            [server]
            port = 9000
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.rate_limit.max_weight_per_min, 1200);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).unwrap();
        let cfg2: Config = toml::from_str(&s).unwrap();
        assert_eq!(cfg.hlp_tracker.vaults, cfg2.hlp_tracker.vaults);
        assert_eq!(cfg.order_flow.windows, cfg2.order_flow.windows);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/path/does-not-exist.toml").unwrap();
        assert_eq!(cfg.server.port, 8100);
    }
}
