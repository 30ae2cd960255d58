// =============================================================================
// Liquidation heatmap engine
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::HeatmapConfig;
use crate::exchange::client::HyperliquidClient;
use crate::rate_limiter::RateLimiter;
use crate::store::Store;
use crate::util::unix_time;

#[derive(Debug, Clone, Serialize)]
pub struct Bucket {
    pub price_low: f64,
    pub price_high: f64,
    pub price_mid: f64,
    pub long_liq_usd: f64,
    pub short_liq_usd: f64,
    pub long_count: u32,
    pub short_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapSummary {
    pub total_long_liq_usd: f64,
    pub total_short_liq_usd: f64,
    pub total_positions: usize,
    pub computed_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
    pub coin: String,
    pub mid_price: f64,
    pub range_pct: f64,
    pub bucket_count: u32,
    pub buckets: Vec<Bucket>,
    pub summary: HeatmapSummary,
}

pub struct LiqHeatmapEngine {
    store: Arc<Store>,
    config: HeatmapConfig,
    exchange: HyperliquidClient,
    rate_limiter: Arc<RateLimiter>,
    cache: RwLock<HashMap<String, Heatmap>>,
    last_recompute: RwLock<f64>,
}

impl LiqHeatmapEngine {
    pub fn new(
        store: Arc<Store>,
        config: HeatmapConfig,
        exchange: HyperliquidClient,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            config,
            exchange,
            rate_limiter,
            cache: RwLock::new(HashMap::new()),
            last_recompute: RwLock::new(0.0),
        }
    }

    /// Spawn the periodic recompute loop. Returns the task handle so the
    /// caller can `.abort()` it on shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = self.config.recompute_interval, "heatmap engine starting");
            loop {
                if let Err(e) = self.recompute_all().await {
                    tracing::warn!(error = %e, "heatmap recompute error");
                }
                tokio::time::sleep(Duration::from_secs(self.config.recompute_interval)).await;
            }
        })
    }

    async fn recompute_all(&self) -> anyhow::Result<()> {
        let coins: Vec<String> = {
            let conn = self.store.read_conn();
            let mut stmt = conn.prepare("SELECT DISTINCT coin FROM positions")?;
            stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?
        };

        if !self.rate_limiter.acquire(2, Duration::from_secs(10)).await {
            debug!("rate limiter blocked heatmap all_mids()");
            return Ok(());
        }
        let mids = match self.exchange.all_mids().await {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "failed to fetch mid prices for heatmap");
                return Ok(());
            }
        };

        let mut new_cache = HashMap::new();
        for coin in coins {
            let mid_px = *mids.get(&coin).unwrap_or(&0.0);
            if mid_px <= 0.0 {
                continue;
            }
            if let Some(heatmap) = self.compute_coin_heatmap(&coin, mid_px)? {
                new_cache.insert(coin, heatmap);
            }
        }

        *self.cache.write() = new_cache;
        *self.last_recompute.write() = unix_time();
        Ok(())
    }

    fn compute_coin_heatmap(&self, coin: &str, mid_px: f64) -> rusqlite::Result<Option<Heatmap>> {
        let conn = self.store.read_conn();
        let mut stmt = conn.prepare(
            "SELECT side, size_usd, liq_px FROM positions WHERE coin = ?1 AND liq_px IS NOT NULL AND liq_px > 0",
        )?;
        let rows: Vec<(String, f64, f64)> = stmt
            .query_map([coin], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?;

        if rows.is_empty() {
            return Ok(None);
        }

        let range_pct = self.config.range_pct / 100.0;
        let low = mid_px * (1.0 - range_pct);
        let high = mid_px * (1.0 + range_pct);
        let n_buckets = self.config.bucket_count;
        let bucket_size = (high - low) / n_buckets as f64;

        let mut buckets: Vec<Bucket> = (0..n_buckets)
            .map(|i| {
                let price_low = low + i as f64 * bucket_size;
                let price_high = price_low + bucket_size;
                Bucket {
                    price_low: round2(price_low),
                    price_high: round2(price_high),
                    price_mid: round2((price_low + price_high) / 2.0),
                    long_liq_usd: 0.0,
                    short_liq_usd: 0.0,
                    long_count: 0,
                    short_count: 0,
                }
            })
            .collect();

        let mut total_long_liq = 0.0;
        let mut total_short_liq = 0.0;

        for (side, size_usd, liq_px) in &rows {
            if *liq_px <= 0.0 || *liq_px < low || *liq_px >= high {
                continue;
            }
            let idx = (((*liq_px - low) / bucket_size) as usize).min(n_buckets as usize - 1);
            if side == "long" {
                buckets[idx].long_liq_usd += size_usd;
                buckets[idx].long_count += 1;
                total_long_liq += size_usd;
            } else {
                buckets[idx].short_liq_usd += size_usd;
                buckets[idx].short_count += 1;
                total_short_liq += size_usd;
            }
        }

        for b in &mut buckets {
            b.long_liq_usd = round2(b.long_liq_usd);
            b.short_liq_usd = round2(b.short_liq_usd);
        }

        Ok(Some(Heatmap {
            coin: coin.to_string(),
            mid_price: mid_px,
            range_pct: self.config.range_pct,
            bucket_count: n_buckets,
            buckets,
            summary: HeatmapSummary {
                total_long_liq_usd: round2(total_long_liq),
                total_short_liq_usd: round2(total_short_liq),
                total_positions: rows.len(),
                computed_at: unix_time(),
            },
        }))
    }

    pub fn get_heatmap(&self, coin: &str) -> Option<Heatmap> {
        self.cache.read().get(coin).cloned()
    }

    pub fn get_available_coins(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "cached_coins": self.cache.read().len(),
            "last_recompute": *self.last_recompute.read(),
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LiqHeatmapEngine {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-heatmap-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        LiqHeatmapEngine::new(
            store,
            HeatmapConfig { recompute_interval: 10, bucket_count: 10, range_pct: 10.0 },
            HyperliquidClient::new("https://api.hyperliquid.xyz"),
            Arc::new(RateLimiter::new(1200, 85)),
        )
    }

    fn insert_position(store: &Store, coin: &str, side: &str, size_usd: f64, liq_px: f64) {
        let conn = store.write_lock();
        conn.execute(
            "INSERT INTO positions (address, coin, side, size, size_usd, entry_px, mark_px, liq_px, updated_at) \
             VALUES (?1, ?2, ?3, 1, ?4, 1, 1, ?5, 1)",
            rusqlite::params![format!("0x{}{}", coin, side), coin, side, size_usd, liq_px],
        )
        .unwrap();
    }

    #[test]
    fn heatmap_bucket_totals_match_in_range_positions() {
        let engine = engine();
        insert_position(&engine.store, "BTC", "long", 500_000.0, 95_000.0);
        insert_position(&engine.store, "BTC", "long", 200_000.0, 92_000.0);
        insert_position(&engine.store, "BTC", "short", 300_000.0, 105_000.0);

        let heatmap = engine
            .compute_coin_heatmap("BTC", 100_000.0)
            .unwrap()
            .unwrap();
        assert_eq!(heatmap.summary.total_long_liq_usd, 700_000.0);
        assert_eq!(heatmap.summary.total_short_liq_usd, 300_000.0);
        assert_eq!(heatmap.summary.total_positions, 3);
    }

    #[test]
    fn out_of_range_liq_price_excluded_from_usd_but_counted() {
        let mut cfg_engine = engine();
        cfg_engine.config.range_pct = 5.0;
        insert_position(&cfg_engine.store, "ETH", "long", 500_000.0, 50_000.0);

        let heatmap = cfg_engine
            .compute_coin_heatmap("ETH", 100_000.0)
            .unwrap()
            .unwrap();
        assert_eq!(heatmap.summary.total_long_liq_usd, 0.0);
        assert_eq!(heatmap.summary.total_positions, 1);
    }

    #[test]
    fn no_positions_for_coin_returns_none() {
        let engine = engine();
        let heatmap = engine.compute_coin_heatmap("SOL", 100.0).unwrap();
        assert!(heatmap.is_none());
    }
}
