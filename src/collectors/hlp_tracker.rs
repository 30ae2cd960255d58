// =============================================================================
// HLP vault tracker — polls known vault addresses on a fixed interval
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collectors::parse::{parse_positions, PriceBasis};
use crate::config::HlpTrackerConfig;
use crate::exchange::client::HyperliquidClient;
use crate::rate_limiter::RateLimiter;
use crate::store::Store;
use crate::util::unix_time;

#[derive(Debug, Clone, Serialize)]
pub struct VaultPosition {
    pub vault_address: String,
    pub coin: String,
    pub side: String,
    pub size: f64,
    pub size_usd: f64,
    pub entry_px: f64,
    pub mark_px: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CoinSentiment {
    pub coin: String,
    pub current_side: Option<String>,
    pub current_size_usd: f64,
    pub flips: u32,
}

#[derive(Default)]
struct Counters {
    total_polls: u64,
    total_snapshots: u64,
}

pub struct HlpTracker {
    store: Arc<Store>,
    rate_limiter: Arc<RateLimiter>,
    config: HlpTrackerConfig,
    exchange: HyperliquidClient,
    current_positions: RwLock<Vec<VaultPosition>>,
    counters: RwLock<Counters>,
}

impl HlpTracker {
    pub fn new(
        store: Arc<Store>,
        rate_limiter: Arc<RateLimiter>,
        config: HlpTrackerConfig,
        exchange: HyperliquidClient,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            config,
            exchange,
            current_positions: RwLock::new(Vec::new()),
            counters: RwLock::new(Counters::default()),
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(vaults = self.config.vaults.len(), "hlp tracker starting");
            loop {
                if let Err(e) = self.poll_all_vaults().await {
                    warn!(error = %e, "hlp tracker cycle error");
                }
                tokio::time::sleep(Duration::from_secs(self.config.poll_interval)).await;
            }
        })
    }

    async fn poll_all_vaults(&self) -> anyhow::Result<()> {
        let now = unix_time();
        let mut all_positions = Vec::new();

        for vault_addr in &self.config.vaults {
            if !self.rate_limiter.acquire(2, Duration::from_secs(10)).await {
                warn!(vault = %short(vault_addr), "rate limit — skipping vault");
                continue;
            }

            let state = match self.exchange.user_state(vault_addr).await {
                Ok(s) => {
                    self.counters.write().total_polls += 1;
                    s
                }
                Err(e) => {
                    debug!(vault = %short(vault_addr), error = %e, "failed to poll vault");
                    continue;
                }
            };

            let (positions, _total, _coins) = parse_positions(&state, PriceBasis::Entry);
            for p in positions {
                all_positions.push(VaultPosition {
                    vault_address: vault_addr.clone(),
                    coin: p.coin,
                    side: p.side,
                    size: p.size,
                    size_usd: p.size_usd,
                    entry_px: p.entry_px,
                    mark_px: p.mark_px,
                    leverage: p.leverage,
                    unrealized_pnl: p.unrealized_pnl,
                });
            }
        }

        *self.current_positions.write() = all_positions.clone();

        if !all_positions.is_empty() {
            let conn = self.store.write_lock();
            let result = (|| -> rusqlite::Result<()> {
                for p in &all_positions {
                    conn.execute(
                        "INSERT OR REPLACE INTO hlp_snapshots \
                         (vault_address, coin, snapshot_at, side, size, size_usd, entry_px, mark_px, leverage, unrealized_pnl) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        rusqlite::params![
                            p.vault_address, p.coin, now, p.side, p.size, p.size_usd,
                            p.entry_px, p.mark_px, p.leverage, p.unrealized_pnl,
                        ],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => self.counters.write().total_snapshots += all_positions.len() as u64,
                Err(e) => warn!(error = %e, "failed to write hlp snapshots"),
            }
        }

        Ok(())
    }

    pub fn get_positions(&self) -> Vec<VaultPosition> {
        self.current_positions.read().clone()
    }

    /// Net delta, side flips, and latest size per coin over the trailing window.
    pub fn get_sentiment(&self, hours: f64) -> rusqlite::Result<Vec<CoinSentiment>> {
        let cutoff = unix_time() - hours * 3600.0;
        let conn = self.store.read_conn();
        let mut stmt = conn.prepare(
            "SELECT coin, side, size_usd FROM hlp_snapshots \
             WHERE snapshot_at >= ?1 ORDER BY coin, snapshot_at",
        )?;
        let rows: Vec<(String, String, f64)> = stmt
            .query_map([cutoff], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?;

        let mut order: Vec<String> = Vec::new();
        let mut sentiment: std::collections::HashMap<String, (CoinSentiment, Option<String>)> =
            std::collections::HashMap::new();

        for (coin, side, size_usd) in rows {
            let entry = sentiment.entry(coin.clone()).or_insert_with(|| {
                order.push(coin.clone());
                (
                    CoinSentiment { coin: coin.clone(), ..Default::default() },
                    None,
                )
            });
            if let Some(prev) = &entry.1 {
                if prev != &side {
                    entry.0.flips += 1;
                }
            }
            entry.1 = Some(side.clone());
            entry.0.current_side = Some(side);
            entry.0.current_size_usd = size_usd;
        }

        Ok(order.into_iter().map(|c| sentiment.remove(&c).unwrap().0).collect())
    }

    pub fn stats(&self) -> serde_json::Value {
        let counters = self.counters.read();
        serde_json::json!({
            "vaults_tracked": self.config.vaults.len(),
            "total_polls": counters.total_polls,
            "total_snapshots": counters.total_snapshots,
            "current_positions": self.current_positions.read().len(),
        })
    }
}

fn short(addr: &str) -> String {
    addr.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(vaults: Vec<String>) -> HlpTracker {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-hlp-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        HlpTracker::new(
            store,
            Arc::new(RateLimiter::new(1200, 85)),
            HlpTrackerConfig { enabled: true, poll_interval: 60, vaults },
            HyperliquidClient::new("https://api.hyperliquid.xyz"),
        )
    }

    #[test]
    fn sentiment_counts_side_flips_over_window() {
        let t = tracker(vec!["0xvault".into()]);
        {
            let conn = t.store.write_lock();
            let now = unix_time();
            for (i, side) in ["long", "long", "short", "short"].iter().enumerate() {
                conn.execute(
                    "INSERT INTO hlp_snapshots (vault_address, coin, snapshot_at, side, size, size_usd, entry_px, mark_px, leverage, unrealized_pnl) \
                     VALUES ('0xvault', 'BTC', ?1, ?2, 1, 1000, 1, 1, 1, 0)",
                    rusqlite::params![now - (3 - i as f64), side],
                )
                .unwrap();
            }
        }
        let sentiment = t.get_sentiment(24.0).unwrap();
        assert_eq!(sentiment.len(), 1);
        assert_eq!(sentiment[0].flips, 1);
        assert_eq!(sentiment[0].current_side, Some("short".to_string()));
    }

    #[test]
    fn get_positions_reflects_cached_snapshot() {
        let t = tracker(vec![]);
        assert!(t.get_positions().is_empty());
    }

    #[test]
    fn short_truncates_address_for_logging() {
        assert_eq!(short("0x1234567890abcdef"), "0x12345678");
    }
}
