// =============================================================================
// Position poller — tiered fan-out polling of discovered addresses
// =============================================================================
//
// Addresses are reclassified into polling tiers by total position size;
// each cycle pulls a batch ordered tier-ascending, last-polled-ascending,
// and fans it out across a bounded worker pool.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collectors::parse::{parse_positions, PriceBasis};
use crate::config::PositionPollerConfig;
use crate::engine::position_tracker::{PositionChangeTracker, PositionView};
use crate::engine::smart_money::SmartMoneyEngine;
use crate::exchange::client::HyperliquidClient;
use crate::rate_limiter::RateLimiter;
use crate::store::Store;
use crate::util::unix_time;

const USER_STATE_WEIGHT: u32 = 2;
const ADDRESS_MAX_AGE_DAYS: f64 = 7.0;
const BATCH_LIMIT: i64 = 200;

#[derive(Default)]
struct Counters {
    total_cycles: u64,
    total_polled: u64,
    total_errors: u64,
}

pub struct PositionPoller {
    store: Arc<Store>,
    rate_limiter: Arc<RateLimiter>,
    exchange: HyperliquidClient,
    config: PositionPollerConfig,
    smart_money: Mutex<Option<Arc<SmartMoneyEngine>>>,
    position_tracker: Mutex<Option<Arc<PositionChangeTracker>>>,
    counters: Mutex<Counters>,
    last_cycle_at: AtomicU64,
}

impl PositionPoller {
    pub fn new(
        store: Arc<Store>,
        rate_limiter: Arc<RateLimiter>,
        exchange: HyperliquidClient,
        config: PositionPollerConfig,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            exchange,
            config,
            smart_money: Mutex::new(None),
            position_tracker: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
            last_cycle_at: AtomicU64::new(0),
        }
    }

    pub fn set_smart_money(&self, engine: Arc<SmartMoneyEngine>) {
        *self.smart_money.lock() = Some(engine);
    }

    pub fn set_position_tracker(&self, tracker: Arc<PositionChangeTracker>) {
        *self.position_tracker.lock() = Some(tracker);
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(workers = self.config.workers, "position poller starting");
            loop {
                if let Err(e) = self.poll_cycle().await {
                    warn!(error = %e, "position poller cycle error");
                }
                let interval = self.config.tier1_interval.min(self.config.tier2_interval).min(self.config.tier3_interval);
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        })
    }

    async fn poll_cycle(&self) -> anyhow::Result<()> {
        let now = unix_time();
        let cutoff = now - ADDRESS_MAX_AGE_DAYS * 86_400.0;

        let addresses: Vec<(String, i64)> = {
            let conn = self.store.read_conn();
            let mut stmt = conn.prepare(
                "SELECT address, tier FROM addresses WHERE last_seen >= ?1 AND ( \
                    (tier = 1 AND (last_polled IS NULL OR last_polled < ?2 - ?3)) OR \
                    (tier = 2 AND (last_polled IS NULL OR last_polled < ?2 - ?4)) OR \
                    (tier = 3 AND (last_polled IS NULL OR last_polled < ?2 - ?5)) \
                 ) ORDER BY tier ASC, last_polled ASC LIMIT ?6",
            )?;
            stmt.query_map(
                rusqlite::params![
                    cutoff,
                    now,
                    self.config.tier1_interval as f64,
                    self.config.tier2_interval as f64,
                    self.config.tier3_interval as f64,
                    BATCH_LIMIT,
                ],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?
            .collect::<Result<_, _>>()?
        };

        if addresses.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut handles = Vec::with_capacity(addresses.len());
        for (address, _tier) in addresses {
            let sem = semaphore.clone();
            let permit = sem.acquire_owned().await?;
            let this = self;
            handles.push(async move {
                let _permit = permit;
                this.poll_address(&address, now).await
            });
        }

        let results = futures_util::future::join_all(handles).await;
        let mut errors = 0u64;
        for r in &results {
            if r.is_err() {
                errors += 1;
            }
        }

        let mut counters = self.counters.lock();
        counters.total_cycles += 1;
        counters.total_polled += results.len() as u64;
        counters.total_errors += errors;
        self.last_cycle_at.store(now as u64, Ordering::Relaxed);

        Ok(())
    }

    async fn poll_address(&self, address: &str, now: f64) -> anyhow::Result<()> {
        if !self.rate_limiter.acquire(USER_STATE_WEIGHT, Duration::from_secs(10)).await {
            debug!(address = %short(address), "rate limit — skipping address this cycle");
            return Ok(());
        }

        let state = self.exchange.user_state(address).await?;
        let (positions, total_size_usd, active_coins) = parse_positions(&state, PriceBasis::Mark);

        if let Some(tracker) = self.position_tracker.lock().clone() {
            let views: Vec<PositionView> = positions
                .iter()
                .map(|p| PositionView {
                    coin: p.coin.clone(),
                    side: p.side.clone(),
                    size_usd: p.size_usd,
                    mark_px: p.mark_px,
                })
                .collect();
            tracker.check_changes(address, &views);
        }

        let equity = state.margin_summary.account_value;
        if equity > 0.0 {
            if let Some(sm) = self.smart_money.lock().clone() {
                sm.snapshot_pnl(address, equity, state.margin_summary.total_unrealized_pnl);
            }
        }

        self.upsert_positions(address, &positions)?;
        self.delete_closed_positions(address, &active_coins)?;
        self.update_address_meta(address, total_size_usd, now)?;

        Ok(())
    }

    fn upsert_positions(&self, address: &str, positions: &[crate::collectors::parse::ParsedPosition]) -> rusqlite::Result<()> {
        let conn = self.store.write_lock();
        for p in positions {
            conn.execute(
                "INSERT OR REPLACE INTO positions \
                 (address, coin, side, size, size_usd, entry_px, mark_px, leverage, margin_used, liq_px, unrealized_pnl, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    address, p.coin, p.side, p.size, p.size_usd, p.entry_px, p.mark_px,
                    p.leverage, p.margin_used, p.liq_px, p.unrealized_pnl, unix_time(),
                ],
            )?;
        }
        Ok(())
    }

    fn delete_closed_positions(&self, address: &str, active_coins: &std::collections::HashSet<String>) -> rusqlite::Result<()> {
        let conn = self.store.write_lock();
        if active_coins.is_empty() {
            conn.execute("DELETE FROM positions WHERE address = ?1", [address])?;
            return Ok(());
        }
        let placeholders = active_coins.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM positions WHERE address = ? AND coin NOT IN ({placeholders})");
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&address];
        params.extend(active_coins.iter().map(|c| c as &dyn rusqlite::ToSql));
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    fn update_address_meta(&self, address: &str, total_size_usd: f64, now: f64) -> rusqlite::Result<()> {
        let conn = self.store.write_lock();
        let tier = if total_size_usd >= self.config.whale_threshold {
            1
        } else if total_size_usd >= self.config.mid_threshold {
            2
        } else {
            3
        };
        conn.execute(
            "UPDATE addresses SET last_polled = ?1, total_size_usd = ?2, tier = ?3 WHERE address = ?4",
            rusqlite::params![now, total_size_usd, tier, address],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> serde_json::Value {
        let counters = self.counters.lock();
        serde_json::json!({
            "total_cycles": counters.total_cycles,
            "total_polled": counters.total_polled,
            "total_errors": counters.total_errors,
            "last_cycle_at": self.last_cycle_at.load(Ordering::Relaxed),
        })
    }
}

fn short(addr: &str) -> String {
    addr.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller() -> PositionPoller {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-poller-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        PositionPoller::new(
            store,
            Arc::new(RateLimiter::new(1200, 85)),
            HyperliquidClient::new("https://api.hyperliquid.xyz"),
            PositionPollerConfig {
                enabled: true,
                workers: 4,
                tier1_interval: 10,
                tier2_interval: 30,
                tier3_interval: 60,
                whale_threshold: 1_000_000.0,
                mid_threshold: 100_000.0,
            },
        )
    }

    #[test]
    fn tier_classification_matches_thresholds() {
        let p = poller();
        let conn = p.store.write_lock();
        conn.execute(
            "INSERT INTO addresses (address, first_seen, last_seen, trade_count) VALUES ('0xabc', 1, 1, 1)",
            [],
        )
        .unwrap();
        drop(conn);

        p.update_address_meta("0xabc", 2_000_000.0, unix_time()).unwrap();
        let conn = p.store.read_conn();
        let tier: i64 = conn.query_row("SELECT tier FROM addresses WHERE address = '0xabc'", [], |r| r.get(0)).unwrap();
        assert_eq!(tier, 1);
    }

    #[test]
    fn delete_closed_positions_removes_stale_coins_only() {
        let p = poller();
        let conn = p.store.write_lock();
        conn.execute(
            "INSERT INTO positions (address, coin, side, size, size_usd, entry_px, mark_px, updated_at) \
             VALUES ('0xabc', 'BTC', 'long', 1, 1, 1, 1, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO positions (address, coin, side, size, size_usd, entry_px, mark_px, updated_at) \
             VALUES ('0xabc', 'ETH', 'long', 1, 1, 1, 1, 1)",
            [],
        )
        .unwrap();
        drop(conn);

        let mut active = std::collections::HashSet::new();
        active.insert("BTC".to_string());
        p.delete_closed_positions("0xabc", &active).unwrap();

        let conn = p.store.read_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM positions WHERE address = '0xabc'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn delete_closed_positions_removes_all_when_no_active_coins() {
        let p = poller();
        let conn = p.store.write_lock();
        conn.execute(
            "INSERT INTO positions (address, coin, side, size, size_usd, entry_px, mark_px, updated_at) \
             VALUES ('0xabc', 'BTC', 'long', 1, 1, 1, 1, 1)",
            [],
        )
        .unwrap();
        drop(conn);

        p.delete_closed_positions("0xabc", &std::collections::HashSet::new()).unwrap();
        let conn = p.store.read_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM positions WHERE address = '0xabc'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}
