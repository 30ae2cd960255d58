// =============================================================================
// Whale tracker — largest open positions per instrument
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct WhalePosition {
    pub address: String,
    pub side: String,
    pub size_usd: f64,
    pub entry_px: f64,
    pub mark_px: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleReport {
    pub coin: String,
    pub positions: Vec<WhalePosition>,
    pub total_long_usd: f64,
    pub total_short_usd: f64,
    pub net_usd: f64,
    pub oldest_updated_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoinWhaleSummary {
    pub coin: String,
    pub long_usd: f64,
    pub short_usd: f64,
    pub long_count: u32,
    pub short_count: u32,
}

const WHALE_SUMMARY_MIN_USD: f64 = 100_000.0;

pub struct WhaleTracker {
    store: Arc<Store>,
}

impl WhaleTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get_whales(&self, coin: &str, top_n: u32) -> rusqlite::Result<WhaleReport> {
        let conn = self.store.read_conn();
        let mut stmt = conn.prepare(
            "SELECT address, side, size_usd, entry_px, mark_px, leverage, unrealized_pnl, updated_at \
             FROM positions WHERE coin = ?1 ORDER BY size_usd DESC LIMIT ?2",
        )?;
        let rows: Vec<(WhalePosition, f64)> = stmt
            .query_map(rusqlite::params![coin, top_n], |r| {
                Ok((
                    WhalePosition {
                        address: r.get(0)?,
                        side: r.get(1)?,
                        size_usd: r.get(2)?,
                        entry_px: r.get(3)?,
                        mark_px: r.get(4)?,
                        leverage: r.get(5)?,
                        unrealized_pnl: r.get(6)?,
                    },
                    r.get(7)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut total_long = 0.0;
        let mut total_short = 0.0;
        let mut oldest_updated_at: Option<f64> = None;
        for (p, updated_at) in &rows {
            if p.side == "long" {
                total_long += p.size_usd;
            } else {
                total_short += p.size_usd;
            }
            oldest_updated_at = Some(oldest_updated_at.map_or(*updated_at, |o: f64| o.min(*updated_at)));
        }

        Ok(WhaleReport {
            coin: coin.to_string(),
            positions: rows.into_iter().map(|(p, _)| p).collect(),
            total_long_usd: total_long,
            total_short_usd: total_short,
            net_usd: total_long - total_short,
            oldest_updated_at,
        })
    }

    /// Per-coin aggregate of positions at or above `$100k` notional.
    pub fn get_whale_summary(&self) -> rusqlite::Result<Vec<CoinWhaleSummary>> {
        let conn = self.store.read_conn();
        let mut stmt = conn.prepare(
            "SELECT coin, side, SUM(size_usd), COUNT(*) FROM positions \
             WHERE size_usd >= ?1 GROUP BY coin, side",
        )?;
        let rows: Vec<(String, String, f64, u32)> = stmt
            .query_map(rusqlite::params![WHALE_SUMMARY_MIN_USD], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut by_coin: HashMap<String, CoinWhaleSummary> = HashMap::new();
        for (coin, side, usd, count) in rows {
            let entry = by_coin.entry(coin.clone()).or_insert(CoinWhaleSummary {
                coin,
                long_usd: 0.0,
                short_usd: 0.0,
                long_count: 0,
                short_count: 0,
            });
            if side == "long" {
                entry.long_usd = usd;
                entry.long_count = count;
            } else {
                entry.short_usd = usd;
                entry.short_count = count;
            }
        }

        Ok(by_coin.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> WhaleTracker {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-whale-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        WhaleTracker::new(store)
    }

    fn insert(store: &Store, address: &str, coin: &str, side: &str, size_usd: f64) {
        let conn = store.write_lock();
        conn.execute(
            "INSERT INTO positions (address, coin, side, size, size_usd, entry_px, mark_px, updated_at) \
             VALUES (?1, ?2, ?3, 1, ?4, 1, 1, 1)",
            rusqlite::params![address, coin, side, size_usd],
        )
        .unwrap();
    }

    #[test]
    fn get_whales_orders_by_size_desc_and_limits() {
        let t = tracker();
        insert(&t.store, "0x1", "BTC", "long", 1_000_000.0);
        insert(&t.store, "0x2", "BTC", "long", 5_000_000.0);
        insert(&t.store, "0x3", "BTC", "short", 2_000_000.0);

        let report = t.get_whales("BTC", 2).unwrap();
        assert_eq!(report.positions.len(), 2);
        assert_eq!(report.positions[0].address, "0x2");
        assert_eq!(report.total_long_usd, 6_000_000.0);
        assert_eq!(report.total_short_usd, 2_000_000.0);
        assert_eq!(report.net_usd, 4_000_000.0);
    }

    #[test]
    fn whale_summary_excludes_positions_below_threshold() {
        let t = tracker();
        insert(&t.store, "0x1", "ETH", "long", 50_000.0);
        insert(&t.store, "0x2", "ETH", "long", 200_000.0);

        let summary = t.get_whale_summary().unwrap();
        let eth = summary.iter().find(|s| s.coin == "ETH").unwrap();
        assert_eq!(eth.long_usd, 200_000.0);
        assert_eq!(eth.long_count, 1);
    }

    #[test]
    fn empty_coin_returns_empty_report() {
        let t = tracker();
        let report = t.get_whales("DOGE", 50).unwrap();
        assert!(report.positions.is_empty());
        assert_eq!(report.net_usd, 0.0);
    }
}
