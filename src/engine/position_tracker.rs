// =============================================================================
// Position change tracker — entry/exit/flip/increase detection
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::store::Store;
use crate::util::unix_time;

#[derive(Debug, Clone, PartialEq)]
struct CoinSnapshot {
    side: String,
    size_usd: f64,
    mark_px: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionChange {
    pub address: String,
    pub coin: String,
    pub action: String, // entry | flip | increase | exit
    pub side: String,
    pub size_usd: f64,
    pub price: f64,
    pub detected_at: f64,
}

/// Minimal view of a position the tracker needs — decoupled from the store
/// row type so callers can pass freshly-polled data before it is persisted.
pub struct PositionView {
    pub coin: String,
    pub side: String,
    pub size_usd: f64,
    pub mark_px: f64,
}

pub struct PositionChangeTracker {
    store: Arc<Store>,
    snapshots: Mutex<HashMap<String, HashMap<String, CoinSnapshot>>>,
}

impl PositionChangeTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Seed in-memory snapshots from the current `positions` table, joined
    /// against active watched wallets, so restart never emits phantom
    /// "entry" events for positions that already existed.
    pub fn load_snapshots(&self) {
        let conn = self.store.read_conn();

        let mut stmt = match conn.prepare("SELECT address FROM watched_wallets WHERE is_active = 1") {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to load watched wallets");
                return;
            }
        };
        let watched: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .and_then(Iterator::collect)
            .unwrap_or_default();

        let mut stmt = match conn.prepare(
            "SELECT p.address, p.coin, p.side, p.size_usd, p.mark_px \
             FROM positions p INNER JOIN watched_wallets w ON p.address = w.address \
             WHERE w.is_active = 1",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to load watched positions");
                return;
            }
        };
        let rows: Vec<(String, String, String, f64, f64)> = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .and_then(Iterator::collect)
            .unwrap_or_default();

        let mut snapshots = self.snapshots.lock();
        for addr in watched {
            snapshots.entry(addr).or_default();
        }
        let mut position_count = 0usize;
        for (address, coin, side, size_usd, mark_px) in rows {
            position_count += 1;
            snapshots
                .entry(address)
                .or_default()
                .insert(coin, CoinSnapshot { side, size_usd, mark_px });
        }

        info!(
            wallets = snapshots.len(),
            positions = position_count,
            "loaded position snapshots for watched wallets"
        );
    }

    /// Compare `new_positions` against the last known snapshot for
    /// `address`. On first sighting, seeds silently and returns no changes.
    pub fn check_changes(&self, address: &str, new_positions: &[PositionView]) -> Vec<PositionChange> {
        let mut new_map: HashMap<String, CoinSnapshot> = HashMap::new();
        for p in new_positions {
            if p.coin.is_empty() {
                continue;
            }
            new_map.insert(
                p.coin.clone(),
                CoinSnapshot {
                    side: p.side.clone(),
                    size_usd: p.size_usd,
                    mark_px: p.mark_px,
                },
            );
        }

        let mut snapshots = self.snapshots.lock();
        if !snapshots.contains_key(address) {
            if !new_map.is_empty() {
                debug!(address = %address, positions = new_map.len(), "seeded position snapshot");
            }
            snapshots.insert(address.to_string(), new_map);
            return Vec::new();
        }

        let old = snapshots.get(address).cloned().unwrap_or_default();
        let now = unix_time();
        let mut changes = Vec::new();

        for (coin, new_data) in &new_map {
            match old.get(coin) {
                None => changes.push(PositionChange {
                    address: address.to_string(),
                    coin: coin.clone(),
                    action: "entry".to_string(),
                    side: new_data.side.clone(),
                    size_usd: new_data.size_usd,
                    price: new_data.mark_px,
                    detected_at: now,
                }),
                Some(old_data) if old_data.side != new_data.side => changes.push(PositionChange {
                    address: address.to_string(),
                    coin: coin.clone(),
                    action: "flip".to_string(),
                    side: new_data.side.clone(),
                    size_usd: new_data.size_usd,
                    price: new_data.mark_px,
                    detected_at: now,
                }),
                Some(old_data) if new_data.size_usd > old_data.size_usd * 1.2 => {
                    changes.push(PositionChange {
                        address: address.to_string(),
                        coin: coin.clone(),
                        action: "increase".to_string(),
                        side: new_data.side.clone(),
                        size_usd: new_data.size_usd,
                        price: new_data.mark_px,
                        detected_at: now,
                    })
                }
                _ => {}
            }
        }

        let new_coins: HashSet<&String> = new_map.keys().collect();
        for (coin, old_data) in &old {
            if !new_coins.contains(coin) {
                changes.push(PositionChange {
                    address: address.to_string(),
                    coin: coin.clone(),
                    action: "exit".to_string(),
                    side: old_data.side.clone(),
                    size_usd: old_data.size_usd,
                    price: old_data.mark_px,
                    detected_at: now,
                });
            }
        }

        snapshots.insert(address.to_string(), new_map);
        drop(snapshots);

        if !changes.is_empty() {
            self.write_changes(&changes);
        }
        changes
    }

    fn write_changes(&self, changes: &[PositionChange]) {
        let conn = self.store.write_lock();
        let result = (|| -> rusqlite::Result<()> {
            for c in changes {
                conn.execute(
                    "INSERT INTO position_changes (address, coin, action, side, size_usd, price, detected_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![c.address, c.coin, c.action, c.side, c.size_usd, c.price, c.detected_at],
                )?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            error!(error = %e, count = changes.len(), "failed to write position changes");
        }
    }

    pub fn get_watched_addresses(&self) -> HashSet<String> {
        let conn = self.store.read_conn();
        conn.prepare("SELECT address FROM watched_wallets WHERE is_active = 1")
            .and_then(|mut stmt| stmt.query_map([], |r| r.get(0)).and_then(Iterator::collect))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PositionChangeTracker {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-pct-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        PositionChangeTracker::new(store)
    }

    #[test]
    fn first_sighting_seeds_without_emitting_changes() {
        let t = tracker();
        let positions = vec![PositionView {
            coin: "BTC".into(),
            side: "long".into(),
            size_usd: 1000.0,
            mark_px: 50_000.0,
        }];
        let changes = t.check_changes("0xabc", &positions);
        assert!(changes.is_empty());
    }

    #[test]
    fn new_coin_after_seeding_emits_entry() {
        let t = tracker();
        t.check_changes("0xabc", &[]);
        let positions = vec![PositionView {
            coin: "ETH".into(),
            side: "long".into(),
            size_usd: 500.0,
            mark_px: 3000.0,
        }];
        let changes = t.check_changes("0xabc", &positions);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, "entry");
    }

    #[test]
    fn side_flip_is_detected() {
        let t = tracker();
        t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "long".into(), size_usd: 1000.0, mark_px: 1.0 }],
        );
        let changes = t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "short".into(), size_usd: 1000.0, mark_px: 1.0 }],
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, "flip");
    }

    #[test]
    fn size_increase_past_threshold_is_detected_but_not_below() {
        let t = tracker();
        t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "long".into(), size_usd: 1000.0, mark_px: 1.0 }],
        );
        let changes = t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "long".into(), size_usd: 1150.0, mark_px: 1.0 }],
        );
        assert!(changes.is_empty());

        let changes = t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "long".into(), size_usd: 1400.0, mark_px: 1.0 }],
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, "increase");
    }

    #[test]
    fn missing_coin_emits_exit() {
        let t = tracker();
        t.check_changes(
            "0xabc",
            &[PositionView { coin: "BTC".into(), side: "long".into(), size_usd: 1000.0, mark_px: 1.0 }],
        );
        let changes = t.check_changes("0xabc", &[]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, "exit");
    }
}
