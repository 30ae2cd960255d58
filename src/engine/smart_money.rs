// =============================================================================
// Smart money engine — PnL tracking and profitability rankings
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::engine::profiler::WalletProfiler;
use crate::store::Store;
use crate::util::unix_time;

const QUEUE_DEDUP_TTL: f64 = 300.0;
const PROFILED_SET_REFRESH_SECS: f64 = 60.0;

#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub address: String,
    pub equity: f64,
    pub pnl_24h: f64,
    pub pnl_pct_24h: f64,
    pub positions: Vec<RankingPosition>,
    pub win_rate: Option<f64>,
    pub style: Option<String>,
    pub is_bot: bool,
    pub trade_count: Option<i64>,
    pub profit_factor: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingPosition {
    pub coin: String,
    pub side: String,
    pub size_usd: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rankings {
    pub rankings: Vec<RankingEntry>,
    pub count: usize,
    pub window_hours: u32,
}

struct ProfileQueue {
    queue: Mutex<VecDeque<String>>,
    queued_recently: Mutex<HashMap<String, f64>>,
    notify: Notify,
}

pub struct SmartMoneyEngine {
    store: Arc<Store>,
    min_equity: f64,
    profiler: RwLock<Option<Arc<WalletProfiler>>>,
    profile_queue: ProfileQueue,
    profiled_addrs: RwLock<(HashSet<String>, f64)>,
}

impl SmartMoneyEngine {
    pub fn new(store: Arc<Store>, min_equity: f64) -> Self {
        Self {
            store,
            min_equity,
            profiler: RwLock::new(None),
            profile_queue: ProfileQueue {
                queue: Mutex::new(VecDeque::new()),
                queued_recently: Mutex::new(HashMap::new()),
                notify: Notify::new(),
            },
            profiled_addrs: RwLock::new((HashSet::new(), 0.0)),
        }
    }

    pub fn set_profiler(&self, profiler: Arc<WalletProfiler>) {
        *self.profiler.write() = Some(profiler);
    }

    /// Spawn the persistent profile-queue drainer.
    pub fn start_drainer(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("profile drainer started");
            loop {
                let wait = self.profile_queue.notify.notified();
                tokio::select! {
                    _ = wait => {},
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {},
                }
                loop {
                    let addr = { self.profile_queue.queue.lock().pop_front() };
                    match addr {
                        Some(a) => self.profile_one(&a).await,
                        None => break,
                    }
                }
            }
        })
    }

    async fn profile_one(&self, addr: &str) {
        let profiler = match self.profiler.read().clone() {
            Some(p) => p,
            None => return,
        };
        match profiler.profile_and_store(addr).await {
            Ok(Some(profile)) => {
                self.profiled_addrs.write().0.insert(addr.to_string());
                info!(
                    address = %short(addr),
                    trades = profile.trade_count.unwrap_or(0),
                    style = profile.style.as_deref().unwrap_or("?"),
                    "profiled wallet"
                );
            }
            Ok(None) => {}
            Err(e) => debug!(address = %short(addr), error = %e, "profile failed"),
        }
    }

    fn refresh_profiled_set(&self) {
        let now = unix_time();
        {
            let guard = self.profiled_addrs.read();
            if now - guard.1 < PROFILED_SET_REFRESH_SECS {
                return;
            }
        }
        let conn = self.store.read_conn();
        let result: rusqlite::Result<Vec<String>> = (|| {
            let mut stmt = conn.prepare("SELECT address FROM wallet_profiles")?;
            stmt.query_map([], |r| r.get(0))?.collect()
        })();
        if let Ok(addrs) = result {
            *self.profiled_addrs.write() = (addrs.into_iter().collect(), now);
        }
    }

    fn enqueue(&self, addresses: Vec<String>) {
        let now = unix_time();
        let mut added = 0;
        {
            let mut recently = self.profile_queue.queued_recently.lock();
            recently.retain(|_, t| now - *t <= QUEUE_DEDUP_TTL);
            let mut queue = self.profile_queue.queue.lock();
            for addr in addresses {
                if !recently.contains_key(&addr) {
                    recently.insert(addr.clone(), now);
                    queue.push_back(addr);
                    added += 1;
                }
            }
        }
        if added > 0 {
            self.profile_queue.notify.notify_one();
        }
    }

    pub fn snapshot_pnl(&self, address: &str, equity: f64, unrealized: f64) {
        self.batch_snapshot_pnl(&[(address.to_string(), equity, unrealized)]);
    }

    /// Records PnL snapshots in one transaction, then queues any high-equity
    /// address that has no stored profile yet.
    pub fn batch_snapshot_pnl(&self, snapshots: &[(String, f64, f64)]) {
        if snapshots.is_empty() {
            return;
        }
        let now = unix_time();
        let conn = self.store.write_lock();
        let result = (|| -> rusqlite::Result<()> {
            for (addr, eq, unr) in snapshots {
                conn.execute(
                    "INSERT OR REPLACE INTO pnl_snapshots (address, snapshot_at, equity, unrealized) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![addr, now, eq, unr],
                )?;
            }
            Ok(())
        })();
        drop(conn);
        if let Err(e) = result {
            warn!(error = %e, count = snapshots.len(), "failed to write pnl snapshots");
            return;
        }

        if self.profiler.read().is_some() {
            self.refresh_profiled_set();
            let profiled = self.profiled_addrs.read().0.clone();
            let need_profile: Vec<String> = snapshots
                .iter()
                .filter(|(addr, eq, _)| *eq >= self.min_equity && !profiled.contains(addr))
                .map(|(addr, _, _)| addr.clone())
                .collect();
            if !need_profile.is_empty() {
                self.enqueue(need_profile);
            }
        }
    }

    /// Ranks addresses by equity growth over the trailing 24h.
    pub fn get_rankings(&self, top_n: usize) -> rusqlite::Result<Rankings> {
        let cutoff = unix_time() - 86_400.0;
        let conn = self.store.read_conn();

        let mut stmt = conn.prepare(
            "WITH addr_range AS ( \
                SELECT address, MIN(snapshot_at) AS first_snap, MAX(snapshot_at) AS last_snap \
                FROM pnl_snapshots WHERE snapshot_at >= ?1 GROUP BY address HAVING COUNT(*) >= 2 \
             ) \
             SELECT ar.address, ps_first.equity, ps_last.equity \
             FROM addr_range ar \
             JOIN pnl_snapshots ps_first ON ps_first.address = ar.address AND ps_first.snapshot_at = ar.first_snap \
             JOIN pnl_snapshots ps_last ON ps_last.address = ar.address AND ps_last.snapshot_at = ar.last_snap",
        )?;
        let rows: Vec<(String, f64, f64)> = stmt
            .query_map([cutoff], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?;

        if rows.is_empty() {
            return Ok(Rankings { rankings: Vec::new(), count: 0, window_hours: 24 });
        }

        let mut addr_pnl: Vec<RankingEntry> = rows
            .into_iter()
            .map(|(address, start, end)| {
                let pnl = end - start;
                let pnl_pct = if start > 0.0 { pnl / start * 100.0 } else { 0.0 };
                RankingEntry {
                    address,
                    equity: round2(end),
                    pnl_24h: round2(pnl),
                    pnl_pct_24h: round2(pnl_pct),
                    positions: Vec::new(),
                    win_rate: None,
                    style: None,
                    is_bot: false,
                    trade_count: None,
                    profit_factor: None,
                }
            })
            .collect();

        addr_pnl.sort_by(|a, b| b.pnl_24h.partial_cmp(&a.pnl_24h).unwrap());
        addr_pnl.truncate(top_n);

        if addr_pnl.is_empty() {
            return Ok(Rankings { rankings: addr_pnl, count: 0, window_hours: 24 });
        }

        let top_addrs: Vec<String> = addr_pnl.iter().map(|e| e.address.clone()).collect();
        let placeholders = top_addrs.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let pos_sql = format!(
            "SELECT address, coin, side, size_usd, unrealized_pnl FROM positions WHERE address IN ({placeholders})"
        );
        let mut pos_stmt = conn.prepare(&pos_sql)?;
        let pos_params: Vec<&dyn rusqlite::ToSql> =
            top_addrs.iter().map(|a| a as &dyn rusqlite::ToSql).collect();
        let pos_rows: Vec<(String, String, String, f64, f64)> = pos_stmt
            .query_map(pos_params.as_slice(), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut pos_map: HashMap<String, Vec<RankingPosition>> = HashMap::new();
        for (addr, coin, side, size_usd, unrealized_pnl) in pos_rows {
            pos_map.entry(addr).or_default().push(RankingPosition { coin, side, size_usd, unrealized_pnl });
        }

        let prof_sql = format!(
            "SELECT address, win_rate, style, is_bot, trade_count, profit_factor \
             FROM wallet_profiles WHERE address IN ({placeholders})"
        );
        let mut prof_stmt = conn.prepare(&prof_sql)?;
        let prof_params: Vec<&dyn rusqlite::ToSql> =
            top_addrs.iter().map(|a| a as &dyn rusqlite::ToSql).collect();
        let prof_rows: Vec<(String, Option<f64>, Option<String>, bool, Option<i64>, Option<f64>)> = prof_stmt
            .query_map(prof_params.as_slice(), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<Result<_, _>>()?;
        let profile_map: HashMap<String, _> = prof_rows.into_iter().map(|r| (r.0.clone(), r)).collect();

        let mut missing_profile = Vec::new();
        for entry in &mut addr_pnl {
            entry.positions = pos_map.remove(&entry.address).unwrap_or_default();
            match profile_map.get(&entry.address) {
                Some((_, win_rate, style, is_bot, trade_count, profit_factor)) => {
                    entry.win_rate = *win_rate;
                    entry.style = style.clone();
                    entry.is_bot = *is_bot;
                    entry.trade_count = *trade_count;
                    entry.profit_factor = *profit_factor;
                }
                None => missing_profile.push(entry.address.clone()),
            }
        }
        drop(conn);

        if !missing_profile.is_empty() {
            self.enqueue(missing_profile);
        }

        let count = addr_pnl.len();
        Ok(Rankings { rankings: addr_pnl, count, window_hours: 24 })
    }
}

fn short(addr: &str) -> String {
    addr.chars().take(10).collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SmartMoneyEngine {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-smartmoney-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        SmartMoneyEngine::new(store, 50_000.0)
    }

    #[test]
    fn batch_snapshot_without_profiler_just_persists() {
        let e = engine();
        e.batch_snapshot_pnl(&[("0xabc".to_string(), 100_000.0, 500.0)]);
        let conn = e.store.read_conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pnl_snapshots WHERE address = '0xabc'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rankings_empty_when_no_snapshots() {
        let e = engine();
        let rankings = e.get_rankings(50).unwrap();
        assert_eq!(rankings.count, 0);
    }

    #[test]
    fn rankings_require_two_snapshots_in_window() {
        let e = engine();
        let conn = e.store.write_lock();
        let now = unix_time();
        conn.execute(
            "INSERT INTO pnl_snapshots (address, snapshot_at, equity, unrealized) VALUES ('0xabc', ?1, 100.0, 0.0)",
            [now - 3600.0],
        )
        .unwrap();
        drop(conn);
        let rankings = e.get_rankings(50).unwrap();
        assert_eq!(rankings.count, 0);
    }

    #[test]
    fn rankings_compute_pnl_between_first_and_last_snapshot() {
        let e = engine();
        let conn = e.store.write_lock();
        let now = unix_time();
        conn.execute(
            "INSERT INTO pnl_snapshots (address, snapshot_at, equity, unrealized) VALUES ('0xabc', ?1, 100.0, 0.0)",
            [now - 3600.0],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pnl_snapshots (address, snapshot_at, equity, unrealized) VALUES ('0xabc', ?1, 150.0, 0.0)",
            [now],
        )
        .unwrap();
        drop(conn);
        let rankings = e.get_rankings(50).unwrap();
        assert_eq!(rankings.count, 1);
        assert_eq!(rankings.rankings[0].pnl_24h, 50.0);
    }

    #[test]
    fn short_truncates_to_ten_chars() {
        assert_eq!(short("0xabcdefabcdefabcdef"), "0xabcdefab");
    }
}
