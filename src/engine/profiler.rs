// =============================================================================
// Wallet profiler — FIFO entry/exit matching and per-address metrics
// =============================================================================
//
// Trade history is fetched on demand from the exchange's fills endpoint and
// matched FIFO per coin; matches are not persisted beyond the profiling pass
// that produced them (only the resulting summary row survives in
// `wallet_profiles`), so the store never grows an unbounded per-address
// trade-history table.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SmartMoneyConfig;
use crate::exchange::client::{Fill, HyperliquidClient};
use crate::store::models::WalletProfileRow;
use crate::store::Store;
use crate::util::unix_time;

const MIN_MATCHES: usize = 5;
const PROFIT_FACTOR_CAP: f64 = 999.0;
const BOT_TRADES_PER_DAY: f64 = 50.0;
const BOT_AVG_HOLD_HOURS: f64 = 2.0 / 60.0;

struct OpenLeg {
    px: f64,
    time_ms: i64,
}

struct Match {
    pnl_pct: f64,
    pnl_usd: f64,
    hold_hours: f64,
}

pub struct WalletProfiler {
    store: Arc<Store>,
    exchange: HyperliquidClient,
    config: SmartMoneyConfig,
}

impl WalletProfiler {
    pub fn new(store: Arc<Store>, exchange: HyperliquidClient, config: SmartMoneyConfig) -> Self {
        Self { store, exchange, config }
    }

    /// Re-profile the staleest known addresses, oldest-computed first, up to
    /// `max_profiles_per_cycle` per call. Candidates are drawn from addresses
    /// that have ever posted a PnL snapshot (i.e. were seen with equity > 0)
    /// unioned with addresses that already carry a profile, so a wallet that
    /// stops trading still ages out of `wallet_profiles` via later re-profiles
    /// returning `None` rather than lingering on stale numbers forever.
    pub async fn refresh_profiles(&self) -> anyhow::Result<usize> {
        let candidates: Vec<String> = {
            let conn = self.store.read_conn();
            let mut stmt = conn.prepare(
                "SELECT address FROM (
                    SELECT address, MAX(snapshot_at) AS last_seen, 0 AS priority \
                     FROM pnl_snapshots GROUP BY address HAVING MAX(equity) >= ?1
                    UNION
                    SELECT address, computed_at AS last_seen, 1 AS priority FROM wallet_profiles
                 ) GROUP BY address ORDER BY MIN(priority), MIN(last_seen) ASC LIMIT ?2",
            )?;
            stmt.query_map(
                rusqlite::params![self.config.min_equity, self.config.max_profiles_per_cycle],
                |r| r.get(0),
            )?
            .collect::<Result<_, _>>()?
        };

        let mut refreshed = 0;
        for address in &candidates {
            match self.profile_and_store(address).await {
                Ok(Some(_)) => refreshed += 1,
                Ok(None) => debug!(address = %address, "not enough matched trades to refresh profile"),
                Err(e) => warn!(address = %address, error = %e, "profile refresh failed"),
            }
        }
        info!(candidates = candidates.len(), refreshed, "profile refresh cycle complete");
        Ok(refreshed)
    }

    /// Promote qualifying profiles into the watchlist. A wallet qualifies
    /// when it clears every `auto_curate_min_*` threshold and, if
    /// `auto_curate_exclude_bots` is set, is not flagged as a bot.
    pub fn auto_curate(&self) -> rusqlite::Result<usize> {
        if !self.config.auto_curate_enabled {
            return Ok(0);
        }

        let bot_clause = if self.config.auto_curate_exclude_bots { "AND is_bot = 0" } else { "" };
        let sql = format!(
            "SELECT address FROM wallet_profiles \
             WHERE win_rate >= ?1 AND trade_count >= ?2 AND profit_factor >= ?3 {bot_clause} \
             ORDER BY profit_factor DESC LIMIT ?4"
        );

        let qualifying: Vec<String> = {
            let conn = self.store.read_conn();
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(
                rusqlite::params![
                    self.config.auto_curate_min_win_rate,
                    self.config.auto_curate_min_trades,
                    self.config.auto_curate_min_profit_factor,
                    self.config.auto_curate_max_wallets,
                ],
                |r| r.get(0),
            )?
            .collect::<Result<_, _>>()?
        };

        let conn = self.store.write_lock();
        for address in &qualifying {
            conn.execute(
                "INSERT INTO watched_wallets (address, label, added_at, is_active) \
                 VALUES (?1, 'auto-curated', ?2, 1) \
                 ON CONFLICT(address) DO UPDATE SET is_active = 1",
                rusqlite::params![address, unix_time()],
            )?;
        }
        info!(promoted = qualifying.len(), "auto-curation cycle complete");
        Ok(qualifying.len())
    }

    /// Fetch fills, FIFO-match, compute and persist a profile. Returns
    /// `Ok(None)` when there are fewer than [`MIN_MATCHES`] completed trades.
    pub async fn profile_and_store(&self, address: &str) -> anyhow::Result<Option<WalletProfileRow>> {
        let fills = self.exchange.user_fills(address).await?;
        if fills.is_empty() {
            return Ok(None);
        }

        let matches = match_trades_fifo(&fills);
        if matches.len() < MIN_MATCHES {
            return Ok(None);
        }

        let equity = self.latest_equity(address)?;
        let profile = calculate_metrics(address, &matches, equity);
        self.upsert_profile(&profile)?;
        Ok(Some(profile))
    }

    fn latest_equity(&self, address: &str) -> rusqlite::Result<Option<f64>> {
        let conn = self.store.read_conn();
        conn.query_row(
            "SELECT equity FROM pnl_snapshots WHERE address = ?1 ORDER BY snapshot_at DESC LIMIT 1",
            [address],
            |r| r.get(0),
        )
        .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
    }

    fn upsert_profile(&self, profile: &WalletProfileRow) -> rusqlite::Result<()> {
        let conn = self.store.write_lock();
        conn.execute(
            "INSERT INTO wallet_profiles \
             (address, computed_at, win_rate, trade_count, profit_factor, avg_hold_hours, \
              avg_pnl_pct, max_drawdown, style, is_bot, equity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(address) DO UPDATE SET \
              computed_at=excluded.computed_at, win_rate=excluded.win_rate, \
              trade_count=excluded.trade_count, profit_factor=excluded.profit_factor, \
              avg_hold_hours=excluded.avg_hold_hours, avg_pnl_pct=excluded.avg_pnl_pct, \
              max_drawdown=excluded.max_drawdown, style=excluded.style, is_bot=excluded.is_bot, \
              equity=excluded.equity",
            rusqlite::params![
                profile.address,
                profile.computed_at,
                profile.win_rate,
                profile.trade_count,
                profile.profit_factor,
                profile.avg_hold_hours,
                profile.avg_pnl_pct,
                profile.max_drawdown,
                profile.style,
                profile.is_bot,
                profile.equity,
            ],
        )?;
        debug!(address = %profile.address, trades = ?profile.trade_count, "upserted wallet profile");
        Ok(())
    }
}

/// Group fills by coin in time order and match each sell to the oldest
/// still-open buy (FIFO). Matches with a non-positive entry price are
/// discarded as corrupt.
fn match_trades_fifo(fills: &[Fill]) -> Vec<Match> {
    let mut by_coin: HashMap<&str, Vec<&Fill>> = HashMap::new();
    for f in fills {
        by_coin.entry(f.coin.as_str()).or_default().push(f);
    }

    let mut matches = Vec::new();
    for trades in by_coin.values_mut() {
        trades.sort_by_key(|f| f.time_ms);
        let mut open_buys: std::collections::VecDeque<OpenLeg> = std::collections::VecDeque::new();

        for f in trades.iter() {
            match f.side.as_str() {
                "B" => open_buys.push_back(OpenLeg { px: f.px, time_ms: f.time_ms }),
                "A" => {
                    if let Some(buy) = open_buys.pop_front() {
                        if buy.px <= 0.0 {
                            continue;
                        }
                        let pnl_pct = (f.px - buy.px) / buy.px * 100.0;
                        let pnl_usd = (f.px - buy.px) * f.sz;
                        let hold_hours = (f.time_ms - buy.time_ms) as f64 / 3_600_000.0;
                        matches.push(Match { pnl_pct, pnl_usd, hold_hours });
                    }
                }
                _ => {}
            }
        }
    }
    matches
}

fn calculate_metrics(address: &str, matches: &[Match], equity: Option<f64>) -> WalletProfileRow {
    let n = matches.len() as f64;
    let wins = matches.iter().filter(|m| m.pnl_usd > 0.0).count();
    let win_rate = wins as f64 / n;

    let avg_hold_hours = matches.iter().map(|m| m.hold_hours).sum::<f64>() / n;
    let avg_pnl_pct = matches.iter().map(|m| m.pnl_pct).sum::<f64>() / n;

    let positive: f64 = matches.iter().filter(|m| m.pnl_usd > 0.0).map(|m| m.pnl_usd).sum();
    let negative: f64 = matches.iter().filter(|m| m.pnl_usd < 0.0).map(|m| m.pnl_usd).sum();
    let profit_factor = if negative < 0.0 {
        (positive / negative.abs()).min(PROFIT_FACTOR_CAP)
    } else if positive > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };

    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0;
    for m in matches {
        cumulative += m.pnl_usd;
        if cumulative > peak {
            peak = cumulative;
        }
        let drawdown = peak - cumulative;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    let span_hours = matches.iter().map(|m| m.hold_hours).fold(0.0_f64, f64::max).max(1.0);
    let trades_per_day = n / (span_hours / 24.0).max(1.0 / 24.0);
    let is_bot = trades_per_day > BOT_TRADES_PER_DAY && avg_hold_hours < BOT_AVG_HOLD_HOURS;

    let style = if avg_hold_hours < 1.0 {
        "scalper"
    } else if avg_hold_hours < 24.0 {
        "day"
    } else if avg_hold_hours < 168.0 {
        "swing"
    } else {
        "position"
    };

    WalletProfileRow {
        address: address.to_string(),
        computed_at: unix_time(),
        win_rate: Some(win_rate),
        trade_count: Some(matches.len() as i64),
        profit_factor: Some(profit_factor),
        avg_hold_hours: Some(avg_hold_hours),
        avg_pnl_pct: Some(avg_pnl_pct),
        max_drawdown: Some(max_drawdown),
        style: Some(style.to_string()),
        is_bot,
        equity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(coin: &str, side: &str, px: f64, sz: f64, time_ms: i64) -> Fill {
        Fill { coin: coin.to_string(), side: side.to_string(), px, sz, time_ms }
    }

    #[test]
    fn fifo_matches_oldest_buy_to_each_sell() {
        let fills = vec![
            fill("BTC", "B", 100.0, 1.0, 1_000),
            fill("BTC", "B", 110.0, 1.0, 2_000),
            fill("BTC", "A", 120.0, 1.0, 3_000),
        ];
        let matches = match_trades_fifo(&fills);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pnl_pct, 20.0);
    }

    #[test]
    fn sell_with_no_open_buy_is_discarded() {
        let fills = vec![fill("ETH", "A", 100.0, 1.0, 1_000)];
        let matches = match_trades_fifo(&fills);
        assert!(matches.is_empty());
    }

    #[test]
    fn fewer_than_minimum_matches_yields_no_profile() {
        let matches = vec![Match { pnl_pct: 1.0, pnl_usd: 1.0, hold_hours: 1.0 }];
        assert!(matches.len() < MIN_MATCHES);
    }

    #[test]
    fn style_bucketed_by_avg_hold_hours() {
        let scalper = calculate_metrics(
            "0xa",
            &(0..5).map(|_| Match { pnl_pct: 1.0, pnl_usd: 1.0, hold_hours: 0.5 }).collect::<Vec<_>>(),
            None,
        );
        assert_eq!(scalper.style.as_deref(), Some("scalper"));

        let swing = calculate_metrics(
            "0xb",
            &(0..5).map(|_| Match { pnl_pct: 1.0, pnl_usd: 1.0, hold_hours: 48.0 }).collect::<Vec<_>>(),
            None,
        );
        assert_eq!(swing.style.as_deref(), Some("swing"));
    }

    #[test]
    fn profit_factor_is_capped() {
        let matches: Vec<Match> = (0..5)
            .map(|_| Match { pnl_pct: 100.0, pnl_usd: 1_000_000.0, hold_hours: 1.0 })
            .collect();
        let profile = calculate_metrics("0xc", &matches, None);
        assert_eq!(profile.profit_factor, Some(PROFIT_FACTOR_CAP));
    }

    #[test]
    fn max_drawdown_tracks_peak_to_trough() {
        let matches = vec![
            Match { pnl_pct: 10.0, pnl_usd: 100.0, hold_hours: 1.0 },
            Match { pnl_pct: -5.0, pnl_usd: -150.0, hold_hours: 1.0 },
            Match { pnl_pct: 1.0, pnl_usd: 10.0, hold_hours: 1.0 },
            Match { pnl_pct: 1.0, pnl_usd: 10.0, hold_hours: 1.0 },
            Match { pnl_pct: 1.0, pnl_usd: 10.0, hold_hours: 1.0 },
        ];
        let profile = calculate_metrics("0xd", &matches, None);
        assert_eq!(profile.max_drawdown, Some(150.0));
    }
}
