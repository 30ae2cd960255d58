// =============================================================================
// Order-flow engine — CVD from shared trade buffers
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::market_data::trade_buffer::{Side, TradeBuffer};
use crate::util::unix_time_ms;

#[derive(Debug, Clone, Serialize)]
pub struct WindowFlow {
    pub window_seconds: u64,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub cvd: f64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub buy_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderFlow {
    pub coin: String,
    pub windows: HashMap<String, WindowFlow>,
    pub total_trades: usize,
}

pub struct OrderFlowEngine {
    buffers: Arc<TradeBuffer>,
    windows: Vec<u64>,
}

fn window_label(window_s: u64) -> String {
    if window_s < 3600 {
        format!("{}m", window_s / 60)
    } else {
        format!("{}h", window_s / 3600)
    }
}

impl OrderFlowEngine {
    pub fn new(buffers: Arc<TradeBuffer>, windows: Vec<u64>) -> Self {
        Self { buffers, windows }
    }

    pub fn get_order_flow(&self, coin: &str) -> OrderFlow {
        let trades = self.buffers.snapshot(coin);
        if trades.is_empty() {
            return OrderFlow {
                coin: coin.to_string(),
                windows: HashMap::new(),
                total_trades: 0,
            };
        }

        let now_ms = unix_time_ms();
        let mut windows = HashMap::new();

        for &window_s in &self.windows {
            let cutoff_ms = now_ms - (window_s as i64) * 1000;
            let mut buy_vol = 0.0;
            let mut sell_vol = 0.0;
            let mut buy_count = 0u64;
            let mut sell_count = 0u64;

            for trade in trades.iter().rev() {
                if trade.time_ms < cutoff_ms {
                    break;
                }
                let notional = trade.notional_usd();
                match trade.side {
                    Side::Buy => {
                        buy_vol += notional;
                        buy_count += 1;
                    }
                    Side::Sell => {
                        sell_vol += notional;
                        sell_count += 1;
                    }
                }
            }

            let total = buy_vol + sell_vol;
            let buy_pct = if total > 0.0 { buy_vol / total * 100.0 } else { 0.0 };

            windows.insert(
                window_label(window_s),
                WindowFlow {
                    window_seconds: window_s,
                    buy_volume_usd: round2(buy_vol),
                    sell_volume_usd: round2(sell_vol),
                    cvd: round2(buy_vol - sell_vol),
                    buy_count,
                    sell_count,
                    buy_pct: (buy_pct * 10.0).round() / 10.0,
                },
            );
        }

        OrderFlow {
            coin: coin.to_string(),
            windows,
            total_trades: trades.len(),
        }
    }

    /// Quick 5-minute CVD across every instrument with a non-empty buffer.
    pub fn get_all_cvd_summary(&self) -> HashMap<String, f64> {
        let cutoff_ms = unix_time_ms() - 300_000;
        let mut summary = HashMap::new();

        for coin in self.buffers.coins() {
            let trades = self.buffers.snapshot(&coin);
            let mut buy = 0.0;
            let mut sell = 0.0;
            for trade in trades.iter().rev() {
                if trade.time_ms < cutoff_ms {
                    break;
                }
                let notional = trade.notional_usd();
                match trade.side {
                    Side::Buy => buy += notional,
                    Side::Sell => sell += notional,
                }
            }
            summary.insert(coin, round2(buy - sell));
        }

        summary
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::trade_buffer::Trade;

    fn engine_with_trades() -> (OrderFlowEngine, Arc<TradeBuffer>) {
        let buf = Arc::new(TradeBuffer::new());
        let now = unix_time_ms();
        for i in 0..20 {
            buf.push("ETH", Trade { px: 3000.0, sz: 0.1, side: Side::Buy, time_ms: now - i * 10 });
            buf.push("ETH", Trade { px: 3000.0, sz: 0.1, side: Side::Sell, time_ms: now - i * 10 });
        }
        let engine = OrderFlowEngine::new(buf.clone(), vec![60, 300, 900, 3600]);
        (engine, buf)
    }

    #[test]
    fn empty_buffer_returns_zeroed_flow() {
        let buf = Arc::new(TradeBuffer::new());
        let engine = OrderFlowEngine::new(buf, vec![60]);
        let flow = engine.get_order_flow("BTC");
        assert_eq!(flow.total_trades, 0);
        assert!(flow.windows.is_empty());
    }

    #[test]
    fn equal_buys_and_sells_cancel_to_zero_cvd() {
        let (engine, _buf) = engine_with_trades();
        let flow = engine.get_order_flow("ETH");
        let hour = flow.windows.get("1h").unwrap();
        assert_eq!(hour.buy_count, 20);
        assert_eq!(hour.sell_count, 20);
        assert_eq!(hour.cvd, 0.0);
    }

    #[test]
    fn window_label_formats_minutes_and_hours() {
        assert_eq!(window_label(60), "1m");
        assert_eq!(window_label(300), "5m");
        assert_eq!(window_label(3600), "1h");
    }

    #[test]
    fn all_cvd_summary_covers_every_buffered_coin() {
        let (engine, buf) = engine_with_trades();
        buf.push("BTC", Trade { px: 50_000.0, sz: 1.0, side: Side::Buy, time_ms: unix_time_ms() });
        let summary = engine.get_all_cvd_summary();
        assert!(summary.contains_key("ETH"));
        assert!(summary.contains_key("BTC"));
    }
}
