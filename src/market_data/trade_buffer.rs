// =============================================================================
// TradeBuffer — bounded per-instrument trade ring, shared by the trade
// stream collector and the order-flow / heatmap engines.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Maximum trades retained per instrument before the oldest are evicted.
pub const MAX_BUFFER_SIZE: usize = 50_000;

/// Hyperliquid trade side: `"B"` (buy / bid taker) or `"A"` (ask taker / sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "B" => Some(Side::Buy),
            "A" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub px: f64,
    pub sz: f64,
    pub side: Side,
    pub time_ms: i64,
}

impl Trade {
    pub fn notional_usd(&self) -> f64 {
        self.px * self.sz
    }
}

/// Thread-safe, bounded ring of recent trades per instrument ("coin").
pub struct TradeBuffer {
    buffers: RwLock<HashMap<String, VecDeque<Trade>>>,
}

impl TradeBuffer {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn push(&self, coin: &str, trade: Trade) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(coin.to_string())
            .or_insert_with(|| VecDeque::with_capacity(MAX_BUFFER_SIZE));
        ring.push_back(trade);
        while ring.len() > MAX_BUFFER_SIZE {
            ring.pop_front();
        }
    }

    /// Snapshot the buffer for `coin` (oldest-first), cloned out from under
    /// the lock so callers can iterate without holding it.
    pub fn snapshot(&self, coin: &str) -> Vec<Trade> {
        let map = self.buffers.read();
        map.get(coin)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn coins(&self) -> Vec<String> {
        self.buffers.read().keys().cloned().collect()
    }

    /// Drop every buffer. Used on (re)start to avoid stale carryover across
    /// a stream reconnect.
    pub fn clear_all(&self) {
        self.buffers.write().clear();
    }
}

impl Default for TradeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(px: f64, sz: f64, side: Side, time_ms: i64) -> Trade {
        Trade { px, sz, side, time_ms }
    }

    #[test]
    fn push_and_snapshot_preserve_order() {
        let buf = TradeBuffer::new();
        buf.push("BTC", t(100.0, 1.0, Side::Buy, 1));
        buf.push("BTC", t(101.0, 2.0, Side::Sell, 2));
        let snap = buf.snapshot("BTC");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].time_ms, 1);
        assert_eq!(snap[1].time_ms, 2);
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let buf = TradeBuffer::new();
        for i in 0..(MAX_BUFFER_SIZE + 10) {
            buf.push("ETH", t(1.0, 1.0, Side::Buy, i as i64));
        }
        let snap = buf.snapshot("ETH");
        assert_eq!(snap.len(), MAX_BUFFER_SIZE);
        assert_eq!(snap[0].time_ms, 10);
    }

    #[test]
    fn side_parse_rejects_unknown_codes() {
        assert_eq!(Side::parse("B"), Some(Side::Buy));
        assert_eq!(Side::parse("A"), Some(Side::Sell));
        assert_eq!(Side::parse("X"), None);
    }

    #[test]
    fn clear_all_empties_every_coin() {
        let buf = TradeBuffer::new();
        buf.push("BTC", t(1.0, 1.0, Side::Buy, 1));
        buf.clear_all();
        assert!(buf.snapshot("BTC").is_empty());
    }
}
