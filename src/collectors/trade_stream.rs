// =============================================================================
// WebSocket trade stream — address discovery + raw trade feed for order flow
// =============================================================================
//
// Self-healing outer reconnect loop: connect + subscribe, then monitor for
// liveness. Hyperliquid has no REST trade-stream fallback, so a silent feed
// is treated as dead and the whole connection is torn down and retried.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::engine::position_tracker::PositionChangeTracker;
use crate::engine::smart_money::SmartMoneyEngine;
use crate::exchange::client::HyperliquidClient;
use crate::market_data::trade_buffer::{Side, Trade, TradeBuffer};
use crate::store::Store;
use crate::util::{safe_float, unix_time};

const WS_DEAD_THRESHOLD_SECS: f64 = 30.0;
const WS_RECONNECT_DELAY_SECS: u64 = 5;
const FLUSH_INTERVAL_SECS: u64 = 1;
const MIN_ADDRESS_LEN: usize = 10;
const DUST_LIQUIDATION_USD: f64 = 100.0;

#[derive(Debug, Deserialize)]
struct TradeMessage {
    channel: String,
    #[serde(default)]
    data: Vec<RawTrade>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(default)]
    coin: String,
    #[serde(default)]
    px: serde_json::Value,
    #[serde(default)]
    sz: serde_json::Value,
    #[serde(default)]
    side: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    liquidation: Option<bool>,
    #[serde(default)]
    liq: Option<bool>,
    #[serde(default)]
    users: Vec<String>,
}

struct PendingAddress {
    first_seen: f64,
    last_seen: f64,
    count: u32,
}

#[derive(Default)]
struct Counters {
    total_trades: u64,
    total_invalid_trades: u64,
    total_addresses_discovered: u64,
    reconnect_count: u64,
}

pub struct TradeStream {
    store: Arc<Store>,
    exchange: HyperliquidClient,
    base_url: String,
    buffers: Arc<TradeBuffer>,
    smart_money: Mutex<Option<Arc<SmartMoneyEngine>>>,
    position_tracker: Mutex<Option<Arc<PositionChangeTracker>>>,
    pending_addresses: Mutex<HashMap<String, PendingAddress>>,
    last_trade_time: AtomicI64,
    ws_connected: AtomicBool,
    stop: AtomicBool,
    counters: Mutex<Counters>,
    subscribed_coins: Mutex<Vec<String>>,
    pending_flush: AtomicU64,
}

impl TradeStream {
    pub fn new(store: Arc<Store>, exchange: HyperliquidClient, base_url: impl Into<String>, buffers: Arc<TradeBuffer>) -> Self {
        Self {
            store,
            exchange,
            base_url: base_url.into(),
            buffers,
            smart_money: Mutex::new(None),
            position_tracker: Mutex::new(None),
            pending_addresses: Mutex::new(HashMap::new()),
            last_trade_time: AtomicI64::new(0),
            ws_connected: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
            subscribed_coins: Mutex::new(Vec::new()),
            pending_flush: AtomicU64::new(0),
        }
    }

    pub fn set_smart_money(&self, engine: Arc<SmartMoneyEngine>) {
        *self.smart_money.lock() = Some(engine);
    }

    pub fn set_position_tracker(&self, tracker: Arc<PositionChangeTracker>) {
        *self.position_tracker.lock() = Some(tracker);
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.buffers.clear_all();
        tokio::spawn(async move {
            while !self.stop.load(Ordering::Relaxed) {
                if let Err(e) = self.connect_and_monitor().await {
                    warn!(error = %e, "trade stream error — will reconnect");
                }
                self.ws_connected.store(false, Ordering::Relaxed);

                if !self.stop.load(Ordering::Relaxed) {
                    let count = {
                        let mut c = self.counters.lock();
                        c.reconnect_count += 1;
                        c.reconnect_count
                    };
                    warn!(attempt = count, "trade stream reconnecting");
                    tokio::time::sleep(Duration::from_secs(WS_RECONNECT_DELAY_SECS)).await;
                }
            }
        })
    }

    async fn connect_and_monitor(&self) -> anyhow::Result<()> {
        info!("trade stream connecting to websocket");
        let meta = self.exchange.meta().await?;
        let coins: Vec<String> = meta.universe.into_iter().map(|a| a.name).collect();
        info!(coins = coins.len(), "subscribing to trades");

        let ws_url = format!("{}/ws", self.base_url.replacen("http", "ws", 1));
        let (ws_stream, _) = connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        for coin in &coins {
            let sub = serde_json::json!({
                "method": "subscribe",
                "subscription": { "type": "trades", "coin": coin },
            });
            write.send(Message::Text(sub.to_string())).await?;
        }
        *self.subscribed_coins.lock() = coins;
        self.ws_connected.store(true, Ordering::Relaxed);
        self.last_trade_time.store(unix_time_millis(), Ordering::Relaxed);
        info!("trade stream subscribed");

        loop {
            let flush_tick = tokio::time::sleep(Duration::from_secs(FLUSH_INTERVAL_SECS));
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.on_message(&text),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => anyhow::bail!("trade stream closed"),
                    }
                }
                _ = flush_tick => {
                    self.flush_addresses();
                    let last = self.last_trade_time.load(Ordering::Relaxed);
                    if last > 0 {
                        let silence = (unix_time_millis() - last) as f64 / 1000.0;
                        if silence > WS_DEAD_THRESHOLD_SECS {
                            warn!(silence_s = silence, "trade stream silent — forcing reconnect");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn on_message(&self, text: &str) {
        let msg: TradeMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return,
        };
        if msg.channel != "trades" {
            return;
        }

        let now = unix_time();
        self.last_trade_time.store(unix_time_millis(), Ordering::Relaxed);

        for trade in msg.data {
            let px = safe_float(&trade.px);
            let sz = safe_float(&trade.sz);
            let side = Side::parse(&trade.side);

            if trade.coin.is_empty() || px <= 0.0 || sz <= 0.0 || side.is_none() {
                self.counters.lock().total_invalid_trades += 1;
                continue;
            }
            let side = side.unwrap();
            self.counters.lock().total_trades += 1;

            self.buffers.push(
                &trade.coin,
                Trade { px, sz, side, time_ms: if trade.time > 0 { trade.time } else { unix_time_millis() } },
            );

            if trade.liquidation.unwrap_or(false) || trade.liq.unwrap_or(false) {
                self.record_liquidation(&trade, px, sz, now);
            }

            for addr in &trade.users {
                if addr.is_empty() || addr.len() < MIN_ADDRESS_LEN {
                    continue;
                }
                let mut pending = self.pending_addresses.lock();
                pending
                    .entry(addr.clone())
                    .and_modify(|p| {
                        p.last_seen = now;
                        p.count += 1;
                    })
                    .or_insert(PendingAddress { first_seen: now, last_seen: now, count: 1 });
            }
        }
        self.pending_flush.store(self.pending_addresses.lock().len() as u64, Ordering::Relaxed);
    }

    fn record_liquidation(&self, trade: &RawTrade, px: f64, sz: f64, now: f64) {
        let size_usd = (px * sz).abs();
        if size_usd < DUST_LIQUIDATION_USD {
            return;
        }
        let side = match trade.side.as_str() {
            "B" => "short",
            "A" => "long",
            other => other,
        };
        let address = trade.users.first().cloned();
        let conn = self.store.write_lock();
        if let Err(e) = conn.execute(
            "INSERT INTO liquidation_events (coin, occurred_at, side, size_usd, price, address) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![trade.coin, now, side, size_usd, px, address],
        ) {
            debug!(error = %e, "failed to record liquidation event");
        }
    }

    fn flush_addresses(&self) {
        let batch: HashMap<String, PendingAddress> = {
            let mut pending = self.pending_addresses.lock();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };

        let conn = self.store.write_lock();
        let before: i64 = conn.query_row("SELECT COUNT(*) FROM addresses", [], |r| r.get(0)).unwrap_or(0);
        let result = (|| -> rusqlite::Result<()> {
            for (addr, d) in &batch {
                conn.execute(
                    "INSERT INTO addresses (address, first_seen, last_seen, trade_count) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(address) DO UPDATE SET \
                      last_seen = MAX(last_seen, excluded.last_seen), \
                      trade_count = trade_count + excluded.trade_count",
                    rusqlite::params![addr, d.first_seen, d.last_seen, d.count],
                )?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                let after: i64 = conn.query_row("SELECT COUNT(*) FROM addresses", [], |r| r.get(0)).unwrap_or(before);
                self.counters.lock().total_addresses_discovered += (after - before).max(0) as u64;
            }
            Err(e) => warn!(error = %e, count = batch.len(), "failed to flush addresses"),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        if !self.ws_connected.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_trade_time.load(Ordering::Relaxed);
        (unix_time_millis() - last) as f64 / 1000.0 < WS_DEAD_THRESHOLD_SECS
    }

    pub fn stats(&self) -> serde_json::Value {
        let counters = self.counters.lock();
        let last = self.last_trade_time.load(Ordering::Relaxed);
        serde_json::json!({
            "subscribed_coins": self.subscribed_coins.lock().len(),
            "total_trades": counters.total_trades,
            "total_invalid_trades": counters.total_invalid_trades,
            "total_addresses_discovered": counters.total_addresses_discovered,
            "pending_flush": self.pending_flush.load(Ordering::Relaxed),
            "ws_connected": self.ws_connected.load(Ordering::Relaxed),
            "ws_healthy": self.is_healthy(),
            "reconnect_count": counters.reconnect_count,
        })
    }
}

fn unix_time_millis() -> i64 {
    crate::util::unix_time_ms()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> TradeStream {
        let path = std::env::temp_dir().join(format!(
            "hynous-data-test-tradestream-{}.db",
            crate::util::unix_time_ms()
        ));
        let store = Arc::new(Store::open(&path).unwrap());
        store.init_schema().unwrap();
        TradeStream::new(
            store,
            HyperliquidClient::new("https://api.hyperliquid.xyz"),
            "https://api.hyperliquid.xyz",
            Arc::new(TradeBuffer::new()),
        )
    }

    #[test]
    fn invalid_trade_is_counted_and_not_buffered() {
        let s = stream();
        let msg = r#"{"channel":"trades","data":[{"coin":"","px":"1","sz":"1","side":"B","time":1}]}"#;
        s.on_message(msg);
        assert_eq!(s.counters.lock().total_invalid_trades, 1);
        assert_eq!(s.counters.lock().total_trades, 0);
    }

    #[test]
    fn valid_trade_buffers_and_discovers_address() {
        let s = stream();
        let msg = r#"{"channel":"trades","data":[{"coin":"BTC","px":"100","sz":"1","side":"B","time":1000,"users":["0x1234567890abcdef"]}]}"#;
        s.on_message(msg);
        assert_eq!(s.counters.lock().total_trades, 1);
        assert_eq!(s.buffers.snapshot("BTC").len(), 1);
        assert_eq!(s.pending_addresses.lock().len(), 1);
    }

    #[test]
    fn short_address_is_not_discovered() {
        let s = stream();
        let msg = r#"{"channel":"trades","data":[{"coin":"BTC","px":"100","sz":"1","side":"B","time":1000,"users":["0x1"]}]}"#;
        s.on_message(msg);
        assert!(s.pending_addresses.lock().is_empty());
    }

    #[test]
    fn non_trades_channel_is_ignored() {
        let s = stream();
        s.on_message(r#"{"channel":"subscriptionResponse","data":[]}"#);
        assert_eq!(s.counters.lock().total_trades, 0);
    }

    #[test]
    fn dust_liquidation_is_not_recorded() {
        let s = stream();
        let msg = r#"{"channel":"trades","data":[{"coin":"BTC","px":"1","sz":"1","side":"B","time":1000,"liquidation":true}]}"#;
        s.on_message(msg);
        let conn = s.store.read_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM liquidation_events", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn qualifying_liquidation_is_recorded_with_normalized_side() {
        let s = stream();
        let msg = r#"{"channel":"trades","data":[{"coin":"BTC","px":"100","sz":"5","side":"A","time":1000,"liq":true,"users":["0xabcdefabcdef"]}]}"#;
        s.on_message(msg);
        let conn = s.store.read_conn();
        let (side, size_usd): (String, f64) = conn
            .query_row("SELECT side, size_usd FROM liquidation_events LIMIT 1", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(side, "long");
        assert_eq!(size_usd, 500.0);
    }

    #[test]
    fn is_healthy_false_when_never_connected() {
        let s = stream();
        assert!(!s.is_healthy());
    }
}
