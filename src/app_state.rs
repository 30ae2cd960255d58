// =============================================================================
// Central application state — typed capability registry
// =============================================================================
//
// Every long-running component (collector or engine) is constructed once at
// startup and handed to `AppState` as an `Arc`. Handlers and background
// tasks only ever borrow through the registry; nothing reaches back into
// `main` for wiring.
// =============================================================================

use std::sync::Arc;

use crate::collectors::hlp_tracker::HlpTracker;
use crate::collectors::position_poller::PositionPoller;
use crate::collectors::trade_stream::TradeStream;
use crate::config::Config;
use crate::engine::heatmap::LiqHeatmapEngine;
use crate::engine::order_flow::OrderFlowEngine;
use crate::engine::position_tracker::PositionChangeTracker;
use crate::engine::profiler::WalletProfiler;
use crate::engine::smart_money::SmartMoneyEngine;
use crate::engine::whale_tracker::WhaleTracker;
use crate::exchange::client::HyperliquidClient;
use crate::market_data::trade_buffer::TradeBuffer;
use crate::rate_limiter::RateLimiter;
use crate::store::Store;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub rate_limiter: Arc<RateLimiter>,
    pub exchange: HyperliquidClient,
    pub trade_buffers: Arc<TradeBuffer>,

    pub trade_stream: Arc<TradeStream>,
    pub position_poller: Arc<PositionPoller>,
    pub hlp_tracker: Arc<HlpTracker>,

    pub order_flow: Arc<OrderFlowEngine>,
    pub heatmap: Arc<LiqHeatmapEngine>,
    pub whale_tracker: Arc<WhaleTracker>,
    pub smart_money: Arc<SmartMoneyEngine>,
    pub position_tracker: Arc<PositionChangeTracker>,
    pub profiler: Arc<WalletProfiler>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every engine and collector together in the reference
    /// construction order: engines first (so collectors can be handed
    /// references to them), then the change tracker, then collectors.
    pub fn new(config: Config, store: Arc<Store>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_weight_per_min,
            config.rate_limit.safety_pct,
        ));
        let exchange = HyperliquidClient::new("https://api.hyperliquid.xyz");
        let trade_buffers = Arc::new(TradeBuffer::new());

        let order_flow = Arc::new(OrderFlowEngine::new(trade_buffers.clone(), config.order_flow.windows.clone()));
        let heatmap = Arc::new(LiqHeatmapEngine::new(
            store.clone(),
            config.heatmap.clone(),
            exchange.clone(),
            rate_limiter.clone(),
        ));
        let whale_tracker = Arc::new(WhaleTracker::new(store.clone()));
        let smart_money = Arc::new(SmartMoneyEngine::new(store.clone(), config.smart_money.min_equity));
        let profiler = Arc::new(WalletProfiler::new(store.clone(), exchange.clone(), config.smart_money.clone()));
        smart_money.set_profiler(profiler.clone());

        let position_tracker = Arc::new(PositionChangeTracker::new(store.clone()));
        position_tracker.load_snapshots();

        let trade_stream = Arc::new(TradeStream::new(
            store.clone(),
            exchange.clone(),
            "https://api.hyperliquid.xyz",
            trade_buffers.clone(),
        ));
        trade_stream.set_smart_money(smart_money.clone());
        trade_stream.set_position_tracker(position_tracker.clone());

        let position_poller = Arc::new(PositionPoller::new(
            store.clone(),
            rate_limiter.clone(),
            exchange.clone(),
            config.position_poller.clone(),
        ));
        position_poller.set_smart_money(smart_money.clone());
        position_poller.set_position_tracker(position_tracker.clone());

        let hlp_tracker = Arc::new(HlpTracker::new(
            store.clone(),
            rate_limiter.clone(),
            config.hlp_tracker.clone(),
            exchange.clone(),
        ));

        Self {
            config,
            store,
            rate_limiter,
            exchange,
            trade_buffers,
            trade_stream,
            position_poller,
            hlp_tracker,
            order_flow,
            heatmap,
            whale_tracker,
            smart_money,
            position_tracker,
            profiler,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
