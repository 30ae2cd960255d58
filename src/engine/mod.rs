pub mod heatmap;
pub mod order_flow;
pub mod position_tracker;
pub mod profiler;
pub mod smart_money;
pub mod whale_tracker;
