pub mod trade_buffer;

pub use trade_buffer::{Side, Trade, TradeBuffer};
