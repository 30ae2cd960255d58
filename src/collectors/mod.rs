pub mod hlp_tracker;
pub mod parse;
pub mod position_poller;
pub mod trade_stream;
