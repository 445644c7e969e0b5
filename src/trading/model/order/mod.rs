pub mod order_event;
pub mod trade_log;
