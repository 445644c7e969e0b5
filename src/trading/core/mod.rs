pub mod binance;
pub mod exchange;
pub mod exchange_gateway;
pub mod factory;
pub mod paper_exchange;
pub mod rate_limiter;
