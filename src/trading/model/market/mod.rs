pub mod candles;
pub mod market_cache;
