//! 按交易对互斥的分布式锁
//!
//! SET NX EX 获取，TTL 兜底；释放用 Lua 比较 token 后删除，
//! 防止误删已被其他实例重新持有的锁。

use anyhow::Result;
use redis::Script;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_config::redis_config::get_redis_connection;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub fn trade_lock_key(symbol: &str) -> String {
    format!("asv8:lock:trade:{}", symbol)
}

/// 已持有的锁。调用方必须在所有退出路径上 release；
/// TTL 只是进程崩溃时的兜底，不是常规释放手段。
pub struct TradeLockGuard {
    key: String,
    token: String,
}

impl TradeLockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// 比较 token 后删除。返回 true 表示锁确实由本持有者释放。
    pub async fn release(self) -> Result<bool> {
        let mut conn = get_redis_connection().await?;
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            // TTL 已过期且被他人重新持有，放弃删除
            warn!(key = self.key.as_str(), "锁已易主，跳过释放");
        }
        Ok(deleted > 0)
    }
}

pub struct TradeLock;

impl TradeLock {
    /// 尝试获取，不等待。拿不到返回 None（本轮 tick 跳过该交易对）。
    pub async fn try_acquire(symbol: &str, ttl_seconds: u64) -> Result<Option<TradeLockGuard>> {
        let key = trade_lock_key(symbol);
        let token = Uuid::new_v4().to_string();
        let mut conn = get_redis_connection().await?;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            debug!(key = key.as_str(), "获取交易锁成功");
            Ok(Some(TradeLockGuard { key, token }))
        } else {
            debug!(key = key.as_str(), "交易锁被占用");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_format() {
        assert_eq!(trade_lock_key("BTCUSDT"), "asv8:lock:trade:BTCUSDT");
    }
}
