// 令牌缓存
//
// 同一主机的多次上传复用登录令牌，避免反复登录。
// 进程内全局一份（由组合根持有句柄注入），DashMap 按 host_id 并发访问。
// 过期在 get 时惰性判定，没有后台清理线程。

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// 缓存条目
#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    stored_at: Instant,
    /// None = 永不过期
    ttl: Option<Duration>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.stored_at.elapsed() >= ttl,
            None => false,
        }
    }
}

/// 进程级令牌缓存（host_id → 令牌）
///
/// 同一主机同时最多一个有效令牌；store 无条件覆盖。
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: DashMap<String, CachedToken>,
}

impl TokenCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 取有效令牌；不存在或已过期返回 None（过期条目顺手移除）
    pub fn get(&self, host_id: &str) -> Option<String> {
        let expired = match self.entries.get(host_id) {
            Some(entry) => {
                if !entry.is_expired() {
                    return Some(entry.token.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            debug!("令牌已过期, 移除缓存: host={}", host_id);
            self.entries.remove(host_id);
        }
        None
    }

    /// 存入令牌，ttl 单位秒，None 表示永不过期
    pub fn store(&self, host_id: &str, token: &str, ttl_seconds: Option<u64>) {
        debug!(
            "缓存令牌: host={}, ttl={:?}s",
            host_id, ttl_seconds
        );
        self.entries.insert(
            host_id.to_string(),
            CachedToken {
                token: token.to_string(),
                stored_at: Instant::now(),
                ttl: ttl_seconds.map(Duration::from_secs),
            },
        );
    }

    /// 清除指定主机的令牌（401 刷新前调用）
    pub fn clear(&self, host_id: &str) {
        debug!("清除令牌缓存: host={}", host_id);
        self.entries.remove(host_id);
    }

    /// 当前缓存条目数（含未被惰性清理的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_store_then_get() {
        let cache = TokenCache::new();
        cache.store("rapidhost", "token123", Some(3600));
        assert_eq!(cache.get("rapidhost"), Some("token123".to_string()));
    }

    #[test]
    fn test_missing_host_is_none() {
        let cache = TokenCache::new();
        assert_eq!(cache.get("nobody"), None);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = TokenCache::new();
        cache.store("h", "t", Some(0));
        assert_eq!(cache.get("h"), None);
        // 惰性清理应当把条目移走
        assert!(cache.is_empty());
    }

    #[test]
    fn test_elapsed_ttl_expires() {
        let cache = TokenCache::new();
        // 直接构造一个一小时前写入、TTL 1 秒的条目
        cache.entries.insert(
            "h".to_string(),
            CachedToken {
                token: "stale".to_string(),
                stored_at: Instant::now() - Duration::from_secs(3600),
                ttl: Some(Duration::from_secs(1)),
            },
        );
        assert_eq!(cache.get("h"), None);
    }

    #[test]
    fn test_none_ttl_never_expires() {
        let cache = TokenCache::new();
        cache.entries.insert(
            "h".to_string(),
            CachedToken {
                token: "forever".to_string(),
                stored_at: Instant::now() - Duration::from_secs(365 * 24 * 3600),
                ttl: None,
            },
        );
        assert_eq!(cache.get("h"), Some("forever".to_string()));
    }

    #[test]
    fn test_store_overwrites() {
        let cache = TokenCache::new();
        cache.store("h", "old", None);
        cache.store("h", "new", Some(60));
        assert_eq!(cache.get("h"), Some("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = TokenCache::new();
        cache.store("h", "t", None);
        cache.clear("h");
        assert_eq!(cache.get("h"), None);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(TokenCache::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let c = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                let host = format!("host{}", i % 4);
                for _ in 0..200 {
                    c.store(&host, "tok", Some(60));
                    let _ = c.get(&host);
                    if i % 2 == 0 {
                        c.clear(&host);
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
