use crate::backend::CacheBackend;
use chrono::Utc;
use common::Market;
use dashmap::DashMap;
use log::warn;
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROXY_MEMO_TTL: Duration = Duration::from_secs(5);
const COOKIE_MEMO_TTL: Duration = Duration::from_secs(60);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CookieRecord {
    pub cookie_text: String,
    /// Unix seconds; a record past this point is treated as a miss.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl CookieRecord {
    fn is_expired(&self, now_secs: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxyList {
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub refreshed_at: Option<i64>,
}

/// Read-through client for the broker-hosted resource keyspace. Both lookups
/// return `None` on miss without raising; short L1 memos keep bursty task
/// arrivals from hammering the cache.
pub struct ResourceCache {
    backend: Arc<dyn CacheBackend>,
    cookie_memo: DashMap<String, (Instant, Option<CookieRecord>)>,
    proxy_memo: DashMap<String, (Instant, Option<ProxyList>)>,
}

impl ResourceCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            cookie_memo: DashMap::new(),
            proxy_memo: DashMap::new(),
        }
    }

    pub async fn ping(&self) -> errors::Result<()> {
        Ok(self.backend.ping().await?)
    }

    pub async fn get_cookie(&self, market: Market, cookie_id: &str) -> Option<String> {
        if cookie_id.is_empty() {
            return None;
        }
        let key = cookie_key(market, cookie_id);
        let now_secs = Utc::now().timestamp();

        if let Some(entry) = self.cookie_memo.get(&key) {
            let (ts, record) = entry.value();
            if ts.elapsed() < COOKIE_MEMO_TTL {
                return record
                    .as_ref()
                    .filter(|r| !r.is_expired(now_secs))
                    .map(|r| r.cookie_text.clone());
            }
        }

        let record = match self.fetch::<CookieRecord>(&key).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Cookie fetch failed for {key}: {e}");
                self.cookie_memo.remove(&key);
                counter!("resource_cache_errors_total", "resource" => "cookie").increment(1);
                return None;
            }
        };

        self.cookie_memo
            .insert(key, (Instant::now(), record.clone()));
        record
            .filter(|r| !r.is_expired(now_secs))
            .map(|r| r.cookie_text)
    }

    /// A fresh random pick on every call; the list itself is memoized for a
    /// few seconds.
    pub async fn get_random_proxy(&self, market: Market) -> Option<String> {
        let key = proxy_key(market);

        let list = if let Some(entry) = self.proxy_memo.get(&key) {
            let (ts, list) = entry.value();
            if ts.elapsed() < PROXY_MEMO_TTL {
                list.clone()
            } else {
                drop(entry);
                self.refresh_proxies(&key).await?
            }
        } else {
            self.refresh_proxies(&key).await?
        };

        let proxies = list.map(|l| l.proxies).unwrap_or_default();
        if proxies.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..proxies.len());
        proxies.into_iter().nth(idx)
    }

    /// Drops the memoized list so the next task re-reads the keyspace. Called
    /// when a proxy connection fails, since the pool has likely rotated.
    pub fn invalidate_proxies(&self, market: Market) {
        self.proxy_memo.remove(&proxy_key(market));
        counter!("resource_cache_invalidations_total", "resource" => "proxy").increment(1);
    }

    async fn refresh_proxies(&self, key: &str) -> Option<Option<ProxyList>> {
        match self.fetch::<ProxyList>(key).await {
            Ok(list) => {
                self.proxy_memo
                    .insert(key.to_string(), (Instant::now(), list.clone()));
                Some(list)
            }
            Err(e) => {
                warn!("Proxy list fetch failed for {key}: {e}");
                self.proxy_memo.remove(key);
                counter!("resource_cache_errors_total", "resource" => "proxy").increment(1);
                None
            }
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, key: &str) -> errors::Result<Option<T>> {
        let raw = self.backend.get(key).await?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn cookie_key(market: Market, cookie_id: &str) -> String {
    format!("cookie:{market}:{cookie_id}")
}

fn proxy_key(market: Market) -> String {
    format!("proxy:{market}:active_proxies")
}

#[cfg(test)]
mod tests {
    use super::*;
    use errors::CacheError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MapBackend {
        data: Mutex<HashMap<String, Vec<u8>>>,
        gets: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl MapBackend {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
                gets: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn put(&self, key: &str, value: serde_json::Value) {
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), serde_json::to_vec(&value).unwrap());
        }
    }

    #[async_trait::async_trait]
    impl CacheBackend for MapBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::Pool("backend down".to_string()));
            }
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn cache_with_backend() -> (Arc<MapBackend>, ResourceCache) {
        let backend = Arc::new(MapBackend::new());
        let cache = ResourceCache::new(backend.clone());
        (backend, cache)
    }

    #[tokio::test]
    async fn test_cookie_read_through() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "cookie:CN:c1",
            serde_json::json!({"cookie_text": "xq_a_token=abc", "expires_at": null}),
        );

        assert_eq!(
            cache.get_cookie(Market::CN, "c1").await.as_deref(),
            Some("xq_a_token=abc")
        );
        assert_eq!(cache.get_cookie(Market::CN, "nope").await, None);
    }

    #[tokio::test]
    async fn test_cookie_memoized() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "cookie:CN:c1",
            serde_json::json!({"cookie_text": "tok"}),
        );

        for _ in 0..5 {
            cache.get_cookie(Market::CN, "c1").await;
        }
        assert_eq!(backend.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_cookie_is_a_miss() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "cookie:CN:stale",
            serde_json::json!({"cookie_text": "tok", "expires_at": 1}),
        );
        assert_eq!(cache.get_cookie(Market::CN, "stale").await, None);
    }

    #[tokio::test]
    async fn test_random_proxy_and_empty_list() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "proxy:CN:active_proxies",
            serde_json::json!({"proxies": ["http://10.0.0.1:8080"]}),
        );

        assert_eq!(
            cache.get_random_proxy(Market::CN).await.as_deref(),
            Some("http://10.0.0.1:8080")
        );
        // US list does not exist at all.
        assert_eq!(cache.get_random_proxy(Market::US).await, None);

        backend.put("proxy:HK:active_proxies", serde_json::json!({"proxies": []}));
        assert_eq!(cache.get_random_proxy(Market::HK).await, None);
    }

    #[tokio::test]
    async fn test_proxy_memo_invalidation_forces_reread() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "proxy:CN:active_proxies",
            serde_json::json!({"proxies": ["http://10.0.0.1:8080"]}),
        );

        cache.get_random_proxy(Market::CN).await;
        cache.get_random_proxy(Market::CN).await;
        assert_eq!(backend.gets.load(Ordering::SeqCst), 1);

        cache.invalidate_proxies(Market::CN);
        cache.get_random_proxy(Market::CN).await;
        assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_clears_memo_and_returns_none() {
        let (backend, cache) = cache_with_backend();
        backend.put(
            "cookie:CN:c1",
            serde_json::json!({"cookie_text": "tok"}),
        );
        assert!(cache.get_cookie(Market::CN, "c1").await.is_some());

        // Memo still warm: a backend outage is invisible until it expires,
        // but a cold lookup must not pin a poisoned entry.
        backend.fail.store(true, Ordering::SeqCst);
        assert_eq!(cache.get_cookie(Market::CN, "other").await, None);
        backend.fail.store(false, Ordering::SeqCst);
        backend.put(
            "cookie:CN:other",
            serde_json::json!({"cookie_text": "tok2"}),
        );
        assert_eq!(
            cache.get_cookie(Market::CN, "other").await.as_deref(),
            Some("tok2")
        );
    }
}
