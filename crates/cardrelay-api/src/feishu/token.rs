use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Refresh this long before the reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Single-flight cache for the tenant access token
#[derive(Default)]
pub struct TokenCache {
    current: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or call `fetch` for a `(token, ttl)` pair
    ///
    /// Concurrent callers wait for one fetch instead of issuing their own.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> anyhow::Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<(String, Duration)>>,
    {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let (value, ttl) = fetch().await?;
        *current = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fetch_counted(calls: &AtomicUsize) -> anyhow::Result<(String, Duration)> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((format!("t-{n}"), Duration::from_secs(7200)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_is_cached_until_margin() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        assert_eq!(cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap(), "t-1");
        assert_eq!(cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap(), "t-1");

        tokio::time::advance(Duration::from_secs(7139)).await;
        assert_eq!(cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap(), "t-1");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap(), "t-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap();
        cache.invalidate().await;

        assert_eq!(cache.get_or_refresh(|| fetch_counted(&calls)).await.unwrap(), "t-2");
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = TokenCache::new();

        let err = cache
            .get_or_refresh(|| async { anyhow::bail!("app secret rejected") })
            .await;
        assert!(err.is_err());

        let token = cache
            .get_or_refresh(|| async { Ok(("t-ok".to_string(), Duration::from_secs(7200))) })
            .await
            .unwrap();
        assert_eq!(token, "t-ok");
    }
}
