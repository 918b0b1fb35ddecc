//! TTL cache for read-mostly reference data.
//!
//! An explicitly-owned object with an injected clock, shared across
//! concurrent requests via `Arc`. The lock guards only the map itself and is
//! never held across a fetch, so a refresh in flight does not block
//! unrelated keys; concurrent refreshes of the same key are last-writer-wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// The result of a cache lookup: the payload plus enough metadata for the
/// caller to know how stale it might be.
#[derive(Debug, Clone)]
pub struct CacheLookup<T> {
    pub data: T,
    pub from_cache: bool,
    pub age_seconds: Option<u64>,
}

pub struct TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<HashMap<String, Entry<T>>>>,
    clock: Arc<dyn Clock>,
}

impl<T> TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Returns the cached entry for `key` if younger than `ttl`, otherwise
    /// refreshes via `fetch_fn`. A failed refresh falls back to whatever was
    /// cached before, however old; the error only propagates when nothing
    /// has ever been cached under this key.
    pub async fn fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
        fetch_fn: F,
    ) -> Result<CacheLookup<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let now = self.clock.now();

        if !force {
            let cache = self.inner.lock().await;
            if let Some(entry) = cache.get(key) {
                let age = now.saturating_duration_since(entry.stored_at);
                if age < ttl {
                    debug!(key, age_seconds = age.as_secs(), "cache HIT");
                    return Ok(CacheLookup {
                        data: entry.value.clone(),
                        from_cache: true,
                        age_seconds: Some(age.as_secs()),
                    });
                }
                debug!(key, age_seconds = age.as_secs(), "cache STALE");
            } else {
                debug!(key, "cache MISS");
            }
        }

        // Lock released before fetching.
        match fetch_fn().await {
            Ok(value) => {
                let mut cache = self.inner.lock().await;
                cache.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        stored_at: self.clock.now(),
                    },
                );
                Ok(CacheLookup {
                    data: value,
                    from_cache: false,
                    age_seconds: Some(0),
                })
            }
            Err(err) => {
                let cache = self.inner.lock().await;
                if let Some(entry) = cache.get(key) {
                    let age = now.saturating_duration_since(entry.stored_at);
                    warn!(
                        key,
                        age_seconds = age.as_secs(),
                        error = %err,
                        "refresh failed, serving stale entry"
                    );
                    return Ok(CacheLookup {
                        data: entry.value.clone(),
                        from_cache: true,
                        age_seconds: Some(age.as_secs()),
                    });
                }
                Err(err)
            }
        }
    }
}

impl<T> Default for TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinanceError;
    use std::sync::Mutex as StdMutex;

    struct ManualClock {
        now: StdMutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: StdMutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn provider_down() -> crate::error::Result<Vec<String>> {
        Err(FinanceError::Provider {
            status: 503,
            message: "unavailable".to_string(),
            detail: None,
        })
    }

    #[tokio::test]
    async fn test_fresh_entry_served_from_cache() {
        let cache = TtlCache::<Vec<String>>::new();
        let ttl = Duration::from_secs(60);

        let first = cache
            .fetch("hvac", ttl, false, || async { Ok(vec!["a".to_string()]) })
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = cache
            .fetch("hvac", ttl, false, || async { provider_down() })
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::<i32>::with_clock(clock.clone());
        let ttl = Duration::from_secs(60);

        cache.fetch("k", ttl, false, || async { Ok(1) }).await.unwrap();
        clock.advance(Duration::from_secs(61));

        let result = cache.fetch("k", ttl, false, || async { Ok(2) }).await.unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.data, 2);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_refresh_fails() {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::<Vec<String>>::with_clock(clock.clone());
        let ttl = Duration::from_secs(60);

        cache
            .fetch("k", ttl, false, || async { Ok(vec!["old".to_string()]) })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3_600));

        let result = cache
            .fetch("k", ttl, false, || async { provider_down() })
            .await
            .unwrap();
        assert!(result.from_cache);
        assert_eq!(result.data, vec!["old".to_string()]);
        assert_eq!(result.age_seconds, Some(3_600));
    }

    #[tokio::test]
    async fn test_first_failure_propagates() {
        let cache = TtlCache::<i32>::new();
        let err = cache
            .fetch("never-seen", Duration::from_secs(60), false, || async {
                Err(FinanceError::NotFound("vendor list".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FinanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_force_bypasses_fresh_entry() {
        let cache = TtlCache::<i32>::new();
        let ttl = Duration::from_secs(60);

        cache.fetch("k", ttl, false, || async { Ok(1) }).await.unwrap();
        let forced = cache.fetch("k", ttl, true, || async { Ok(2) }).await.unwrap();
        assert!(!forced.from_cache);
        assert_eq!(forced.data, 2);
    }
}
