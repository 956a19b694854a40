//! Single-value time-boxed cache.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Holds one value for at most `ttl`.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// The cached value if it has not expired.
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock().ok()?;
        match slot.as_ref() {
            Some((value, stored)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((value, Instant::now()));
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_expires() {
        let cache = TtlCache::new(Duration::from_secs(5));
        assert_eq!(cache.get(), None::<u64>);

        cache.put(7u64);
        assert_eq!(cache.get(), Some(7));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.put("x");
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put(1u8);
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
