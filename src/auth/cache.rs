//! Single-slot memoization cache, used to amortize SCRAM's PBKDF2 salted
//! password derivation across re-authentications of the same credential.

use tokio::sync::Mutex;

/// One (key, value) slot guarded by a mutex. The key must carry every
/// parameter that invalidates the derived value (for SCRAM: username,
/// password, mechanism, salt, iteration count) — a cache hit is a pure
/// key equality check, never a heuristic.
pub struct SingleSlotCache<K, V> {
    slot: Mutex<Option<(K, V)>>,
}

impl<K, V> SingleSlotCache<K, V>
where
    K: PartialEq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    /// Returns the cached value for `key` if present, otherwise computes it
    /// with `compute`, stores it (replacing whatever was cached), and
    /// returns it.
    pub async fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut slot = self.slot.lock().await;
        if let Some((cached_key, value)) = slot.as_ref() {
            if *cached_key == key {
                return value.clone();
            }
        }
        let value = compute();
        *slot = Some((key, value.clone()));
        value
    }
}

impl<K, V> Default for SingleSlotCache<K, V>
where
    K: PartialEq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn computes_once_per_distinct_key() {
        let cache: SingleSlotCache<u32, u32> = SingleSlotCache::new();
        let calls = AtomicUsize::new(0);

        let a = cache
            .get_or_insert_with(1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                100
            })
            .await;
        let b = cache
            .get_or_insert_with(1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                999
            })
            .await;
        assert_eq!(a, 100);
        assert_eq!(b, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = cache
            .get_or_insert_with(2, || {
                calls.fetch_add(1, Ordering::SeqCst);
                200
            })
            .await;
        assert_eq!(c, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
