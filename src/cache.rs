//! Compute-once map shared by concurrent workers.
//!
//! Each key owns a slot behind its own mutex. The first caller to lock an
//! empty slot runs the computation while later callers for the same key
//! block on that slot, then read the published value. Callers for other
//! keys are not held up.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

type Slot<V> = Arc<Mutex<Option<V>>>;

pub struct KeyedCache<K, V> {
    slots: DashMap<K, Slot<V>>,
}

// Slots sit behind mutexes, so only the key count is shown.
impl<K, V> fmt::Debug for KeyedCache<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCache")
            .field("keys", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&self, key: &K) -> Slot<V> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return a copy of the value for `key`, computing it first if no caller
    /// has published one yet. A failed computation publishes nothing, so the
    /// next caller tries again.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let slot = self.slot_for(key);
        // A panic in another computation leaves the slot empty, never torn.
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        let value = compute()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key)?.clone();
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Number of published values.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_value_is_computed_once() {
        let cache: KeyedCache<String, u32> = KeyedCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with(&"a".to_string(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_debug_shows_key_count() {
        let cache: KeyedCache<u32, Vec<u8>> = KeyedCache::new();
        cache.get_or_try_insert_with(&4, || Ok::<_, ()>(vec![1])).unwrap();
        assert_eq!(format!("{cache:?}"), "KeyedCache { keys: 1, .. }");
    }

    #[test]
    fn test_failure_publishes_nothing() {
        let cache: KeyedCache<u32, u32> = KeyedCache::new();
        let err = cache.get_or_try_insert_with(&1, || Err("backend down"));
        assert_eq!(err, Err("backend down"));
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get_or_try_insert_with(&1, || Ok::<_, &str>(3)), Ok(3));
    }

    #[test]
    fn test_racing_callers_share_one_computation() {
        let cache: KeyedCache<u32, u64> = KeyedCache::new();
        let calls = AtomicUsize::new(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(8)
            .build()
            .unwrap();
        let values: Vec<u64> = pool.install(|| {
            (0..64)
                .into_par_iter()
                .map(|i| {
                    cache
                        .get_or_try_insert_with(&(i % 2), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok::<_, ()>(u64::from(i % 2) * 100)
                        })
                        .unwrap()
                })
                .collect()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(values.iter().all(|v| *v == 0 || *v == 100));
    }
}
