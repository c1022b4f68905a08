use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error as ThisError;
use tokio::time::{Duration, Instant};

/// The Store is responsible for managing key-value pairs, with an optional time-to-live for each
/// key. Expired keys are removed lazily: a key whose deadline has passed stays in memory until the
/// next read of that key deletes it.
///
/// The store is cheap to clone, every clone points to the same map. All access goes through
/// [`InnerStore::lock`], so a read-then-delete of an expired key is atomic with respect to every
/// other operation.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
        });

        Self { inner }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InnerStore {
    state: Mutex<State>,
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
}

impl<'a> InnerStoreLocked<'a> {
    /// Inserts or fully replaces the entry under `key`. The key never expires.
    pub fn set(&mut self, key: String, data: Bytes) {
        let value = Value {
            data,
            expires_at: None,
        };
        self.state.keys.insert(key, value);
    }

    /// Like [`set`](Self::set), but the key expires `ttl` from now. Nothing is stored when the
    /// deadline can't be represented.
    pub fn set_with_ttl(
        &mut self,
        key: String,
        data: Bytes,
        ttl: Duration,
    ) -> Result<(), TtlOutOfRange> {
        let expires_at = Instant::now().checked_add(ttl).ok_or(TtlOutOfRange)?;
        let value = Value {
            data,
            expires_at: Some(expires_at),
        };
        self.state.keys.insert(key, value);

        Ok(())
    }

    /// Returns the value under `key`, or `None` if it is missing. An entry whose deadline is at or
    /// before now is deleted and reported as missing.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        let now = Instant::now();

        let expired = match self.state.keys.get(key) {
            Some(value) => value.is_expired(now),
            None => return None,
        };

        if expired {
            self.state.keys.remove(key);
            return None;
        }

        self.state.keys.get(key).map(|value| value.data.clone())
    }

    /// Number of entries held, including expired entries nobody read yet.
    pub fn len(&self) -> usize {
        self.state.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.keys.is_empty()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // A panic while holding the lock can't leave an entry half written, every mutation is a
        // single map operation.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked { state }
    }
}

#[derive(Debug, ThisError, PartialEq)]
#[error("invalid expire time, the deadline is out of range")]
pub struct TtlOutOfRange;

type Key = String;

struct Value {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl Value {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

struct State {
    keys: HashMap<Key, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::thread;
    use tokio::time;

    #[test]
    fn set_and_get() {
        let store = Store::new();
        let mut store = store.lock();

        store.set("key1".to_string(), Bytes::from("value1"));

        assert_eq!(store.get("key1"), Some(Bytes::from("value1")));
        assert_eq!(store.get("key1"), Some(Bytes::from("value1")));
        assert_eq!(store.get("key2"), None);
    }

    #[test]
    fn set_replaces_value_and_ttl() {
        let store = Store::new();
        let mut store = store.lock();

        store
            .set_with_ttl("key1".to_string(), Bytes::from("value1"), Duration::ZERO)
            .unwrap();
        store.set("key1".to_string(), Bytes::from("value2"));

        assert_eq!(store.get("key1"), Some(Bytes::from("value2")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lazy_expiration() {
        time::pause();

        let store = Store::new();

        {
            let mut store = store.lock();

            store
                .set_with_ttl(
                    "key1".to_string(),
                    Bytes::from("value1"),
                    Duration::from_secs(10),
                )
                .unwrap();
            store
                .set_with_ttl(
                    "key2".to_string(),
                    Bytes::from("value2"),
                    Duration::from_secs(20),
                )
                .unwrap();
            store.set("key3".to_string(), Bytes::from("value3"));
        }

        assert_eq!(store.lock().len(), 3);

        time::advance(Duration::from_secs(10)).await;

        // Nothing sweeps in the background, the expired key is still there until it is read.
        assert_eq!(store.lock().len(), 3);
        assert_eq!(store.lock().get("key1"), None);
        assert_eq!(store.lock().len(), 2);
        assert_eq!(store.lock().get("key2"), Some(Bytes::from("value2")));

        time::advance(Duration::from_secs(3600)).await;

        assert_eq!(store.lock().get("key2"), None);
        assert_eq!(store.lock().get("key3"), Some(Bytes::from("value3")));
        assert_eq!(store.lock().len(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        time::pause();

        let store = Store::new();
        store
            .lock()
            .set_with_ttl("key".to_string(), Bytes::from("value"), Duration::ZERO)
            .unwrap();

        assert_eq!(store.lock().get("key"), None);
        assert!(store.lock().is_empty());
    }

    #[test]
    fn ttl_out_of_range() {
        let store = Store::new();
        let mut store = store.lock();

        store.set("key".to_string(), Bytes::from("old"));

        let res = store.set_with_ttl("key".to_string(), Bytes::from("new"), Duration::MAX);

        assert_eq!(res, Err(TtlOutOfRange));
        assert_eq!(store.get("key"), Some(Bytes::from("old")));
    }

    #[test]
    fn concurrent_set_and_get() {
        let store = Store::new();
        let writers = 8;
        let rounds = 500;

        let handles: Vec<_> = (0..writers)
            .map(|writer| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for round in 0..rounds {
                        let value = format!("{writer}:{round}");
                        if rng.gen_bool(0.5) {
                            store
                                .lock()
                                .set("shared".to_string(), Bytes::from(value));
                        } else if let Some(read) = store.lock().get("shared") {
                            // Every read is a complete value some writer stored.
                            let read = String::from_utf8(read.to_vec()).unwrap();
                            let (w, r) = read.split_once(':').unwrap();
                            assert!(w.parse::<usize>().unwrap() < writers);
                            assert!(r.parse::<usize>().unwrap() < rounds);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.lock().len(), 1);
    }
}
