use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Proof that the caller holds the lock for one key.
pub type KeyGuard = OwnedMutexGuard<()>;

/// One async mutex per string key.
///
/// Operations on the same key are serialised while different keys proceed in parallel.
/// Entries nobody holds or waits on are pruned on the next `lock` call.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            Arc::clone(map.entry(key.to_owned()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
