//! In-process expiring key-value cache.
//!
//! [`Cache`] maps string keys to values stamped with an absolute expiry in
//! whole Unix seconds. It is shared by every request handled by an
//! [`Engine`](crate::engine::Engine) and reachable from interceptors and
//! business callbacks through the per-request context.
//!
//! Expired entries are reclaimed two ways:
//!
//! - **on read**: [`Cache::try_get`] evicts an entry it finds expired;
//! - **by sweep**: a background Tokio task started with
//!   [`Cache::start_sweeper`] runs [`Cache::sweep`] every `sweep_interval`.
//!
//! There is no capacity bound and no recency-based eviction.
//!
//! ```rust
//! use std::time::Duration;
//! use joker::cache::{Cache, absolute_time_from_now};
//!
//! let cache: Cache<u32> = Cache::new();
//! cache.set("answer", 42, absolute_time_from_now(Duration::from_secs(60)));
//! assert_eq!(cache.try_get("answer"), Some(42));
//!
//! // Non-positive expiry is ignored.
//! cache.set("answer", 7, 0);
//! assert_eq!(cache.try_get("answer"), Some(42));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default period between two background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entry<V> {
    value: V,
    /// Absolute expiry, whole seconds since the Unix epoch.
    expires_at: i64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// A concurrent string-keyed cache with per-entry absolute expiry.
///
/// All mutations take the table's write lock; reads take the read lock and
/// only upgrade (release, then re-acquire for writing) on the eviction path.
/// Every operation is atomic with respect to the whole table.
#[derive(Debug)]
pub struct Cache<V = serde_json::Value> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache with the default 30 second sweep interval.
    ///
    /// The sweeper is not running until [`start_sweeper`](Self::start_sweeper)
    /// is called.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Inserts or overwrites `key`, expiring at `expires_at` Unix seconds.
    ///
    /// A non-positive `expires_at` is silently ignored: nothing is created
    /// and an existing entry for `key` is left untouched.
    pub fn set(&self, key: impl Into<String>, value: V, expires_at: i64) {
        if expires_at <= 0 {
            return;
        }
        self.write().insert(key.into(), Entry { value, expires_at });
    }

    /// Returns a clone of the value for `key` if present and not expired.
    ///
    /// An expired entry is evicted: the read lock is released, the write lock
    /// taken, and the entry deleted if it is still expired. The lookup
    /// reports a miss on that path even when the re-check finds the entry
    /// was refreshed in between.
    pub fn try_get(&self, key: &str) -> Option<V> {
        {
            let entries = self.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(unix_now()) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        self.evict_if_still_expired(key, unix_now())
    }

    // Eviction half of `try_get`, after the read lock was released. Always a
    // miss, even when the entry was refreshed in between.
    fn evict_if_still_expired(&self, key: &str, now: i64) -> Option<V> {
        let mut entries = self.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    /// Deletes `key` if present.
    pub fn remove(&self, key: &str) {
        self.write().remove(key);
    }

    /// Deletes every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of stored entries, expired-but-not-yet-reclaimed ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Runs one sweep pass and returns how many entries it removed.
    ///
    /// Expired keys are collected under the read lock; the write lock is
    /// only taken when there is something to delete.
    pub fn sweep(&self) -> usize {
        let now = unix_now();
        let expired: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.write();
        for key in &expired {
            entries.remove(key);
        }
        expired.len()
    }

    /// Spawns the background sweep task on the current Tokio runtime.
    ///
    /// Calling this again while a sweeper is running does nothing. The task
    /// only holds a weak reference and ends on its own once the cache is
    /// dropped. Returns `false` when no runtime is available.
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        let mut slot = lock(&self.sweeper);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("no Tokio runtime available, cache sweeper not started");
                return false;
            }
        };

        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval;
        *slot = Some(runtime.spawn(sweep_loop(cache, period)));

        info!(interval = ?period, "cache sweeper started");
        true
    }

    /// Aborts the background sweep task, if running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
            debug!("cache sweeper stopped");
        }
    }

    /// Returns `true` while a sweep task is alive.
    pub fn is_sweeping(&self) -> bool {
        lock(&self.sweeper)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Convenience for [`absolute_time_from_now`].
    pub fn absolute_time_from_now(&self, duration: Duration) -> i64 {
        absolute_time_from_now(duration)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Default for Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for Cache<V> {
    fn drop(&mut self) {
        let slot = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

async fn sweep_loop<V>(cache: Weak<Cache<V>>, period: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
            break;
        };
        let removed = cache.sweep();
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time in whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Converts "`duration` from now" into the absolute expiry [`Cache::set`] expects.
pub fn absolute_time_from_now(duration: Duration) -> i64 {
    unix_now().saturating_add(duration.as_secs() as i64)
}
