use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};

use super::durable::DurableStore;
use super::entry::CacheEntry;
use super::key::{CacheKey, Invalidation};
use super::CacheError;

/// Namespace for every key this store writes to the durable tier.
const DURABLE_PREFIX: &str = "cache_";

/// Buffered persistence outcomes kept for slow subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one background durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistEvent {
    pub key: String,
    pub error: Option<String>,
}

impl PersistEvent {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

enum PersistOp {
    Write {
        key: String,
        value: String,
    },
    Remove {
        keys: Vec<String>,
        prefixes: Vec<String>,
        done: oneshot::Sender<()>,
    },
    Clear {
        done: oneshot::Sender<()>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

#[derive(Default)]
struct Volatile {
    entries: HashMap<String, CacheEntry<Value>>,
    /// Bumped on every removal so an in-flight durable read cannot promote
    /// an entry that was invalidated while it was suspended.
    epoch: u64,
}

/// Two-tier cache: an in-process map in front of a [`DurableStore`].
///
/// Volatile-tier reads and writes are synchronous. Durable writes run on a
/// background task and land in submission order; until a write lands the
/// volatile tier is authoritative. Removals go through the same queue and are
/// awaited, so `invalidate` returning means both tiers are clear.
///
/// Must be created inside a tokio runtime.
pub struct CacheStore {
    volatile: Mutex<Volatile>,
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
    events: broadcast::Sender<PersistEvent>,
}

impl CacheStore {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(durable, Arc::new(SystemClock))
    }

    pub fn with_clock(durable: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_persistence(
            Arc::clone(&durable),
            persist_rx,
            events.clone(),
        ));

        debug!(backend = durable.name(), "Cache store started");

        Self {
            volatile: Mutex::new(Volatile::default()),
            durable,
            clock,
            persist_tx,
            events,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Receive an event for every durable write completed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PersistEvent> {
        self.events.subscribe()
    }

    fn volatile(&self) -> MutexGuard<'_, Volatile> {
        // A panic while holding the lock cannot leave the map half-updated
        self.volatile.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn durable_key(key: &str) -> String {
        format!("{}{}", DURABLE_PREFIX, key)
    }

    /// Fresh entry for `key`, or `None` if missing or expired.
    ///
    /// A durable hit that is still fresh is promoted into the volatile tier.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<Value>> {
        let key = key.to_string();
        let now = self.clock.now();

        let epoch = {
            let volatile = self.volatile();
            if let Some(entry) = volatile.entries.get(&key) {
                if entry.is_expired(now) {
                    debug!(key = %key, "Cache entry expired");
                    return None;
                }
                debug!(key = %key, "Volatile cache hit");
                return Some(entry.clone());
            }
            volatile.epoch
        };

        let entry = self.load_durable(&key).await?;
        if entry.is_expired(now) {
            debug!(key = %key, "Durable cache entry expired");
            return None;
        }

        let mut volatile = self.volatile();
        if volatile.epoch != epoch {
            debug!(key = %key, "Cache invalidated during durable read");
            return None;
        }
        let promoted = volatile.entries.entry(key.clone()).or_insert(entry);
        debug!(key = %key, "Durable cache hit, promoted");
        Some(promoted.clone())
    }

    /// Entry for `key` regardless of age. Used for stale fallback.
    pub async fn get_ignoring_expiry(&self, key: &CacheKey) -> Option<CacheEntry<Value>> {
        let key = key.to_string();
        if let Some(entry) = self.volatile().entries.get(&key) {
            return Some(entry.clone());
        }
        self.load_durable(&key).await
    }

    async fn load_durable(&self, key: &str) -> Option<CacheEntry<Value>> {
        let raw = match self.durable.load(&Self::durable_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read durable cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to parse durable cache entry");
                None
            }
        }
    }

    /// Store `data` under `key`, stamped with the current time.
    ///
    /// The volatile tier is updated before returning; the durable write is
    /// queued and its failure is logged, never returned.
    pub fn set(&self, key: &CacheKey, data: Value, ttl: Duration) -> CacheEntry<Value> {
        let entry = CacheEntry::new(data, self.clock.now(), ttl, key.scope());
        let key = key.to_string();

        self.volatile().entries.insert(key.clone(), entry.clone());

        match serde_json::to_string(&entry) {
            Ok(value) => {
                let op = PersistOp::Write {
                    key: Self::durable_key(&key),
                    value,
                };
                if self.persist_tx.send(op).is_err() {
                    warn!(key = %key, error = %CacheError::WorkerStopped, "Cache entry not persisted");
                }
            }
            Err(e) => {
                warn!(key = %key, error = %CacheError::from(e), "Cache entry not persisted");
            }
        }

        entry
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.invalidate_many(std::slice::from_ref(key)).await;
    }

    pub async fn invalidate_many(&self, keys: &[CacheKey]) {
        let targets: Vec<Invalidation> = keys.iter().cloned().map(Invalidation::Key).collect();
        self.apply(&targets).await;
    }

    /// Remove every key starting with `prefix` from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.apply(&[Invalidation::Prefix(prefix.to_string())]).await;
    }

    /// Remove a batch of keys and prefixes from both tiers.
    ///
    /// Returns once the durable removals have been attempted.
    pub async fn apply(&self, targets: &[Invalidation]) {
        let mut keys = Vec::new();
        let mut prefixes = Vec::new();
        for target in targets {
            match target {
                Invalidation::Key(key) => keys.push(key.to_string()),
                Invalidation::Prefix(prefix) => prefixes.push(prefix.clone()),
            }
        }

        {
            let mut volatile = self.volatile();
            for key in &keys {
                volatile.entries.remove(key);
            }
            volatile
                .entries
                .retain(|key, _| !prefixes.iter().any(|p| key.starts_with(p.as_str())));
            volatile.epoch += 1;
        }

        debug!(?keys, ?prefixes, "Invalidating cache entries");

        let (done, wait) = oneshot::channel();
        let op = PersistOp::Remove {
            keys: keys.iter().map(|k| Self::durable_key(k)).collect(),
            prefixes: prefixes.iter().map(|p| Self::durable_key(p)).collect(),
            done,
        };
        self.submit(op, wait).await;
    }

    /// Wait until every queued durable operation has completed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.submit(PersistOp::Flush { done }, wait).await;
    }

    /// Drop the in-memory tier. Durable entries are kept.
    pub fn clear_volatile(&self) {
        let mut volatile = self.volatile();
        volatile.entries.clear();
        volatile.epoch += 1;
    }

    /// Wipe both tiers.
    pub async fn clear(&self) {
        self.clear_volatile();
        let (done, wait) = oneshot::channel();
        self.submit(PersistOp::Clear { done }, wait).await;
    }

    pub fn volatile_len(&self) -> usize {
        self.volatile().entries.len()
    }

    async fn submit(&self, op: PersistOp, wait: oneshot::Receiver<()>) {
        if self.persist_tx.send(op).is_err() || wait.await.is_err() {
            warn!(error = %CacheError::WorkerStopped, "Durable cache operation skipped");
        }
    }
}

/// Background task applying durable operations in submission order.
async fn run_persistence(
    durable: Arc<dyn DurableStore>,
    mut ops: mpsc::UnboundedReceiver<PersistOp>,
    events: broadcast::Sender<PersistEvent>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            PersistOp::Write { key, value } => {
                let error = match durable.save(&key, &value).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to persist cache entry");
                        Some(e.to_string())
                    }
                };
                // No subscribers is the normal case
                let _ = events.send(PersistEvent { key, error });
            }
            PersistOp::Remove {
                keys,
                prefixes,
                done,
            } => {
                remove_durable(durable.as_ref(), keys, &prefixes).await;
                let _ = done.send(());
            }
            PersistOp::Clear { done } => {
                if let Err(e) = clear_durable(durable.as_ref()).await {
                    warn!(error = %e, "Failed to clear durable cache");
                }
                let _ = done.send(());
            }
            PersistOp::Flush { done } => {
                let _ = done.send(());
            }
        }
    }
    debug!("Cache persistence worker stopped");
}

async fn remove_durable(durable: &dyn DurableStore, mut keys: Vec<String>, prefixes: &[String]) {
    if !prefixes.is_empty() {
        match durable.keys().await {
            Ok(existing) => keys.extend(
                existing
                    .into_iter()
                    .filter(|k| prefixes.iter().any(|p| k.starts_with(p.as_str()))),
            ),
            Err(e) => warn!(error = %e, "Failed to list durable cache keys"),
        }
    }
    for key in keys {
        if let Err(e) = durable.remove(&key).await {
            warn!(key = %key, error = %e, "Failed to remove durable cache entry");
        }
    }
}

/// Only removes keys in this store's namespace.
async fn clear_durable(durable: &dyn DurableStore) -> Result<(), CacheError> {
    for key in durable.keys().await? {
        if key.starts_with(DURABLE_PREFIX) {
            durable.remove(&key).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;

    const TWO_MINUTES: Duration = Duration::from_secs(120);

    fn store_with(durable: MemoryStore) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::with_clock(Arc::new(durable), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let (store, _) = store_with(MemoryStore::new());
        let key = CacheKey::stats(42);

        store.set(&key, json!({"score": 10}), TWO_MINUTES);

        let entry = store.get(&key).await.expect("fresh entry");
        assert_eq!(entry.data, json!({"score": 10}));
        assert_eq!(entry.scope.user_id, Some(42));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_but_still_stale_readable() {
        let (store, clock) = store_with(MemoryStore::new());
        let key = CacheKey::stats(42);
        store.set(&key, json!({"score": 10}), TWO_MINUTES);

        clock.advance(chrono::Duration::seconds(130));

        assert!(store.get(&key).await.is_none());
        let stale = store.get_ignoring_expiry(&key).await.expect("stale entry");
        assert_eq!(stale.data, json!({"score": 10}));
        // Expiry is a read-time classification, not a deletion
        assert_eq!(store.volatile_len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let durable = MemoryStore::new();
        let (store, _) = store_with(durable.clone());
        let key = CacheKey::stats(42);

        store.set(&key, json!(1), TWO_MINUTES);
        store.flush().await;
        assert_eq!(durable.len().await, 1);

        store.invalidate(&key).await;

        assert!(store.get(&key).await.is_none());
        assert!(store.get_ignoring_expiry(&key).await.is_none());
        assert!(durable.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_wins_over_pending_write() {
        let durable = MemoryStore::new();
        let (store, _) = store_with(durable.clone());
        let key = CacheKey::profile(1);

        // No flush between set and invalidate
        store.set(&key, json!("profile"), TWO_MINUTES);
        store.invalidate(&key).await;

        store.flush().await;
        assert!(durable.load("cache_profile_1").await.unwrap().is_none());
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_durable_hit_is_promoted() {
        let durable = MemoryStore::new();
        let clock = Arc::new(ManualClock::new());
        let key = CacheKey::categories();

        {
            let first = CacheStore::with_clock(Arc::new(durable.clone()), clock.clone());
            first.set(&key, json!(["signs", "lanes"]), key.ttl());
            first.flush().await;
        }

        // Fresh process: empty volatile tier over the same durable data
        let second = CacheStore::with_clock(Arc::new(durable), clock);
        assert_eq!(second.volatile_len(), 0);

        let entry = second.get(&key).await.expect("durable hit");
        assert_eq!(entry.data, json!(["signs", "lanes"]));
        assert_eq!(second.volatile_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_durable_entry_is_not_promoted() {
        let durable = MemoryStore::new();
        let clock = Arc::new(ManualClock::new());
        let key = CacheKey::stats(3);

        {
            let first = CacheStore::with_clock(Arc::new(durable.clone()), clock.clone());
            first.set(&key, json!(5), TWO_MINUTES);
            first.flush().await;
        }
        clock.advance(chrono::Duration::minutes(10));

        let second = CacheStore::with_clock(Arc::new(durable), clock);
        assert!(second.get(&key).await.is_none());
        assert_eq!(second.volatile_len(), 0);
        assert!(second.get_ignoring_expiry(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let durable = MemoryStore::new();
        let (store, _) = store_with(durable.clone());

        store.set(&CacheKey::attempts(7, 1), json!([]), TWO_MINUTES);
        store.set(&CacheKey::attempts(7, 2), json!([]), TWO_MINUTES);
        store.set(&CacheKey::attempts(71, 1), json!([]), TWO_MINUTES);
        store.flush().await;

        store.invalidate_prefix("attempts_7_").await;

        assert!(store.get(&CacheKey::attempts(7, 1)).await.is_none());
        assert!(store.get(&CacheKey::attempts(7, 2)).await.is_none());
        assert!(store.get(&CacheKey::attempts(71, 1)).await.is_some());
        assert_eq!(durable.keys().await.unwrap(), vec!["cache_attempts_71_1".to_string()]);
    }

    #[tokio::test]
    async fn test_set_refreshes_timestamp() {
        let (store, clock) = store_with(MemoryStore::new());
        let key = CacheKey::stats(42);

        let first = store.set(&key, json!({"score": 10}), TWO_MINUTES);
        clock.advance(chrono::Duration::seconds(30));
        let second = store.set(&key, json!({"score": 15}), TWO_MINUTES);

        assert!(second.timestamp > first.timestamp);
        let entry = store.get(&key).await.expect("entry");
        assert_eq!(entry.data, json!({"score": 15}));
        assert_eq!(entry.timestamp, second.timestamp);
    }

    #[tokio::test]
    async fn test_persist_events_are_observable() {
        let (store, _) = store_with(MemoryStore::new());
        let mut events = store.subscribe();

        store.set(&CacheKey::phases(2), json!([1]), TWO_MINUTES);

        let event = events.recv().await.expect("persist event");
        assert_eq!(event.key, "cache_phases_2");
        assert!(event.is_ok());
    }

    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn save(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(std::io::Error::other("disk full").into())
        }

        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_durable_failures_are_swallowed() {
        let store = CacheStore::new(Arc::new(BrokenStore));
        let mut events = store.subscribe();
        let key = CacheKey::stats(1);

        store.set(&key, json!(1), TWO_MINUTES);

        let event = events.recv().await.expect("persist event");
        assert!(!event.is_ok());
        // Volatile tier still serves the value
        assert_eq!(store.get(&key).await.map(|e| e.data), Some(json!(1)));

        store.invalidate(&key).await;
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_wipes_both_tiers() {
        let durable = MemoryStore::new();
        durable.save("unrelated", "keep").await.unwrap();
        let (store, _) = store_with(durable.clone());

        store.set(&CacheKey::stats(1), json!(1), TWO_MINUTES);
        store.set(&CacheKey::categories(), json!([]), TWO_MINUTES);
        store.flush().await;

        store.clear().await;

        assert_eq!(store.volatile_len(), 0);
        assert_eq!(durable.keys().await.unwrap(), vec!["unrelated".to_string()]);
    }
}
