// SPDX-License-Identifier: Apache-2.0

use crate::error::ApiError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use omics_portal_model::{DatasetId, EntityKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resolves one entity key against the backend.
#[async_trait]
pub trait EntityFetcher<T>: Send + Sync {
    /// Whether the dataset-wide `all` key has a payload of its own.
    fn supports_aggregate(&self) -> bool {
        false
    }

    async fn fetch(&self, key: &EntityKey) -> Result<T, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    pub key: EntityKey,
    pub status: EntryStatus,
    pub value: Option<Arc<T>>,
    pub error: Option<String>,
    /// Cache-wide counter value taken when the fetch for this entry started.
    pub request_generation: u64,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
            request_generation: self.request_generation,
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub fetches_started: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub stale_discarded: AtomicU64,
    pub evicted: AtomicU64,
}

type Outcome<T> = Result<Arc<T>, String>;

struct Inflight<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
    task: JoinHandle<()>,
}

struct Slot<T> {
    entry: CacheEntry<T>,
    inflight: Option<Inflight<T>>,
}

struct CacheState<T> {
    slots: HashMap<EntityKey, Slot<T>>,
    next_generation: u64,
}

/// What one `sync` call produced, per requested key.
#[derive(Debug)]
pub struct SyncReport<T> {
    pub values: BTreeMap<EntityKey, Arc<T>>,
    pub failures: BTreeMap<EntityKey, String>,
    /// Fetches aborted or superseded before they resolved.
    pub cancelled: Vec<EntityKey>,
    /// Aggregate keys this cache has no payload for.
    pub skipped: Vec<EntityKey>,
}

impl<T> Default for SyncReport<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            failures: BTreeMap::new(),
            cancelled: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> SyncReport<T> {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

/// Fetches registered by [`EntityCache::begin_sync`]; await them with [`SyncTicket::wait`].
pub struct SyncTicket<T> {
    report: SyncReport<T>,
    waiters: Vec<(EntityKey, watch::Receiver<Option<Outcome<T>>>)>,
}

impl<T> SyncTicket<T> {
    pub async fn wait(self) -> SyncReport<T> {
        let mut report = self.report;
        for (key, mut rx) in self.waiters {
            match wait_outcome(&mut rx).await {
                Some(Ok(value)) => {
                    report.values.insert(key, value);
                }
                Some(Err(message)) => {
                    report.failures.insert(key, message);
                }
                None => report.cancelled.push(key),
            }
        }
        report
    }
}

async fn wait_outcome<T>(rx: &mut watch::Receiver<Option<Outcome<T>>>) -> Option<Outcome<T>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            // Sender dropped: the fetch was aborted or its result discarded as stale.
            return rx.borrow().clone();
        }
    }
}

/// Keyed store of fetched entities with single-flight fetches and generation-guarded writes.
///
/// At most one fetch is in flight per key. A completed fetch only lands if its
/// generation still matches the entry; eviction and invalidation abort the task.
pub struct EntityCache<T> {
    name: &'static str,
    fetcher: Arc<dyn EntityFetcher<T>>,
    retry: RetryPolicy,
    state: Arc<Mutex<CacheState<T>>>,
    metrics: Arc<CacheMetrics>,
}

impl<T: Send + Sync + 'static> EntityCache<T> {
    pub fn new(name: &'static str, fetcher: Arc<dyn EntityFetcher<T>>) -> Self {
        Self {
            name,
            fetcher,
            retry: RetryPolicy::default(),
            state: Arc::new(Mutex::new(CacheState {
                slots: HashMap::new(),
                next_generation: 0,
            })),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Ensures every key is Ready or Pending and waits for the outcome.
    pub async fn sync(&self, keys: &[EntityKey]) -> SyncReport<T> {
        self.begin_sync(keys).await.wait().await
    }

    /// Registers fetches for missing or failed keys without waiting for them.
    pub async fn begin_sync(&self, keys: &[EntityKey]) -> SyncTicket<T> {
        let mut report = SyncReport::default();
        let mut waiters = Vec::new();
        let mut state = self.state.lock().await;
        for key in keys {
            if key.is_aggregate() && !self.fetcher.supports_aggregate() {
                report.skipped.push(key.clone());
                continue;
            }
            if let Some(slot) = state.slots.get(key) {
                match (&slot.entry.status, &slot.entry.value, &slot.inflight) {
                    (EntryStatus::Ready, Some(value), _) => {
                        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                        report.values.insert(key.clone(), Arc::clone(value));
                        continue;
                    }
                    (EntryStatus::Pending, _, Some(inflight)) => {
                        waiters.push((key.clone(), inflight.rx.clone()));
                        continue;
                    }
                    _ => {}
                }
            }
            let rx = self.start_fetch(&mut state, key.clone());
            waiters.push((key.clone(), rx));
        }
        SyncTicket { report, waiters }
    }

    fn start_fetch(
        &self,
        state: &mut CacheState<T>,
        key: EntityKey,
    ) -> watch::Receiver<Option<Outcome<T>>> {
        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = watch::channel(None);
        let fetcher = Arc::clone(&self.fetcher);
        let shared = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let retry = self.retry.clone();
        let name = self.name;
        let task_key = key.clone();
        self.metrics.fetches_started.fetch_add(1, Ordering::Relaxed);
        debug!(cache = name, key = %key, generation, "entity fetch started");
        let task = tokio::spawn(async move {
            let operation = format!("{name}:{task_key}");
            let result = retry_with_backoff(&retry, &operation, || fetcher.fetch(&task_key)).await;
            let outcome: Outcome<T> = result.map(Arc::new).map_err(|e| e.to_string());
            let mut state = shared.lock().await;
            let Some(slot) = state
                .slots
                .get_mut(&task_key)
                .filter(|slot| slot.entry.request_generation == generation)
            else {
                metrics.stale_discarded.fetch_add(1, Ordering::Relaxed);
                debug!(cache = name, key = %task_key, generation, "stale response discarded");
                return;
            };
            slot.inflight = None;
            match &outcome {
                Ok(value) => {
                    slot.entry.status = EntryStatus::Ready;
                    slot.entry.value = Some(Arc::clone(value));
                    slot.entry.error = None;
                    debug!(cache = name, key = %task_key, generation, "entity fetch finished");
                }
                Err(message) => {
                    slot.entry.status = EntryStatus::Error;
                    slot.entry.value = None;
                    slot.entry.error = Some(message.clone());
                    metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(cache = name, key = %task_key, "entity fetch failed: {message}");
                }
            }
            drop(state);
            let _ = tx.send(Some(outcome));
        });
        state.slots.insert(
            key.clone(),
            Slot {
                entry: CacheEntry {
                    key,
                    status: EntryStatus::Pending,
                    value: None,
                    error: None,
                    request_generation: generation,
                },
                inflight: Some(Inflight {
                    rx: rx.clone(),
                    task,
                }),
            },
        );
        rx
    }

    /// Drops every entry whose key is not in `keep`, aborting its in-flight fetch.
    pub async fn evict(&self, keep: &HashSet<EntityKey>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.slots.len();
        state.slots.retain(|key, slot| {
            let retained = keep.contains(key);
            if !retained {
                if let Some(inflight) = slot.inflight.take() {
                    inflight.task.abort();
                }
            }
            retained
        });
        let removed = before - state.slots.len();
        if removed > 0 {
            self.metrics
                .evicted
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(cache = self.name, removed, "evicted unselected entries");
        }
        removed
    }

    pub async fn invalidate_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.slots.len();
        for (_, slot) in state.slots.drain() {
            if let Some(inflight) = slot.inflight {
                inflight.task.abort();
            }
        }
        if removed > 0 {
            debug!(cache = self.name, removed, "cache invalidated");
        }
        removed
    }

    /// The value for `key` when it is Ready.
    pub async fn get(&self, key: &EntityKey) -> Option<Arc<T>> {
        let state = self.state.lock().await;
        state
            .slots
            .get(key)
            .and_then(|slot| slot.entry.value.as_ref().map(Arc::clone))
    }

    pub async fn status(&self, key: &EntityKey) -> Option<EntryStatus> {
        self.state
            .lock()
            .await
            .slots
            .get(key)
            .map(|slot| slot.entry.status)
    }

    pub async fn entry(&self, key: &EntityKey) -> Option<CacheEntry<T>> {
        self.state
            .lock()
            .await
            .slots
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    /// All entries, sorted by key.
    pub async fn snapshot(&self) -> Vec<CacheEntry<T>> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state.slots.values().map(|s| s.entry.clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Entries tagged with `dataset`, sorted by key.
    pub async fn snapshot_for(&self, dataset: &DatasetId) -> Vec<CacheEntry<T>> {
        let mut entries = self.snapshot().await;
        entries.retain(|e| &e.key.dataset == dataset);
        entries
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn keys(&self) -> Vec<EntityKey> {
        let state = self.state.lock().await;
        let mut keys: Vec<_> = state.slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn inflight(&self) -> usize {
        self.state
            .lock()
            .await
            .slots
            .values()
            .filter(|s| s.inflight.is_some())
            .count()
    }
}

/// Type-erased view of a cache so one selection change can drive several caches.
#[async_trait]
pub trait CacheHandle: Send + Sync {
    fn cache_name(&self) -> &'static str;
    async fn begin(&self, keys: &[EntityKey]) -> PendingSync;
    async fn evict_unselected(&self, keep: &HashSet<EntityKey>) -> usize;
    async fn invalidate(&self) -> usize;
}

/// [`SyncTicket`] with the value type erased.
pub struct PendingSync {
    cache: &'static str,
    wait: std::pin::Pin<Box<dyn std::future::Future<Output = SyncSummary> + Send>>,
}

impl PendingSync {
    pub async fn wait(self) -> SyncSummary {
        let mut summary = self.wait.await;
        summary.cache = self.cache;
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub cache: &'static str,
    pub ready: Vec<EntityKey>,
    pub failures: BTreeMap<EntityKey, String>,
    pub cancelled: Vec<EntityKey>,
    pub skipped: Vec<EntityKey>,
}

impl<T> From<SyncReport<T>> for SyncSummary {
    fn from(report: SyncReport<T>) -> Self {
        Self {
            cache: "",
            ready: report.values.into_keys().collect(),
            failures: report.failures,
            cancelled: report.cancelled,
            skipped: report.skipped,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> CacheHandle for EntityCache<T> {
    fn cache_name(&self) -> &'static str {
        self.name
    }

    async fn begin(&self, keys: &[EntityKey]) -> PendingSync {
        let ticket = self.begin_sync(keys).await;
        PendingSync {
            cache: self.name,
            wait: Box::pin(async move { SyncSummary::from(ticket.wait().await) }),
        }
    }

    async fn evict_unselected(&self, keep: &HashSet<EntityKey>) -> usize {
        self.evict(keep).await
    }

    async fn invalidate(&self) -> usize {
        self.invalidate_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omics_portal_model::EntityKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl EntityFetcher<String> for CountingFetcher {
        async fn fetch(&self, key: &EntityKey) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(format!("value:{key}"))
        }
    }

    fn key(id: &str) -> EntityKey {
        let ds = DatasetId::parse("pd").expect("dataset");
        EntityKey::parse(&ds, EntityKind::Gene, id).expect("key")
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_aborts_inflight_fetch_and_discards_result() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        });
        let cache = EntityCache::new("expression", fetcher.clone() as Arc<dyn EntityFetcher<String>>);
        let ticket = cache.begin_sync(&[key("SNCA")]).await;
        assert_eq!(cache.status(&key("SNCA")).await, Some(EntryStatus::Pending));

        assert_eq!(cache.evict(&HashSet::new()).await, 1);
        let report = ticket.wait().await;
        assert_eq!(report.cancelled, vec![key("SNCA")]);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_after_eviction_gets_a_newer_generation() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        });
        let cache = EntityCache::new("expression", fetcher as Arc<dyn EntityFetcher<String>>);
        cache.sync(&[key("GBA")]).await;
        let first = cache.entry(&key("GBA")).await.expect("entry").request_generation;
        cache.evict(&HashSet::new()).await;
        cache.sync(&[key("GBA")]).await;
        let second = cache.entry(&key("GBA")).await.expect("entry").request_generation;
        assert!(second > first);
    }

    #[tokio::test]
    async fn aggregate_key_is_skipped_without_aggregate_support() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let cache = EntityCache::new("sample_images", fetcher.clone() as Arc<dyn EntityFetcher<String>>);
        let report = cache.sync(&[key("all")]).await;
        assert_eq!(report.skipped, vec![key("all")]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty().await);
    }
}
