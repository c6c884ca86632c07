//! Window content cache with per-window load coalescing.
//!
//! Entries are restricted to *resident* windows: the manager admits a window
//! when it enters the buffer and evicts it when it leaves, and eviction drops
//! the cached blob immediately. Memory is therefore bounded by the buffer
//! size, with no TTL.
//!
//! # Loading
//!
//! [`WindowContentCache::request_load`] starts at most one generation per
//! window. The generation is a [`Shared`] future stored in an in-flight map,
//! so every concurrent caller awaits the same result. When a tokio runtime is
//! available the load is also spawned so it progresses without anyone
//! awaiting it; otherwise it runs when first awaited.
//!
//! Eviction keeps a window's in-flight load, so a window that leaves the
//! buffer and comes back before the load finishes joins it instead of
//! starting a second generation. A load that completes while its window is
//! not resident, or after the cache was cleared, is discarded without
//! touching the cache, and its waiters get [`BeltError::StaleCallback`].
//!
//! # Thread Safety
//!
//! State lives behind one `std::sync::Mutex` that is never held across an
//! `.await`. The cache is cheap to clone; clones share state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::retry::generate_with_retry;
use super::{ContentBlob, ContentError, ContentProvider, RetryConfig};
use crate::events::{BeltEvent, EventHandler, NoopHandler};
use crate::{BeltError, Result, WindowIndex};

type LoadFuture = Shared<BoxFuture<'static, Result<ContentBlob>>>;

/// Readiness of one window's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoadState {
    /// Not cached and not loading.
    Absent,
    /// A generation is in flight.
    Loading,
    /// Content is cached and displayable.
    Ready,
    /// The last generation failed.
    Failed(String),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads_started: u64,
    pub stale_discards: u64,
}

impl CacheStats {
    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct InFlight {
    id: u64,
    future: LoadFuture,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<WindowIndex, ContentBlob>,
    in_flight: HashMap<WindowIndex, InFlight>,
    failures: HashMap<WindowIndex, String>,
    resident: HashSet<WindowIndex>,
    /// Bumped by `clear`; loads started under an older generation are stale.
    generation: u64,
    next_load_id: u64,
    hits: u64,
    misses: u64,
    loads_started: u64,
    stale_discards: u64,
}

/// Handle to a requested load.
///
/// Dropping it does not cancel the load.
pub struct PendingLoad {
    window: WindowIndex,
    state: PendingState,
}

enum PendingState {
    Ready(ContentBlob),
    InFlight(LoadFuture),
    NotResident,
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            PendingState::Ready(_) => "ready",
            PendingState::InFlight(_) => "in_flight",
            PendingState::NotResident => "not_resident",
        };
        f.debug_struct("PendingLoad")
            .field("window", &self.window)
            .field("state", &state)
            .finish()
    }
}

impl PendingLoad {
    pub fn window(&self) -> WindowIndex {
        self.window
    }

    /// Whether the content was already cached when requested.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PendingState::Ready(_))
    }

    /// Wait for the content.
    ///
    /// Fails with [`BeltError::StaleCallback`] when the window was no longer
    /// resident by the time its load finished.
    pub async fn wait(self) -> Result<ContentBlob> {
        match self.state {
            PendingState::Ready(blob) => Ok(blob),
            PendingState::InFlight(future) => future.await,
            PendingState::NotResident => Err(BeltError::NotResident(self.window)),
        }
    }
}

/// A group of loads that can be awaited together.
#[derive(Debug)]
pub struct BatchLoad {
    loads: Vec<PendingLoad>,
}

impl BatchLoad {
    pub(crate) fn empty() -> Self {
        Self { loads: Vec::new() }
    }

    /// Windows in this batch, in request order.
    pub fn windows(&self) -> Vec<WindowIndex> {
        self.loads.iter().map(PendingLoad::window).collect()
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Wait for every load, returning each window's outcome.
    pub async fn wait(self) -> Vec<(WindowIndex, Result<ContentBlob>)> {
        join_all(self.loads.into_iter().map(|load| async move {
            let window = load.window();
            (window, load.wait().await)
        }))
        .await
    }

    /// Wait for every load, failing with the first error in request order.
    pub async fn wait_all(self) -> Result<()> {
        for (_, outcome) in self.wait().await {
            outcome?;
        }
        Ok(())
    }
}

/// Content cache keyed by window index, bounded by buffer membership.
#[derive(Clone)]
pub struct WindowContentCache {
    inner: Arc<Mutex<CacheInner>>,
    provider: Arc<dyn ContentProvider>,
    retry: RetryConfig,
    handler: Arc<dyn EventHandler>,
}

impl WindowContentCache {
    /// Create an empty cache backed by `provider`.
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            provider,
            retry: RetryConfig::default(),
            handler: Arc::new(NoopHandler),
        }
    }

    /// Set the retry policy for transient provider failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Report load completions to `handler`.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Lock the shared state, ignoring poisoning.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `window` resident so its content may be cached.
    pub fn admit(&self, window: WindowIndex) {
        self.lock().resident.insert(window);
    }

    pub fn is_resident(&self, window: WindowIndex) -> bool {
        self.lock().resident.contains(&window)
    }

    /// Start loading `window` unless it is cached or already loading.
    ///
    /// Requests for a window that is not resident are rejected; the returned
    /// handle resolves to [`BeltError::NotResident`].
    pub fn request_load(&self, window: WindowIndex) -> PendingLoad {
        let mut inner = self.lock();
        if let Some(blob) = inner.entries.get(&window) {
            return PendingLoad {
                window,
                state: PendingState::Ready(blob.clone()),
            };
        }
        if !inner.resident.contains(&window) {
            debug!("rejecting load for non-resident window {window}");
            return PendingLoad {
                window,
                state: PendingState::NotResident,
            };
        }
        if let Some(in_flight) = inner.in_flight.get(&window) {
            trace!("joining in-flight load for window {window}");
            return PendingLoad {
                window,
                state: PendingState::InFlight(in_flight.future.clone()),
            };
        }

        let id = inner.next_load_id;
        inner.next_load_id += 1;
        inner.loads_started += 1;
        inner.failures.remove(&window);
        let future = self.load_future(window, id, inner.generation);
        inner.in_flight.insert(
            window,
            InFlight {
                id,
                future: future.clone(),
            },
        );
        drop(inner);

        debug!("loading window {window}");
        self.handler.on_event(&BeltEvent::LoadRequested { window });
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(future.clone().map(|_| ()));
        }
        PendingLoad {
            window,
            state: PendingState::InFlight(future),
        }
    }

    /// Request every window in `windows`.
    pub fn request_load_batch(&self, windows: impl IntoIterator<Item = WindowIndex>) -> BatchLoad {
        BatchLoad {
            loads: windows
                .into_iter()
                .map(|window| self.request_load(window))
                .collect(),
        }
    }

    /// Re-request a resident window whose last load failed.
    ///
    /// Returns `None` when the window is not in the failed state.
    pub fn retry(&self, window: WindowIndex) -> Option<PendingLoad> {
        if !matches!(self.load_state(window), LoadState::Failed(_)) {
            return None;
        }
        Some(self.request_load(window))
    }

    /// Cached content for `window`, without blocking.
    pub fn get(&self, window: WindowIndex) -> Option<ContentBlob> {
        let mut inner = self.lock();
        match inner.entries.get(&window).cloned() {
            Some(blob) => {
                inner.hits += 1;
                Some(blob)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether `window` is cached. Does not count as a hit or miss.
    pub fn contains(&self, window: WindowIndex) -> bool {
        self.lock().entries.contains_key(&window)
    }

    /// Content for `window`, generating it on demand when it is not cached.
    ///
    /// Joins an in-flight load when there is one. A window that is not
    /// resident is generated without being cached.
    pub async fn ensure_loaded(&self, window: WindowIndex) -> Result<ContentBlob> {
        let pending = self.request_load(window);
        if let PendingState::NotResident = pending.state {
            debug!("generating non-resident window {window} on demand");
            return generate_with_retry(self.provider.as_ref(), window, &self.retry)
                .await
                .map_err(|source| BeltError::LoadFailure { window, source });
        }
        pending.wait().await
    }

    pub fn load_state(&self, window: WindowIndex) -> LoadState {
        let inner = self.lock();
        Self::state_of(&inner, window)
    }

    /// Load state of each of `windows`.
    pub fn load_states(&self, windows: &[WindowIndex]) -> BTreeMap<WindowIndex, LoadState> {
        let inner = self.lock();
        windows
            .iter()
            .map(|&window| (window, Self::state_of(&inner, window)))
            .collect()
    }

    fn state_of(inner: &CacheInner, window: WindowIndex) -> LoadState {
        if inner.entries.contains_key(&window) {
            LoadState::Ready
        } else if inner.in_flight.contains_key(&window) && inner.resident.contains(&window) {
            LoadState::Loading
        } else if let Some(reason) = inner.failures.get(&window) {
            LoadState::Failed(reason.clone())
        } else {
            LoadState::Absent
        }
    }

    /// Drop `window` from the cache and from the resident set.
    ///
    /// An in-flight load for it keeps running. If the window is admitted
    /// again before the load finishes, new requests join it; otherwise it is
    /// discarded on completion. Returns whether content was cached.
    pub fn evict(&self, window: WindowIndex) -> bool {
        let mut inner = self.lock();
        inner.resident.remove(&window);
        inner.failures.remove(&window);
        let had_entry = inner.entries.remove(&window).is_some();
        trace!("evicted window {window} (cached: {had_entry})");
        had_entry
    }

    /// Drop every entry and resident window. Loads in flight become stale.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.entries.clear();
        inner.in_flight.clear();
        inner.failures.clear();
        inner.resident.clear();
    }

    /// Cached windows in ascending order.
    pub fn cached_windows(&self) -> Vec<WindowIndex> {
        let mut windows: Vec<_> = self.lock().entries.keys().copied().collect();
        windows.sort_unstable();
        windows
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
            hits: inner.hits,
            misses: inner.misses,
            loads_started: inner.loads_started,
            stale_discards: inner.stale_discards,
        }
    }

    fn load_future(&self, window: WindowIndex, id: u64, generation: u64) -> LoadFuture {
        let provider = Arc::clone(&self.provider);
        let retry = self.retry.clone();
        let handler = Arc::clone(&self.handler);
        // Weak so a load that is never polled cannot keep the cache alive.
        let inner = Arc::downgrade(&self.inner);
        async move {
            let result = generate_with_retry(provider.as_ref(), window, &retry).await;
            settle(&inner, handler.as_ref(), window, id, generation, result)
        }
        .boxed()
        .shared()
    }
}

/// Record a finished load, unless it went stale while in flight.
fn settle(
    inner: &Weak<Mutex<CacheInner>>,
    handler: &dyn EventHandler,
    window: WindowIndex,
    id: u64,
    generation: u64,
    result: std::result::Result<ContentBlob, ContentError>,
) -> Result<ContentBlob> {
    let Some(inner) = inner.upgrade() else {
        return result.map_err(|source| BeltError::LoadFailure { window, source });
    };
    let stale = {
        let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.in_flight.get(&window).is_some_and(|f| f.id == id) {
            inner.in_flight.remove(&window);
        }
        let stale = inner.generation != generation || !inner.resident.contains(&window);
        if stale {
            inner.stale_discards += 1;
        } else {
            match &result {
                Ok(blob) => {
                    inner.failures.remove(&window);
                    inner.entries.insert(window, blob.clone());
                }
                Err(e) => {
                    inner.failures.insert(window, e.to_string());
                }
            }
        }
        stale
    };

    if stale {
        debug!("discarding stale load for window {window}");
        handler.on_event(&BeltEvent::StaleLoadDiscarded { window });
        return Err(BeltError::StaleCallback { window });
    }
    match result {
        Ok(blob) => {
            debug!("window {window} ready");
            handler.on_event(&BeltEvent::WindowLoaded { window });
            Ok(blob)
        }
        Err(source) => {
            warn!("window {window} failed to load: {source}");
            handler.on_event(&BeltEvent::LoadFailed {
                window,
                error: &source,
            });
            Err(BeltError::LoadFailure { window, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentFuture, SyntheticProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Provider whose generations block until the test releases them.
    struct GatedProvider {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    impl GatedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            })
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    impl ContentProvider for GatedProvider {
        fn generate(&self, window: WindowIndex) -> ContentFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| ContentError::Unavailable(e.to_string()))?;
                permit.forget();
                Ok(ContentBlob::new(window, format!("window {window}")))
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn on_event(&self, event: &BeltEvent<'_>) {
            let line = match event {
                BeltEvent::WindowLoaded { window } => format!("loaded {window}"),
                BeltEvent::LoadFailed { window, .. } => format!("failed {window}"),
                BeltEvent::StaleLoadDiscarded { window } => format!("stale {window}"),
                _ => return,
            };
            self.0.lock().unwrap().push(line);
        }
    }

    fn synthetic_cache(total: usize) -> WindowContentCache {
        WindowContentCache::new(Arc::new(SyntheticProvider::new(total)))
    }

    #[tokio::test]
    async fn resident_window_loads_and_caches() {
        let cache = synthetic_cache(10);
        cache.admit(3);
        let blob = cache.request_load(3).wait().await.unwrap();
        assert_eq!(blob.window(), 3);
        assert_eq!(cache.load_state(3), LoadState::Ready);
        assert_eq!(cache.get(3), Some(blob));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn cached_window_is_returned_without_reloading() {
        let provider = Arc::new(SyntheticProvider::new(10));
        let cache = WindowContentCache::new(provider.clone());
        cache.admit(1);
        cache.request_load(1).wait().await.unwrap();
        let again = cache.request_load(1);
        assert!(again.is_ready());
        again.wait().await.unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_into_one_generation() {
        let provider = GatedProvider::new();
        let cache = WindowContentCache::new(provider.clone());
        cache.admit(7);

        let first = cache.request_load(7);
        let second = cache.request_load(7);
        assert_eq!(cache.stats().in_flight, 1);
        assert_eq!(cache.load_state(7), LoadState::Loading);

        provider.release(1);
        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads_started, 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn non_resident_request_is_rejected() {
        let cache = synthetic_cache(10);
        let err = cache.request_load(4).wait().await.unwrap_err();
        assert_eq!(err, BeltError::NotResident(4));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn load_completing_after_eviction_is_discarded() {
        let provider = GatedProvider::new();
        let recorder = Arc::new(Recorder::default());
        let cache = WindowContentCache::new(provider.clone()).with_event_handler(recorder.clone());
        cache.admit(2);
        let pending = cache.request_load(2);

        assert!(!cache.evict(2));
        assert_eq!(cache.load_state(2), LoadState::Absent);
        provider.release(1);
        assert_eq!(
            pending.wait().await.unwrap_err(),
            BeltError::StaleCallback { window: 2 }
        );
        assert!(!cache.contains(2));
        assert_eq!(cache.stats().in_flight, 0);
        assert_eq!(cache.stats().stale_discards, 1);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["stale 2".to_string()]);
    }

    #[tokio::test]
    async fn load_completing_after_clear_is_discarded() {
        let provider = GatedProvider::new();
        let cache = WindowContentCache::new(provider.clone());
        cache.admit(2);
        let pending = cache.request_load(2);
        cache.clear();
        cache.admit(2);

        provider.release(1);
        assert_eq!(
            pending.wait().await.unwrap_err(),
            BeltError::StaleCallback { window: 2 }
        );
        assert!(!cache.contains(2));
        assert_eq!(cache.stats().stale_discards, 1);
    }

    #[tokio::test]
    async fn readmitted_window_joins_its_pending_load() {
        let provider = GatedProvider::new();
        let cache = WindowContentCache::new(provider.clone());
        cache.admit(4);
        let before = cache.request_load(4);

        // Bounce the window out of the buffer and back several times.
        for _ in 0..5 {
            cache.evict(4);
            cache.admit(4);
        }
        let after = cache.request_load(4);
        assert_eq!(cache.load_state(4), LoadState::Loading);
        assert_eq!(cache.stats().loads_started, 1);

        provider.release(1);
        let (a, b) = tokio::join!(before.wait(), after.wait());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(4));
        assert_eq!(cache.stats().stale_discards, 0);
    }

    #[tokio::test]
    async fn eviction_drops_cached_content() {
        let cache = synthetic_cache(10);
        cache.admit(5);
        cache.request_load(5).wait().await.unwrap();
        assert!(cache.evict(5));
        assert_eq!(cache.load_state(5), LoadState::Absent);
        assert!(!cache.is_resident(5));
        assert!(cache.cached_windows().is_empty());
    }

    #[tokio::test]
    async fn failures_are_recorded_and_retryable() {
        let provider = Arc::new(SyntheticProvider::new(10).with_transient_failures(6, 1));
        let recorder = Arc::new(Recorder::default());
        let cache = WindowContentCache::new(provider.clone())
            .with_retry(RetryConfig::disabled())
            .with_event_handler(recorder.clone());
        cache.admit(6);

        let err = cache.request_load(6).wait().await.unwrap_err();
        assert!(matches!(err, BeltError::LoadFailure { window: 6, .. }));
        assert!(matches!(cache.load_state(6), LoadState::Failed(_)));

        let retried = cache.retry(6).expect("failed window is retryable");
        retried.wait().await.unwrap();
        assert_eq!(cache.load_state(6), LoadState::Ready);
        assert!(cache.retry(6).is_none());
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["failed 6".to_string(), "loaded 6".to_string()]
        );
    }

    #[tokio::test]
    async fn ensure_loaded_generates_non_resident_windows_uncached() {
        let cache = synthetic_cache(10);
        let blob = cache.ensure_loaded(8).await.unwrap();
        assert_eq!(blob.window(), 8);
        assert!(!cache.contains(8));
    }

    #[tokio::test]
    async fn ensure_loaded_joins_in_flight_load() {
        let provider = GatedProvider::new();
        let cache = WindowContentCache::new(provider.clone());
        cache.admit(1);
        let _background = cache.request_load(1);

        let on_demand = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.ensure_loaded(1).await })
        };
        tokio::task::yield_now().await;
        provider.release(1);
        assert_eq!(on_demand.await.unwrap().unwrap().window(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_reports_each_window() {
        let provider = Arc::new(SyntheticProvider::new(10).with_failing([2]));
        let cache = WindowContentCache::new(provider).with_retry(RetryConfig::disabled());
        for window in 0..4 {
            cache.admit(window);
        }
        let batch = cache.request_load_batch(0..4);
        assert_eq!(batch.windows(), vec![0, 1, 2, 3]);
        let outcomes = batch.wait().await;
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(window, _)| *window)
            .collect();
        assert_eq!(failed, vec![2]);
        assert_eq!(cache.cached_windows(), vec![0, 1, 3]);
    }

    #[test]
    fn load_without_runtime_runs_when_awaited() {
        let cache = synthetic_cache(10);
        cache.admit(0);
        let pending = cache.request_load(0);
        assert_eq!(cache.load_state(0), LoadState::Loading);
        let blob = futures::executor::block_on(pending.wait()).unwrap();
        assert_eq!(blob.window(), 0);
        assert!(cache.contains(0));
    }

    #[test]
    fn hit_rate_counts_gets() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
