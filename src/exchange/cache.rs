//! Response cache with request coalescing.
//!
//! # Reads
//!
//! Query results are stored by operation key. How a read is answered depends
//! on its [`RequestPolicy`]:
//!
//! | Policy            | Fresh entry             | No / expired entry      |
//! |-------------------|-------------------------|-------------------------|
//! | `CacheFirst`      | cached result           | network                 |
//! | `CacheOnly`       | cached result           | `CacheMiss` error       |
//! | `NetworkOnly`     | network                 | network                 |
//! | `CacheAndNetwork` | cached (stale), network | network                 |
//!
//! Concurrent reads for the same key share one downstream call. The in-flight
//! table holds the shared future weakly: once every caller has dropped its
//! stream the downstream future (and its HTTP request) is dropped too, and the
//! abandoned read leaves nothing behind in the cache.
//!
//! # Invalidation
//!
//! Every entry remembers the entity typenames it depends on: the operation's
//! declared `additional_typenames` plus, when `infer_typenames` is on, every
//! `__typename` found in the result data. A successful mutation computes its
//! affected set the same way and evicts every entry whose set intersects it.
//! This over-invalidates (any `Anime` mutation evicts every read that touched
//! an `Anime`), which is acceptable; it never under-invalidates a read whose
//! typenames were declared or selected.
//!
//! Invalidation also reaches reads still in flight. Each invalidation bumps
//! an epoch and is logged with its affected set; a read that started before
//! an invalidation overlapping its own entity set delivers its result but
//! does not store it. [`CacheExchange::clear`] is logged as affecting
//! everything.
//!
//! # Failure
//!
//! A poisoned store lock is treated as an unavailable cache: the operation is
//! forwarded untouched and nothing is stored.

use super::{first_result, once, Exchange, Next, ResultStream};
use crate::error::ExchangeError;
use crate::operation::{
    Operation, OperationKey, OperationKind, OperationResult, RequestPolicy, ResultSource,
};
use futures::future::{self, BoxFuture, FutureExt, WeakShared};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type WeakRead = WeakShared<BoxFuture<'static, OperationResult>>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries older than this are treated as missing. `None` keeps entries
    /// until they are invalidated.
    pub ttl: Option<Duration>,

    /// Add every `__typename` in result data to the entry's entity set.
    pub infer_typenames: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            infer_typenames: true,
        }
    }
}

impl CacheConfig {
    /// Expire entries `ttl` after they were stored.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Only use declared `additional_typenames` for invalidation.
    pub fn without_typename_inference(mut self) -> Self {
        self.infer_typenames = false;
        self
    }
}

struct CacheEntry {
    result: OperationResult,
    typenames: BTreeSet<String>,
    stored_at: Instant,
}

struct InFlight {
    read: WeakRead,
    id: u64,
}

/// Typenames hit by one invalidation; `None` is a full clear.
type Invalidation = Option<BTreeSet<String>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<OperationKey, CacheEntry>,
    /// Joinable reads by key
    in_flight: HashMap<OperationKey, InFlight>,
    /// Start epoch of every read not yet finished or dropped, by read id
    pending: HashMap<u64, u64>,
    epoch: u64,
    next_read: u64,
    /// Invalidations newer than the oldest pending read
    log: Vec<(u64, Invalidation)>,
}

impl CacheState {
    /// Log an invalidation for pending reads and stop new reads joining them.
    fn record(&mut self, invalidation: Invalidation) {
        self.in_flight.clear();
        if self.pending.is_empty() {
            return;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        self.log.push((epoch, invalidation));
    }

    /// Whether an invalidation since `started` touched `typenames`.
    fn invalidated_since(&self, started: u64, typenames: &BTreeSet<String>) -> bool {
        self.log
            .iter()
            .filter(|(epoch, _)| *epoch > started)
            .any(|(_, affected)| match affected {
                None => true,
                Some(affected) => !affected.is_disjoint(typenames),
            })
    }

    fn finish(&mut self, id: u64) {
        self.pending.remove(&id);
        match self.pending.values().min() {
            Some(&oldest) => self.log.retain(|(epoch, _)| *epoch > oldest),
            None => self.log.clear(),
        }
    }
}

/// Lives inside a shared read; finishing or dropping it retires the read.
struct PendingRead {
    inner: Arc<CacheInner>,
    id: u64,
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.finish(self.id);
        }
    }
}

struct CacheInner {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl CacheInner {
    fn lock(&self) -> Option<MutexGuard<'_, CacheState>> {
        match self.state.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!("Cache store unavailable, passing operation through");
                None
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config
            .ttl
            .map(|ttl| entry.stored_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    fn lookup(&self, key: OperationKey) -> Option<OperationResult> {
        let state = self.lock()?;
        let entry = state.entries.get(&key)?;
        if self.is_expired(entry) {
            debug!(%key, "Cached result expired");
            return None;
        }
        Some(
            entry
                .result
                .clone()
                .with_source(ResultSource::Cache)
                .with_stale(false),
        )
    }

    fn entity_set(&self, operation: &Operation, data: Option<&Value>) -> BTreeSet<String> {
        let mut typenames = operation.context().additional_typenames.clone();
        if self.config.infer_typenames {
            if let Some(data) = data {
                collect_typenames(data, &mut typenames);
            }
        }
        typenames
    }

    /// Called from inside the shared read once the downstream answered.
    fn complete(&self, operation: &Operation, id: u64, started: u64, result: &OperationResult) {
        let Some(mut state) = self.lock() else {
            return;
        };
        let key = operation.key();
        if state.in_flight.get(&key).is_some_and(|read| read.id == id) {
            state.in_flight.remove(&key);
        }
        if !result.is_success() {
            debug!(%key, "Not caching unsuccessful result");
            return;
        }

        let typenames = self.entity_set(operation, result.data.as_ref());
        if state.invalidated_since(started, &typenames) {
            debug!(%key, typenames = ?typenames, "Read overtaken by invalidation, not caching");
            return;
        }
        debug!(
            key = %operation.key(),
            typenames = ?typenames,
            "Caching result"
        );
        state.entries.insert(
            operation.key(),
            CacheEntry {
                result: result.clone(),
                typenames,
                stored_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, affected: &BTreeSet<String>) -> usize {
        if affected.is_empty() {
            return 0;
        }
        let Some(mut state) = self.lock() else {
            return 0;
        };
        state.record(Some(affected.clone()));
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.typenames.is_disjoint(affected));
        let evicted = before - state.entries.len();
        if evicted > 0 {
            debug!(evicted, affected = ?affected, "Invalidated cached results");
        }
        evicted
    }
}

/// Walk result data and collect every `__typename` string.
fn collect_typenames(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("__typename", Value::String(name)) => {
                        out.insert(name.clone());
                    }
                    _ => collect_typenames(child, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_typenames(item, out);
            }
        }
        _ => {}
    }
}

#[derive(Clone)]
pub struct CacheExchange {
    inner: Arc<CacheInner>,
}

impl CacheExchange {
    /// Empty cache; share it by cloning.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Number of stored results, expired ones included.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a result is stored under `key`, fresh or not.
    pub fn contains(&self, key: OperationKey) -> bool {
        self.inner
            .lock()
            .map(|state| state.entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Drop every stored result.
    ///
    /// Reads already in flight still answer their callers but are not stored.
    pub fn clear(&self) {
        if let Some(mut state) = self.inner.lock() {
            state.record(None);
            state.entries.clear();
            debug!(pending = state.pending.len(), "Cache cleared");
        }
    }

    /// Forward a read, joining an identical one already in flight.
    fn fetch(&self, operation: Operation, next: Next) -> ResultStream {
        let key = operation.key();
        let Some(mut state) = self.inner.lock() else {
            return next.run(operation);
        };

        if let Some(existing) = state.in_flight.get(&key).and_then(|read| read.read.upgrade()) {
            debug!(%key, "Joining in-flight request");
            return stream::once(existing).boxed();
        }

        // Drop entries whose callers all went away
        state.in_flight.retain(|_, read| read.read.upgrade().is_some());

        state.next_read += 1;
        let id = state.next_read;
        let started = state.epoch;
        state.pending.insert(id, started);
        let inner = Arc::clone(&self.inner);
        let pending = PendingRead {
            inner: Arc::clone(&self.inner),
            id,
        };
        let shared = async move {
            let _pending = pending;
            let result = first_result(next.run(operation.clone()), &operation).await;
            inner.complete(&operation, id, started, &result);
            result
        }
        .boxed()
        .shared();

        if let Some(read) = shared.downgrade() {
            state.in_flight.insert(key, InFlight { read, id });
        }
        stream::once(shared).boxed()
    }

    fn read(&self, operation: Operation, next: Next) -> ResultStream {
        let key = operation.key();
        match operation.context().request_policy {
            RequestPolicy::NetworkOnly => self.fetch(operation, next),
            RequestPolicy::CacheOnly => match self.inner.lookup(key) {
                Some(cached) => once(cached),
                None => {
                    debug!(%key, "Cache-only read missed");
                    once(OperationResult::from_error(
                        &operation,
                        ExchangeError::CacheMiss,
                        ResultSource::Synthesized,
                    ))
                }
            },
            RequestPolicy::CacheFirst => match self.inner.lookup(key) {
                Some(cached) => {
                    debug!(%key, "Cache hit");
                    once(cached)
                }
                None => self.fetch(operation, next),
            },
            RequestPolicy::CacheAndNetwork => match self.inner.lookup(key) {
                Some(cached) => {
                    debug!(%key, "Cache hit, refetching in background");
                    stream::once(future::ready(cached.with_stale(true)))
                        .chain(self.fetch(operation, next))
                        .boxed()
                }
                None => self.fetch(operation, next),
            },
        }
    }

    fn write(&self, operation: Operation, next: Next) -> ResultStream {
        let inner = Arc::clone(&self.inner);
        let declared = operation.clone();
        next.run(operation)
            .inspect(move |result| {
                // Partial data still means the write reached the server
                if result.data.is_some() {
                    let affected = inner.entity_set(&declared, result.data.as_ref());
                    inner.invalidate(&affected);
                }
            })
            .boxed()
    }
}

impl Default for CacheExchange {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Exchange for CacheExchange {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn call(&self, operation: Operation, next: Next) -> ResultStream {
        match operation.kind() {
            OperationKind::Query => self.read(operation, next),
            OperationKind::Mutation => self.write(operation, next),
            OperationKind::Subscription => next.run(operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphQlError;
    use crate::exchange::testing::{pipeline_with, MockTransport};
    use crate::exchange::{compose, from_future, ExchangePipeline};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn setup(mock: MockTransport, config: CacheConfig) -> (CacheExchange, Arc<MockTransport>, ExchangePipeline) {
        let cache = CacheExchange::new(config);
        let mock = Arc::new(mock);
        let pipeline = pipeline_with(vec![Arc::new(cache.clone())], &mock);
        (cache, mock, pipeline)
    }

    async fn run(pipeline: &ExchangePipeline, op: &Operation) -> OperationResult {
        first_result(pipeline.execute(op.clone()), op).await
    }

    // ==================== Read Tests ====================

    #[tokio::test]
    async fn test_cache_first_serves_second_read_from_cache() {
        let (_, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());
        let op = Operation::query("{ a }", json!({}));

        let first = run(&pipeline, &op).await;
        let second = run(&pipeline, &op).await;

        assert_eq!(mock.calls(), 1);
        assert_eq!(first.source, ResultSource::Network);
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_network_only_always_forwards() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());
        let op = Operation::query("{ a }", json!({})).with_request_policy(RequestPolicy::NetworkOnly);

        run(&pipeline, &op).await;
        run(&pipeline, &op).await;

        assert_eq!(mock.calls(), 2);
        assert!(cache.contains(op.key()));
    }

    #[tokio::test]
    async fn test_cache_only_miss_never_forwards() {
        let (_, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());
        let op = Operation::query("{ a }", json!({})).with_request_policy(RequestPolicy::CacheOnly);

        let result = run(&pipeline, &op).await;

        assert_eq!(mock.calls(), 0);
        assert_eq!(result.error, Some(ExchangeError::CacheMiss));
    }

    #[tokio::test]
    async fn test_cache_and_network_emits_stale_then_fresh() {
        let (_, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());
        let op = Operation::query("{ a }", json!({}));
        run(&pipeline, &op).await;

        let op = op.with_request_policy(RequestPolicy::CacheAndNetwork);
        let results: Vec<OperationResult> = pipeline.execute(op).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].stale);
        assert_eq!(results[0].source, ResultSource::Cache);
        assert!(!results[1].stale);
        assert_eq!(results[1].source, ResultSource::Network);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (_, mock, pipeline) = setup(
            MockTransport::with_data(json!({ "a": 1 })),
            CacheConfig::default().with_ttl(Duration::from_millis(20)),
        );
        let op = Operation::query("{ a }", json!({}));

        run(&pipeline, &op).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = run(&pipeline, &op).await;

        assert_eq!(mock.calls(), 2);
        assert_eq!(result.source, ResultSource::Network);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());
        let op = Operation::query("{ a }", json!({}));
        mock.push(
            &op,
            OperationResult::from_error(&op, ExchangeError::network("refused"), ResultSource::Network),
        );

        let failed = run(&pipeline, &op).await;
        assert!(failed.error.as_ref().unwrap().is_network());
        assert!(cache.is_empty());

        let recovered = run(&pipeline, &op).await;
        assert!(recovered.is_success());
        assert_eq!(mock.calls(), 2);
    }

    // ==================== Coalescing Tests ====================

    #[tokio::test]
    async fn test_concurrent_identical_reads_share_one_call() {
        let (_, mock, pipeline) = setup(
            MockTransport::with_data(json!({ "anime": { "id": "1" } }))
                .with_delay(Duration::from_millis(50)),
            CacheConfig::default(),
        );
        let op = Operation::query("query Anime { anime { id } }", json!({}));

        let (a, b) = tokio::join!(run(&pipeline, &op), run(&pipeline, &op));

        assert_eq!(mock.calls(), 1);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_distinct_reads_are_not_coalesced() {
        let (_, mock, pipeline) = setup(
            MockTransport::with_data(json!({ "a": 1 })).with_delay(Duration::from_millis(20)),
            CacheConfig::default(),
        );
        let one = Operation::query("{ a }", json!({ "id": 1 }));
        let two = Operation::query("{ a }", json!({ "id": 2 }));

        tokio::join!(run(&pipeline, &one), run(&pipeline, &two));

        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_read_is_not_cached() {
        let (cache, mock, pipeline) = setup(
            MockTransport::with_data(json!({ "a": 1 })).with_delay(Duration::from_millis(200)),
            CacheConfig::default(),
        );
        let op = Operation::query("{ a }", json!({}));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), run(&pipeline, &op)).await;
        assert!(abandoned.is_err());
        assert!(cache.is_empty());

        // The dropped request is not joined; a fresh call is made
        let result = run(&pipeline, &op).await;
        assert!(result.is_success());
        assert_eq!(mock.calls(), 2);
        assert!(cache.contains(op.key()));
    }

    // ==================== Invalidation Tests ====================

    #[tokio::test]
    async fn test_mutation_invalidates_intersecting_reads_only() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "ok": true })), CacheConfig::default());
        let anime = Operation::query("{ anime }", json!({})).with_typenames(["Anime"]);
        let user = Operation::query("{ user }", json!({})).with_typenames(["User"]);
        run(&pipeline, &anime).await;
        run(&pipeline, &user).await;
        assert_eq!(cache.len(), 2);

        let rate = Operation::mutation("mutation { rate }", json!({})).with_typenames(["Anime"]);
        run(&pipeline, &rate).await;

        assert!(!cache.contains(anime.key()));
        assert!(cache.contains(user.key()));

        run(&pipeline, &user).await;
        run(&pipeline, &anime).await;
        // rate + refetched anime; user served from cache
        assert_eq!(mock.calls(), 4);
    }

    #[tokio::test]
    async fn test_typenames_inferred_from_result_data() {
        let mock = MockTransport::new(|op| {
            let data = if op.document().contains("mutation") {
                json!({ "libraryEntry": { "__typename": "LibraryEntry", "id": "9" } })
            } else {
                json!({ "viewer": { "__typename": "Profile", "library": [
                    { "__typename": "LibraryEntry", "id": "9" }
                ] } })
            };
            OperationResult::from_data(op, data, ResultSource::Network)
        });
        let (cache, _, pipeline) = setup(mock, CacheConfig::default());
        let library = Operation::query("{ viewer { library { id } } }", json!({}));
        run(&pipeline, &library).await;
        assert!(cache.contains(library.key()));

        let update = Operation::mutation("mutation { libraryEntry { id } }", json!({}));
        run(&pipeline, &update).await;

        assert!(!cache.contains(library.key()));
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "ok": true })), CacheConfig::default());
        let anime = Operation::query("{ anime }", json!({})).with_typenames(["Anime"]);
        run(&pipeline, &anime).await;

        let rate = Operation::mutation("mutation { rate }", json!({})).with_typenames(["Anime"]);
        mock.push(
            &rate,
            OperationResult::from_error(&rate, ExchangeError::network("down"), ResultSource::Network),
        );
        run(&pipeline, &rate).await;

        assert!(cache.contains(anime.key()));
    }

    #[tokio::test]
    async fn test_partial_mutation_still_invalidates() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "ok": true })), CacheConfig::default());
        let anime = Operation::query("{ anime }", json!({})).with_typenames(["Anime"]);
        run(&pipeline, &anime).await;

        let rate = Operation::mutation("mutation { rate { id } reward }", json!({}));
        let mut partial = OperationResult::from_data(
            &rate,
            json!({ "rate": { "__typename": "Anime", "id": "1" }, "reward": null }),
            ResultSource::Network,
        );
        partial.error = Some(ExchangeError::GraphQl {
            errors: vec![GraphQlError::new("reward service unavailable")],
        });
        mock.push(&rate, partial);
        let result = run(&pipeline, &rate).await;

        assert!(!result.is_success());
        assert!(!cache.contains(anime.key()));
    }

    /// Answers reads slowly with the rating seen when the read arrived;
    /// mutations bump the rating immediately.
    struct SlowReads {
        rating: Arc<AtomicU64>,
        mutated_typename: &'static str,
    }

    impl Exchange for SlowReads {
        fn name(&self) -> &'static str {
            "slow-reads"
        }

        fn call(&self, operation: Operation, _next: Next) -> ResultStream {
            let rating = Arc::clone(&self.rating);
            let typename = self.mutated_typename;
            from_future(async move {
                match operation.kind() {
                    OperationKind::Mutation => {
                        let rating = rating.fetch_add(1, Ordering::SeqCst) + 1;
                        let data = json!({ "rate": { "__typename": typename, "rating": rating } });
                        OperationResult::from_data(&operation, data, ResultSource::Network)
                    }
                    _ => {
                        let rating = rating.load(Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        let data = json!({ "anime": { "__typename": "Anime", "rating": rating } });
                        OperationResult::from_data(&operation, data, ResultSource::Network)
                    }
                }
            })
        }
    }

    fn slow_pipeline(mutated_typename: &'static str) -> (CacheExchange, ExchangePipeline) {
        let cache = CacheExchange::default();
        let pipeline = compose(vec![
            Arc::new(cache.clone()),
            Arc::new(SlowReads {
                rating: Arc::new(AtomicU64::new(0)),
                mutated_typename,
            }),
        ]);
        (cache, pipeline)
    }

    #[tokio::test]
    async fn test_read_overtaken_by_mutation_is_not_cached() {
        let (cache, pipeline) = slow_pipeline("Anime");
        let read = Operation::query("{ anime { rating } }", json!({}));
        let rate = Operation::mutation("mutation { rate { rating } }", json!({}));

        let (stale, rated) = tokio::join!(run(&pipeline, &read), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            run(&pipeline, &rate).await
        });
        assert_eq!(rated.data, Some(json!({ "rate": { "__typename": "Anime", "rating": 1 } })));
        assert_eq!(stale.data, Some(json!({ "anime": { "__typename": "Anime", "rating": 0 } })));
        assert!(!cache.contains(read.key()));

        let fresh = run(&pipeline, &read).await;
        assert_eq!(fresh.source, ResultSource::Network);
        assert_eq!(fresh.data, Some(json!({ "anime": { "__typename": "Anime", "rating": 1 } })));
        assert!(cache.contains(read.key()));
    }

    #[tokio::test]
    async fn test_unrelated_mutation_lets_in_flight_read_cache() {
        let (cache, pipeline) = slow_pipeline("User");
        let read = Operation::query("{ anime { rating } }", json!({}));
        let follow = Operation::mutation("mutation { follow }", json!({}));

        tokio::join!(run(&pipeline, &read), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            run(&pipeline, &follow).await
        });

        assert!(cache.contains(read.key()));
        let cached = run(&pipeline, &read).await;
        assert_eq!(cached.source, ResultSource::Cache);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_read() {
        let (cache, mock, pipeline) = setup(
            MockTransport::with_data(json!({ "a": 1 })).with_delay(Duration::from_millis(30)),
            CacheConfig::default(),
        );
        let op = Operation::query("{ a }", json!({}));

        let (before, after) = tokio::join!(run(&pipeline, &op), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cache.clear();
            // Not joined onto the read that started before the clear
            run(&pipeline, &op).await
        });

        assert!(before.is_success());
        assert!(after.is_success());
        assert_eq!(mock.calls(), 2);
        assert!(cache.contains(op.key()));
    }

    #[test]
    fn test_collect_typenames_walks_nested_data() {
        let mut names = BTreeSet::new();
        collect_typenames(
            &json!({
                "__typename": "Query",
                "a": [{ "__typename": "Anime", "b": { "__typename": "Genre" } }],
                "c": "__typename"
            }),
            &mut names,
        );
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["Anime", "Genre", "Query"]
        );
    }

    // ==================== Pass-through Tests ====================

    #[tokio::test]
    async fn test_subscriptions_pass_through() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "tick": 1 })), CacheConfig::default());
        let op = Operation::subscription("subscription { tick }", json!({}));

        run(&pipeline, &op).await;
        run(&pipeline, &op).await;

        assert_eq!(mock.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_network() {
        let (cache, mock, pipeline) =
            setup(MockTransport::with_data(json!({ "a": 1 })), CacheConfig::default());

        // Poison the store lock
        let inner = Arc::clone(&cache.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.state.lock().unwrap();
            panic!("poison cache store");
        })
        .join();

        let op = Operation::query("{ a }", json!({}));
        let first = run(&pipeline, &op).await;
        let second = run(&pipeline, &op).await;

        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(mock.calls(), 2);
    }
}
