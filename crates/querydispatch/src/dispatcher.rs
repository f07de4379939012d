use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use querydispatch_cache::{BoundedQueue, CacheKey, CallOnDrop, KeySerialization};

use crate::config::Config;
use crate::error::DispatchError;
use crate::transport::{ApiVersion, Transport};

/// The resolved value of a query, shared between all coalesced callers.
pub type QueryResult = Result<Arc<Value>, DispatchError>;

/// A clonable handle on an in-flight query.
type SharedQuery = Shared<BoxFuture<'static, QueryResult>>;

/// Deduplicating, concurrency-limited dispatch of query endpoint calls.
///
/// Each dispatcher owns its own caches, so independent dispatchers never
/// contaminate each other. For a given `(endpoint, payload)` pair:
///
/// - a previously successful response is served from memory without any
///   network traffic (responses are kept for the lifetime of the
///   dispatcher; if the backend's data changes mid-session, cached
///   responses go stale),
/// - concurrent identical requests share one network call and all observe
///   the same value or error,
/// - fresh requests are admitted through a bounded FIFO queue so no more
///   than the configured number of queries hits the backend at once.
///
/// Errors are never cached, and this layer never retries.
#[derive(Clone)]
pub struct QueryDispatcher {
    transport: Arc<dyn Transport>,
    queue: BoundedQueue,
    state: Arc<Mutex<DispatchState>>,
    api_version: ApiVersion,
    key_serialization: KeySerialization,
}

#[derive(Default)]
struct DispatchState {
    /// Successful responses, kept until the dispatcher is dropped.
    results: FxHashMap<CacheKey, Arc<Value>>,
    /// In-flight queries, removed as soon as the underlying call settles.
    pending: FxHashMap<CacheKey, SharedQuery>,
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (results, pending) = self
            .state
            .try_lock()
            .map(|state| (state.results.len(), state.pending.len()))
            .unwrap_or_default();
        f.debug_struct("QueryDispatcher")
            .field("cached results", &results)
            .field("in-flight queries", &pending)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl QueryDispatcher {
    /// Creates a dispatcher with the given configuration and transport.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        QueryDispatcher {
            transport,
            queue: BoundedQueue::new(config.max_concurrent_queries),
            state: Default::default(),
            api_version: config.api_version,
            key_serialization: config.key_serialization,
        }
    }

    /// Runs a query against `endpoint`, deduplicated and cached by payload.
    ///
    /// With `use_cache`, a previously stored response for the same key is
    /// returned without a network call, and a fresh successful response is
    /// stored. `use_cache` is strictly call-local: passing `false` bypasses
    /// the cache read and skips the cache write for this call only.
    ///
    /// The returned future can be dropped at any time. The underlying
    /// network call keeps running, serves all remaining callers for the
    /// same key, and still populates the cache.
    pub fn run<P>(&self, endpoint: &str, payload: &P, use_cache: bool) -> BoxFuture<'static, QueryResult>
    where
        P: Serialize + ?Sized,
    {
        let key = CacheKey::build(endpoint, payload, self.key_serialization);
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(%key, %error, "failed to serialize query payload");
                return async { Err(DispatchError::InternalError) }.boxed();
            }
        };

        // The cache lookup, the pending lookup, and the registration of a
        // new in-flight query form one critical section. A second identical
        // request can never slip in between the miss and the registration.
        let mut state = self.state.lock().unwrap();

        if use_cache && let Some(hit) = state.results.get(&key) {
            tracing::trace!(%key, "serving query from cache");
            let value = Arc::clone(hit);
            return async move { Ok(value) }.boxed();
        }

        if let Some(pending) = state.pending.get(&key) {
            tracing::trace!(%key, "coalescing onto in-flight query");
            return pending.clone().boxed();
        }

        tracing::debug!(%key, "dispatching query");
        let task = self.dispatch(key.clone(), endpoint.to_owned(), body, use_cache);
        state.pending.insert(key, task.clone());
        task.boxed()
    }

    /// Submits the network call to the bounded queue and spawns it.
    ///
    /// The spawned task owns the whole round trip: queue admission, the
    /// transport call, the cache write, and the removal of the pending
    /// entry. Spawning detaches it from the callers, so dropping every
    /// caller does not abort the call.
    fn dispatch(
        &self,
        key: CacheKey,
        endpoint: String,
        body: Value,
        use_cache: bool,
    ) -> SharedQuery {
        let transport = Arc::clone(&self.transport);
        let api_version = self.api_version;
        let call = self.queue.submit(move || async move {
            transport.post(api_version, &endpoint, &body).await
        });

        let state = Arc::clone(&self.state);
        let task = async move {
            // Removed on settlement no matter how the call went, so a later
            // identical request starts fresh instead of awaiting a corpse.
            let _cleanup = CallOnDrop::new({
                let state = Arc::clone(&state);
                let key = key.clone();
                move || {
                    state.lock().unwrap().pending.remove(&key);
                }
            });

            let result = call.await.map(Arc::new);
            match &result {
                Ok(response) if use_cache => {
                    state
                        .lock()
                        .unwrap()
                        .results
                        .insert(key.clone(), Arc::clone(response));
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%key, %error, "query failed");
                }
            }
            result
        };

        let handle = tokio::spawn(task);
        async move {
            match handle.await {
                Ok(result) => result,
                // Joining only fails when the task panicked or the runtime
                // is shutting down.
                Err(_) => Err(DispatchError::InternalError),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of successful responses currently cached.
    pub fn cached_results(&self) -> usize {
        self.state.lock().unwrap().results.len()
    }

    /// Number of queries currently in flight or awaiting admission.
    pub fn pending_queries(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}
