//! In-Memory Store
//!
//! A small transactional key-value store implementing
//! [`SubscriptionSource`]. Values are JSON; every commit produces a new
//! immutable snapshot.
//!
//! # How Change Detection Works
//!
//! 1. Each subscription evaluates its query once after subscribing. The read
//!    transaction records which keys and prefixes the query touched.
//!
//! 2. A mutation buffers its writes and commits them atomically. Only keys
//!    whose value actually changed are reported.
//!
//! 3. Every subscription whose last read set touches a changed key is
//!    re-evaluated, in subscription order, before `mutate` returns. All
//!    deliveries caused by one commit therefore land in the same tick.
//!
//! 4. Evaluations of one subscription never overlap. A commit that lands
//!    while an evaluation is suspended cannot be checked against a read set
//!    that is still being built, so it marks the subscription for a rerun
//!    instead; the running evaluation repeats against the newer snapshot
//!    before it finishes.
//!
//! 5. A result equal (under `is_equal`) to the last delivered one is dropped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::transaction::{ReadSet, ReadTransaction, Snapshot, WriteTransaction};
use super::{Query, SourceOptions, SubscriptionSource, Unsubscribe};
use crate::error::StoreError;
use crate::reactive::SubscriptionId;

type Data = Arc<RwLock<Snapshot>>;
type Watches = Arc<Mutex<IndexMap<SubscriptionId, Arc<dyn Watch>>>>;

/// A live subscription, erased over its result type.
trait Watch: Send + Sync {
    fn is_affected(&self, changed: &BTreeSet<String>) -> bool;

    /// Run the query against the latest snapshot and deliver the result.
    fn evaluate(self: Arc<Self>, data: Data) -> BoxFuture<'static, ()>;

    fn close(&self);
}

struct QueryWatch<R> {
    id: SubscriptionId,
    query: Query<ReadTransaction, R>,
    options: SourceOptions<R>,
    last: Mutex<Option<R>>,
    reads: Mutex<ReadSet>,
    run: Mutex<RunState>,
    active: AtomicBool,
}

#[derive(Default)]
struct RunState {
    /// An evaluation is in progress.
    running: bool,

    /// A commit landed while running; evaluate again before stopping.
    rerun: bool,
}

/// Clears the run state if an evaluation future is dropped before it ends.
struct RunGuard<'a>(Option<&'a Mutex<RunState>>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(run) = self.0.take() {
            *run.lock() = RunState::default();
        }
    }
}

impl<R> QueryWatch<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Run the query once against the latest snapshot and deliver the result.
    async fn evaluate_once(&self, data: &Data) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let snapshot = Arc::clone(&*data.read());
        let tx = ReadTransaction::new(snapshot);
        let result = (self.query)(tx.clone()).await;
        *self.reads.lock() = tx.read_set();

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                warn!(subscription = %self.id, %error, "query rejected; keeping last delivered value");
                return;
            }
        };

        // Released while the query was running.
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut last = self.last.lock();
            if let (Some(previous), Some(is_equal)) = (last.as_ref(), self.options.is_equal.as_ref()) {
                if is_equal(previous, &value) {
                    trace!(subscription = %self.id, "result unchanged; not delivered");
                    return;
                }
            }
            *last = Some(value.clone());
        }

        (self.options.on_data)(value);
    }
}

impl<R> Watch for QueryWatch<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn is_affected(&self, changed: &BTreeSet<String>) -> bool {
        if self.run.lock().running {
            return true;
        }
        let reads = self.reads.lock();
        !reads.is_empty() && reads.touches(changed)
    }

    fn evaluate(self: Arc<Self>, data: Data) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut run = self.run.lock();
                if run.running {
                    run.rerun = true;
                    trace!(subscription = %self.id, "evaluation in progress; rerun requested");
                    return;
                }
                run.running = true;
            }

            let mut guard = RunGuard(Some(&self.run));
            loop {
                self.evaluate_once(&data).await;

                let mut run = self.run.lock();
                if run.rerun && self.active.load(Ordering::SeqCst) {
                    run.rerun = false;
                    continue;
                }
                // Cleared under the lock so a concurrent commit either sees
                // this run as finished or has its rerun picked up above.
                *run = RunState::default();
                guard.0 = None;
                break;
            }
        }
        .boxed()
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Transactional in-memory JSON store.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MemoryStore::new());
/// store.mutate(|tx| tx.put("a", "a1")).await?;
/// assert_eq!(store.get("a"), Some(json!("a1")));
/// ```
pub struct MemoryStore {
    data: Data,
    watches: Watches,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Arc::default())),
            watches: Arc::new(Mutex::new(IndexMap::new())),
            commits: AtomicU64::new(0),
        }
    }

    /// Read a value outside of any subscription.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Apply `mutator` atomically, then re-run every affected subscription.
    ///
    /// If the mutator fails nothing is committed and no subscription runs.
    pub async fn mutate<T, F>(&self, mutator: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut WriteTransaction) -> Result<T, StoreError>,
    {
        let (output, changed) = {
            let mut data = self.data.write();
            let mut tx = WriteTransaction::new(Arc::clone(&*data));
            let output = mutator(&mut tx)?;
            let (next, changed) = tx.commit();
            *data = next;
            (output, changed)
        };

        if changed.is_empty() {
            return Ok(output);
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(changed = changed.len(), "committed mutation");

        let affected: Vec<Arc<dyn Watch>> = self
            .watches
            .lock()
            .values()
            .filter(|watch| watch.is_affected(&changed))
            .cloned()
            .collect();

        for watch in affected {
            watch.evaluate(Arc::clone(&self.data)).await;
        }

        Ok(output)
    }

    /// Number of commits that changed at least one key.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.watches.lock().len()
    }

    fn spawn(&self, evaluation: BoxFuture<'static, ()>) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(evaluation);
            }
            Err(_) => {
                if evaluation.now_or_never().is_none() {
                    warn!("query suspended without a runtime to drive it; initial evaluation dropped");
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.data.read().len())
            .field("subscriptions", &self.subscription_count())
            .field("commits", &self.commit_count())
            .finish()
    }
}

impl SubscriptionSource for MemoryStore {
    type Tx = ReadTransaction;

    fn subscribe<R>(&self, query: Query<ReadTransaction, R>, options: SourceOptions<R>) -> Unsubscribe
    where
        R: Clone + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let watch = Arc::new(QueryWatch {
            id,
            query,
            options,
            last: Mutex::new(None),
            reads: Mutex::new(ReadSet::default()),
            run: Mutex::new(RunState::default()),
            active: AtomicBool::new(true),
        });

        self.watches.lock().insert(id, watch.clone());
        debug!(subscription = %id, "subscribed");

        self.spawn(watch.clone().evaluate(Arc::clone(&self.data)));

        let watches = Arc::downgrade(&self.watches);
        Unsubscribe::new(move || {
            watch.close();
            if let Some(watches) = watches.upgrade() {
                watches.lock().shift_remove(&id);
            }
            debug!(subscription = %id, "unsubscribed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::source::query;
    use serde_json::json;

    fn collector() -> (Arc<Mutex<Vec<Value>>>, SourceOptions<Value>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = SourceOptions {
            on_data: Arc::new(move |value: Value| sink.lock().push(value)),
            is_equal: None,
        };
        (seen, options)
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    fn read_key(key: &'static str) -> Query<ReadTransaction, Value> {
        query(move |tx: ReadTransaction| async move { Ok(tx.get(key).unwrap_or(Value::Null)) })
    }

    #[test]
    fn evaluates_inline_without_runtime() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let _sub = store.subscribe(read_key("a"), options);
        assert_eq!(*seen.lock(), vec![Value::Null]);
    }

    #[tokio::test]
    async fn initial_evaluation_is_asynchronous() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let _sub = store.subscribe(read_key("a"), options);
        assert!(seen.lock().is_empty());

        settle().await;
        assert_eq!(*seen.lock(), vec![Value::Null]);
    }

    #[tokio::test]
    async fn mutation_notifies_only_affected_queries() {
        let store = MemoryStore::new();
        let (seen_a, options_a) = collector();
        let (seen_b, options_b) = collector();
        let _a = store.subscribe(read_key("a"), options_a);
        let _b = store.subscribe(read_key("b"), options_b);
        settle().await;

        store.mutate(|tx| tx.put("b", "b1")).await.unwrap();

        assert_eq!(*seen_a.lock(), vec![Value::Null]);
        assert_eq!(*seen_b.lock(), vec![Value::Null, json!("b1")]);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn no_op_mutation_commits_nothing() {
        let store = MemoryStore::new();
        store.mutate(|tx| tx.put("a", 1)).await.unwrap();
        store.mutate(|tx| tx.put("a", 1)).await.unwrap();
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn failed_mutator_commits_nothing() {
        let store = MemoryStore::new();
        let result: Result<(), _> = store
            .mutate(|tx| {
                tx.put("a", 1)?;
                Err(StoreError::Aborted("changed my mind".into()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Aborted(_))));
        assert_eq!(store.get("a"), None);
    }

    #[tokio::test]
    async fn equal_results_are_suppressed() {
        let store = MemoryStore::new();
        let (seen, mut options) = collector();
        options.is_equal = Some(Arc::new(|a: &Value, b: &Value| a == b));
        let _sub = store.subscribe(
            query(|tx: ReadTransaction| async move { Ok(json!(tx.get("n").is_some())) }),
            options,
        );
        settle().await;

        store.mutate(|tx| tx.put("n", 1)).await.unwrap();
        store.mutate(|tx| tx.put("n", 2)).await.unwrap();

        assert_eq!(*seen.lock(), vec![json!(false), json!(true)]);
    }

    #[tokio::test]
    async fn rejected_query_delivers_nothing() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let _sub = store.subscribe(
            query(|tx: ReadTransaction| async move {
                let n: Option<u32> = tx.get_as("n")?;
                Ok::<_, QueryError>(json!(n))
            }),
            options,
        );
        settle().await;

        store.mutate(|tx| tx.put("n", "oops")).await.unwrap();
        store.mutate(|tx| tx.put("n", 5)).await.unwrap();

        // The failed evaluation still refreshed the read set.
        assert_eq!(*seen.lock(), vec![Value::Null, json!(5)]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let sub = store.subscribe(read_key("a"), options);
        settle().await;
        assert_eq!(store.subscription_count(), 1);

        sub.call();
        assert_eq!(store.subscription_count(), 0);

        store.mutate(|tx| tx.put("a", "a1")).await.unwrap();
        assert_eq!(*seen.lock(), vec![Value::Null]);
    }

    #[test]
    fn unsubscribe_inside_on_data_is_safe() {
        let store = MemoryStore::new();
        let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let slot = handle.clone();
        let counter = calls.clone();
        let options = SourceOptions {
            on_data: Arc::new(move |_: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().take() {
                    sub.call();
                }
            }),
            is_equal: None,
        };

        // Evaluated inline (no runtime), so the handle is stored afterwards
        // and released on the next delivery.
        let sub = store.subscribe(read_key("a"), options);
        *handle.lock() = Some(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        futures_util::FutureExt::now_or_never(store.mutate(|tx| tx.put("a", 1)))
            .unwrap()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.subscription_count(), 0);

        futures_util::FutureExt::now_or_never(store.mutate(|tx| tx.put("a", 2)))
            .unwrap()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn read_key_slowly(key: &'static str) -> Query<ReadTransaction, Value> {
        query(move |tx: ReadTransaction| async move {
            let value = tx.get(key).unwrap_or(Value::Null);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok::<_, QueryError>(value)
        })
    }

    #[tokio::test]
    async fn commit_during_evaluation_reruns_the_query() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let _sub = store.subscribe(read_key_slowly("a"), options);

        // The initial evaluation has read `a` and is now suspended.
        settle().await;
        assert!(seen.lock().is_empty());

        store.mutate(|tx| tx.put("a", "a1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(*seen.lock(), vec![Value::Null, json!("a1")]);
    }

    #[tokio::test]
    async fn overlapping_commits_deliver_in_commit_order() {
        let store = MemoryStore::new();
        let (seen, options) = collector();
        let _sub = store.subscribe(read_key_slowly("a"), options);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(*seen.lock(), vec![Value::Null]);

        // The first commit's evaluation is still suspended when the second
        // commit lands.
        let store = Arc::new(store);
        let first = {
            let store = store.clone();
            tokio::spawn(async move { store.mutate(|tx| tx.put("a", "a1")).await })
        };
        settle().await;
        store.mutate(|tx| tx.put("a", "a2")).await.unwrap();
        first.await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(*seen.lock(), vec![Value::Null, json!("a1"), json!("a2")]);
    }

    #[test]
    fn query_error_type_is_reported() {
        let err = QueryError::Failed("boom".into());
        assert_eq!(err.to_string(), "query failed: boom");
    }
}
