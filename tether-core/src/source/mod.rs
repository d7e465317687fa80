//! Subscription Sources
//!
//! A source is the external store a binding subscribes to. The bridge only
//! needs one capability from it:
//!
//! ```text
//! subscribe(query, { on_data, is_equal? }) -> Unsubscribe
//! ```
//!
//! # Contract
//!
//! - `query` runs against a consistent snapshot chosen by the source.
//! - `on_data` is called with the query result whenever the source decides the
//!   result may have changed. It may be called zero or more times, from inside
//!   `subscribe` or later.
//! - `is_equal`, when given, is applied by the source: a result equal to the
//!   previously delivered one is not delivered. Sources that cannot do this
//!   report it through [`SubscriptionSource::supports_equality`], and the
//!   binding applies the predicate itself.
//! - Releasing the [`Unsubscribe`] handle stops all further `on_data` calls.
//!   It is safe to release from inside `on_data`.
//!
//! A query that fails is the source's problem: it is not reported through
//! `on_data`, so the snapshot keeps its last delivered value.

mod memory;
mod transaction;

pub use memory::MemoryStore;
pub use transaction::{ReadTransaction, WriteTransaction};

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::QueryError;

/// A query: a function of a read transaction to a future result.
pub type Query<Tx, R> = Arc<dyn Fn(Tx) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync>;

/// Callback receiving query results.
pub type OnData<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Equality predicate used to suppress redundant deliveries.
pub type IsEqual<R> = Arc<dyn Fn(&R, &R) -> bool + Send + Sync>;

/// Wrap an async function as a [`Query`].
///
/// ```rust,ignore
/// let q = query(|tx: ReadTransaction| async move { Ok(tx.get("a")) });
/// ```
pub fn query<Tx, R, F, Fut>(f: F) -> Query<Tx, R>
where
    F: Fn(Tx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
{
    Arc::new(move |tx| f(tx).boxed())
}

/// Options handed to [`SubscriptionSource::subscribe`].
pub struct SourceOptions<R> {
    pub on_data: OnData<R>,
    pub is_equal: Option<IsEqual<R>>,
}

impl<R> Clone for SourceOptions<R> {
    fn clone(&self) -> Self {
        Self {
            on_data: Arc::clone(&self.on_data),
            is_equal: self.is_equal.clone(),
        }
    }
}

/// Owned handle releasing one subscription.
///
/// Releasing happens at most once: either through [`Unsubscribe::call`] or
/// when the handle is dropped.
#[must_use = "dropping the handle releases the subscription immediately"]
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    /// Wrap `release` so it runs at most once.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Release the subscription.
    pub fn call(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// An external store that can be subscribed to.
pub trait SubscriptionSource: Send + Sync + 'static {
    /// The read transaction queries run against.
    type Tx: Send + 'static;

    /// Start watching `query`, delivering results to `options.on_data`.
    fn subscribe<R>(&self, query: Query<Self::Tx, R>, options: SourceOptions<R>) -> Unsubscribe
    where
        R: Clone + Send + Sync + 'static;

    /// Whether this source applies `options.is_equal` itself.
    fn supports_equality(&self) -> bool {
        true
    }
}
