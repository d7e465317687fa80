//! Tether Core
//!
//! This crate binds subscription-based data stores to component renders. It
//! implements:
//!
//! - A batch scheduler that coalesces notifications into one flush per tick
//! - Subscription bindings with dependency-keyed resubscription
//! - Snapshot cells that fall back to a default while no data has arrived
//! - A minimal host runtime and an in-memory reference store
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: bindings, snapshot cells, the `use_subscribe` hook and the host
//! - `schedule`: tick primitives and the batch scheduler
//! - `source`: the subscription capability and the in-memory store
//! - `config`: host configuration
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::reactive::{use_subscribe, Host, SubscribeOptions};
//! use tether_core::source::{query, MemoryStore, ReadTransaction};
//!
//! let host = Host::global();
//! let store = Arc::new(MemoryStore::new());
//!
//! let reader = store.clone();
//! host.mount(None, move || {
//!     let a: Option<String> = use_subscribe(
//!         Some(&reader),
//!         query(|tx: ReadTransaction| async move { tx.get_as("a") }),
//!         SubscribeOptions::with_default(None),
//!     );
//!     println!("a = {a:?}");
//! });
//!
//! store.mutate(|tx| tx.put("a", "a1")).await?;
//! // One flush on the next tick, one render: prints `a = Some("a1")`.
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod schedule;
pub mod source;

pub use config::{HostConfig, TickMode};
pub use error::{ConfigError, HookError, QueryError, StoreError};
pub use reactive::{try_use_subscribe, use_subscribe, Host, SubscribeOptions};
pub use schedule::Scheduler;
pub use source::{MemoryStore, SubscriptionSource};
