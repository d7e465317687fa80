//! Error types.
//!
//! Each layer has its own error enum. Hook misuse and store failures never
//! cross into the scheduler: a query that rejects is logged by the store and
//! the snapshot keeps its last good value.

use thiserror::Error;

use crate::reactive::ComponentId;

/// Errors raised when a hook is used incorrectly.
#[derive(Debug, Error)]
pub enum HookError {
    /// A hook was called while no component was rendering on this thread.
    #[error("hooks can only be called while a component is rendering")]
    OutsideRender,

    /// The hook stored at a slot has a different type than the one now
    /// requesting it, usually because hooks were called conditionally.
    #[error("hook slot {index} of {component} changed type between renders")]
    SlotMismatch {
        component: ComponentId,
        index: usize,
    },

    /// The component being rendered is no longer mounted.
    #[error("{0} is not mounted")]
    Unmounted(ComponentId),
}

/// Errors a query can reject with.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("value at key `{key}` could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("query failed: {0}")]
    Failed(String),
}

/// Errors raised while mutating a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("value for key `{key}` could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The mutator gave up; nothing was committed.
    #[error("mutation aborted: {0}")]
    Aborted(String),
}

/// Errors raised while loading host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid host configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
