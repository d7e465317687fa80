//! Read and write transactions over a [`MemoryStore`](super::MemoryStore)
//! snapshot.
//!
//! A read transaction records every key and prefix it touches. The store uses
//! that read set to decide which subscriptions a commit can affect, the same
//! way a tracking context records which signals a computation read.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{QueryError, StoreError};

pub(crate) type Snapshot = Arc<BTreeMap<String, Value>>;

/// Keys and prefixes read by one query evaluation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReadSet {
    keys: BTreeSet<String>,
    prefixes: Vec<String>,
}

impl ReadSet {
    /// Whether any of `changed` could alter the result of the reads.
    pub(crate) fn touches(&self, changed: &BTreeSet<String>) -> bool {
        changed.iter().any(|key| {
            self.keys.contains(key) || self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }
}

/// Read-only view of one committed snapshot.
///
/// Cheap to clone; clones share the read set.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    snapshot: Snapshot,
    reads: Arc<Mutex<ReadSet>>,
}

impl ReadTransaction {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            reads: Arc::new(Mutex::new(ReadSet::default())),
        }
    }

    pub(crate) fn read_set(&self) -> ReadSet {
        self.reads.lock().clone()
    }

    fn record(&self, key: &str) {
        self.reads.lock().keys.insert(key.to_owned());
    }

    /// Value stored at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.record(key);
        self.snapshot.get(key).cloned()
    }

    /// Value stored at `key`, decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, QueryError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| QueryError::Decode {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Whether `key` holds a value.
    pub fn has(&self, key: &str) -> bool {
        self.record(key);
        self.snapshot.contains_key(key)
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        self.reads.lock().prefixes.push(prefix.to_owned());
        self.snapshot
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whether the snapshot holds no keys.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

/// Buffered writes over a base snapshot, committed atomically.
#[derive(Debug)]
pub struct WriteTransaction {
    base: Snapshot,
    writes: BTreeMap<String, Option<Value>>,
}

impl WriteTransaction {
    pub(crate) fn new(base: Snapshot) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Current value at `key`, including this transaction's own writes.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.writes.get(key) {
            Some(pending) => pending.clone(),
            None => self.base.get(key).cloned(),
        }
    }

    /// Whether `key` holds a value, counting this transaction's writes.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Store `value` at `key`.
    pub fn put<V: Serialize>(&mut self, key: impl Into<String>, value: V) -> Result<(), StoreError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    /// Remove `key`. Returns whether it held a value.
    pub fn del(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        let existed = self.has(&key);
        self.writes.insert(key, None);
        existed
    }

    /// Apply the writes, returning the new snapshot and the keys whose value
    /// actually changed.
    pub(crate) fn commit(self) -> (Snapshot, BTreeSet<String>) {
        let mut changed = BTreeSet::new();
        let mut next = self.base;

        for (key, value) in self.writes {
            if next.get(&key) == value.as_ref() {
                continue;
            }
            let map = Arc::make_mut(&mut next);
            match value {
                Some(value) => {
                    map.insert(key.clone(), value);
                }
                None => {
                    map.remove(&key);
                }
            }
            changed.insert(key);
        }

        (next, changed)
    }
}
