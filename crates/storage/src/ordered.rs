//! Ordered append-only store
//!
//! `OrderedStore` is the primitive shared by replica logs and the
//! change-number index: an ordered key -> value map that only accepts
//! strictly increasing keys and is purged from its oldest end.
//!
//! # Locking
//!
//! Two locks are involved:
//!
//! - `lifecycle`: RwLock around the "closed" flag. Appends, reads and
//!   cursor steps take the read side so they run concurrently. Close,
//!   clear and purge take the write side, so they exclude every in-flight
//!   operation and no operation ever observes a half-closed store.
//! - `records`: RwLock around the BTreeMap and the journal, only taken
//!   while the lifecycle lock is held.
//!
//! Every operation goes through [`OrderedStore::shared`] or
//! [`OrderedStore::exclusive`], which acquire and release the locks on
//! every exit path. An operation finding the store closed fails with
//! `StoreUnavailable`.
//!
//! # Persistence
//!
//! A store opened with [`OrderedStore::open`] journals every mutation
//! (append, purge, removal) to its file before applying it in memory.
//! Opening replays the journal and compacts it to one entry per live
//! record plus the newest key ever accepted, so strict ordering survives a
//! restart even when every record was purged. [`OrderedStore::new`] keeps
//! everything in memory.
//!
//! # Performance
//!
//! - append: O(log n), plus one synced write when persistent
//! - oldest/newest/len: O(log n) / O(1)
//! - purge_before: O(log n) split
//! - cursor step: O(log n) range seek from the last delivered key

use changelog_core::{
    ChangelogCursor, CursorOptions, CursorState, Error, KeyMatchingStrategy, PositionStrategy,
    Result,
};
use changelog_durability::journal::{self, Journal};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Key or value of an [`OrderedStore`]
pub trait StoreItem: Clone + Serialize + DeserializeOwned {}

impl<T: Clone + Serialize + DeserializeOwned> StoreItem for T {}

/// Journaled mutation
#[derive(Serialize, Deserialize)]
enum StoreOp<K, V> {
    Append { key: K, value: V },
    /// Every record up to and including `key` is gone
    PurgeThrough { key: K },
    Remove { keys: Vec<K> },
    /// Newest key ever accepted; only written by compaction
    HighWater { key: K },
}

struct Records<K, V> {
    map: BTreeMap<K, V>,
    /// Newest key ever accepted, kept across purges
    high_water: Option<K>,
    journal: Option<Journal>,
}

impl<K: Ord + StoreItem, V: StoreItem> Records<K, V> {
    fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            high_water: None,
            journal: None,
        }
    }

    fn apply(&mut self, op: StoreOp<K, V>) {
        match op {
            StoreOp::Append { key, value } => {
                self.raise_high_water(&key);
                self.map.insert(key, value);
            }
            StoreOp::PurgeThrough { key } => {
                let mut kept = self.map.split_off(&key);
                kept.remove(&key);
                self.map = kept;
            }
            StoreOp::Remove { keys } => {
                for key in keys {
                    self.map.remove(&key);
                }
            }
            StoreOp::HighWater { key } => self.raise_high_water(&key),
        }
    }

    fn raise_high_water(&mut self, key: &K) {
        if self.high_water.as_ref().map_or(true, |newest| key > newest) {
            self.high_water = Some(key.clone());
        }
    }

    /// Write `op` ahead of applying it; no-op for an in-memory store
    fn log(&mut self, op: &StoreOp<&K, &V>) -> Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(op),
            None => Ok(()),
        }
    }

    /// Minimal operations rebuilding the current records
    fn snapshot(&self) -> Vec<StoreOp<&K, &V>> {
        let mut ops = Vec::with_capacity(self.map.len() + 1);
        if let Some(key) = &self.high_water {
            ops.push(StoreOp::HighWater { key });
        }
        ops.extend(self.map.iter().map(|(key, value)| StoreOp::Append { key, value }));
        ops
    }
}

/// Ordered append-only key -> value store
pub struct OrderedStore<K, V> {
    name: String,
    path: Option<PathBuf>,
    /// `true` once closed
    lifecycle: RwLock<bool>,
    records: RwLock<Records<K, V>>,
}

impl<K, V> OrderedStore<K, V>
where
    K: Ord + StoreItem,
    V: StoreItem,
{
    /// Create an empty, open store kept in memory
    ///
    /// `name` identifies the store in errors and logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            lifecycle: RwLock::new(false),
            records: RwLock::new(Records::new()),
        }
    }

    /// Open the store journaled at `path`, creating it if missing
    ///
    /// # Errors
    ///
    /// - `Corruption` if a complete journal frame fails validation
    /// - `Io` on filesystem errors
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut records = Records::new();
        for op in journal::replay::<StoreOp<K, V>>(&path)? {
            records.apply(op);
        }
        journal::rewrite(&path, &records.snapshot())?;
        records.journal = Some(Journal::open(&path)?);

        debug!(store = %name, records = records.map.len(), "Opened ordered store");
        Ok(Self {
            name,
            path: Some(path),
            lifecycle: RwLock::new(false),
            records: RwLock::new(records),
        })
    }

    /// Name of the store
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Journal file, `None` for an in-memory store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` under the shared side of the lifecycle lock
    fn shared<R>(&self, f: impl FnOnce(&RwLock<Records<K, V>>) -> R) -> Result<R> {
        let closed = self.lifecycle.read();
        if *closed {
            return Err(Error::store_unavailable(&self.name));
        }
        Ok(f(&self.records))
    }

    /// Run `f` under the exclusive side of the lifecycle lock
    fn exclusive<R>(&self, f: impl FnOnce(&mut Records<K, V>) -> R) -> Result<R> {
        let closed = self.lifecycle.write();
        if *closed {
            return Err(Error::store_unavailable(&self.name));
        }
        let mut records = self.records.write();
        Ok(f(&mut records))
    }

    /// Append a record
    ///
    /// Returns `Ok(false)` without storing anything if `key` is not strictly
    /// greater than the newest key ever accepted, purged or not: records
    /// are only ever stored in key order.
    pub fn append(&self, key: K, value: V) -> Result<bool> {
        self.shared(|records| -> Result<bool> {
            let mut records = records.write();
            if records.high_water.as_ref().map_or(false, |newest| key <= *newest) {
                return Ok(false);
            }
            records.log(&StoreOp::Append {
                key: &key,
                value: &value,
            })?;
            records.high_water = Some(key.clone());
            records.map.insert(key, value);
            Ok(true)
        })?
    }

    /// Value stored under `key`
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.shared(|records| records.read().map.get(key).cloned())
    }

    /// Whether `key` is stored
    pub fn contains(&self, key: &K) -> Result<bool> {
        self.shared(|records| records.read().map.contains_key(key))
    }

    /// Oldest record
    pub fn oldest(&self) -> Result<Option<(K, V)>> {
        self.shared(|records| {
            records
                .read()
                .map
                .first_key_value()
                .map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    /// Newest record
    pub fn newest(&self) -> Result<Option<(K, V)>> {
        self.shared(|records| {
            records
                .read()
                .map
                .last_key_value()
                .map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    /// Oldest key
    pub fn oldest_key(&self) -> Result<Option<K>> {
        self.shared(|records| records.read().map.keys().next().cloned())
    }

    /// Newest key
    pub fn newest_key(&self) -> Result<Option<K>> {
        self.shared(|records| records.read().map.keys().next_back().cloned())
    }

    /// Newest key ever accepted, even if since purged
    pub fn high_water(&self) -> Result<Option<K>> {
        self.shared(|records| records.read().high_water.clone())
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        self.shared(|records| records.read().map.len())
    }

    /// Check if the store holds no record
    pub fn is_empty(&self) -> Result<bool> {
        self.shared(|records| records.read().map.is_empty())
    }

    /// Smallest value of `f` over every record
    pub fn min_of<T: Ord>(&self, f: impl Fn(&V) -> T) -> Result<Option<T>> {
        self.shared(|records| records.read().map.values().map(f).min())
    }

    /// Remove every record whose key is strictly lower than `key`
    ///
    /// Returns the number of removed records. Idempotent.
    pub fn purge_before(&self, key: &K) -> Result<usize> {
        self.exclusive(|records| -> Result<usize> {
            let Some(last) = records.map.range(..key.clone()).next_back().map(|(k, _)| k.clone())
            else {
                return Ok(0);
            };
            records.log(&StoreOp::PurgeThrough { key: &last })?;
            let kept = records.map.split_off(key);
            let removed = records.map.len();
            records.map = kept;
            Ok(removed)
        })?
    }

    /// Remove records from the oldest end while `purge` returns true
    ///
    /// Stops at the first record `purge` rejects. Returns the number of
    /// removed records.
    pub fn purge_while(&self, mut purge: impl FnMut(&K, &V) -> bool) -> Result<usize> {
        self.exclusive(|records| -> Result<usize> {
            let mut last = None;
            let mut removed = 0;
            for (k, v) in records.map.iter() {
                if !purge(k, v) {
                    break;
                }
                last = Some(k.clone());
                removed += 1;
            }
            let Some(last) = last else {
                return Ok(0);
            };
            records.log(&StoreOp::PurgeThrough { key: &last })?;
            records.apply(StoreOp::PurgeThrough { key: last });
            Ok(removed)
        })?
    }

    /// Remove every record for which `remove` returns true
    pub fn remove_where(&self, mut remove: impl FnMut(&K, &V) -> bool) -> Result<usize> {
        self.exclusive(|records| -> Result<usize> {
            let keys: Vec<K> = records
                .map
                .iter()
                .filter(|&(k, v)| remove(k, v))
                .map(|(k, _)| k.clone())
                .collect();
            if keys.is_empty() {
                return Ok(0);
            }
            records.log(&StoreOp::Remove {
                keys: keys.iter().collect(),
            })?;
            let removed = keys.len();
            records.apply(StoreOp::Remove { keys });
            Ok(removed)
        })?
    }

    /// Remove every record and forget the newest key, leaving the store open
    pub fn clear(&self) -> Result<()> {
        self.exclusive(|records| -> Result<()> {
            if let Some(journal) = records.journal.as_mut() {
                journal.truncate()?;
            }
            records.map.clear();
            records.high_water = None;
            Ok(())
        })?
    }

    /// Close the store and release its records
    ///
    /// Waits for in-flight operations to finish. Every later operation
    /// fails with `StoreUnavailable`. Closing twice is a no-op. The journal
    /// stays on disk.
    pub fn close(&self) {
        let mut closed = self.lifecycle.write();
        if !*closed {
            *closed = true;
            let mut records = self.records.write();
            records.map.clear();
            records.journal = None;
        }
    }

    /// Close the store and delete its journal
    pub fn destroy(&self) -> Result<()> {
        self.close();
        match &self.path {
            Some(path) => journal::remove(path),
            None => Ok(()),
        }
    }

    /// Whether the store was closed
    pub fn is_closed(&self) -> bool {
        *self.lifecycle.read()
    }

    /// Open a cursor from `start`
    ///
    /// A `None` start positions the cursor before the first record.
    /// Otherwise the start is resolved with `options` (see
    /// [`KeyMatchingStrategy`] and [`PositionStrategy`]). An `EqualToKey`
    /// start that matches no record yields an empty cursor.
    pub fn cursor(self: &Arc<Self>, start: Option<&K>, options: CursorOptions) -> Result<StoreCursor<K, V>> {
        let Some(key) = start else {
            self.shared(|_| ())?;
            return Ok(StoreCursor::new(Arc::clone(self), Bound::Unbounded));
        };

        let on = options.position == PositionStrategy::OnMatchingKey;
        let from = self.shared(|records| {
            let records = records.read();
            match options.matching {
                KeyMatchingStrategy::EqualToKey => {
                    if !records.map.contains_key(key) {
                        return None;
                    }
                    Some(bound_at(key.clone(), on))
                }
                KeyMatchingStrategy::GreaterThanOrEqualToKey => Some(bound_at(key.clone(), on)),
                KeyMatchingStrategy::LessThanOrEqualToKey => {
                    match records.map.range(..=key.clone()).next_back() {
                        Some((floor, _)) => Some(bound_at(floor.clone(), on)),
                        None => Some(Bound::Unbounded),
                    }
                }
            }
        })?;

        Ok(match from {
            Some(from) => StoreCursor::new(Arc::clone(self), from),
            None => StoreCursor::empty(),
        })
    }

    /// First record at or after `from`, without positioning any cursor
    fn seek(&self, from: &Bound<K>) -> Result<Option<(K, V)>> {
        self.shared(|records| {
            records
                .read()
                .map
                .range((from.clone(), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        })
    }
}

fn bound_at<K>(key: K, on: bool) -> Bound<K> {
    if on {
        Bound::Included(key)
    } else {
        Bound::Excluded(key)
    }
}

impl<K, V> std::fmt::Debug for OrderedStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &*self.lifecycle.read())
            .field("records", &self.records.read().map.len())
            .finish()
    }
}

/// Forward cursor over an [`OrderedStore`]
///
/// The cursor remembers the last delivered key and seeks past it on every
/// step, so it keeps working across concurrent appends and purges.
pub struct StoreCursor<K, V> {
    store: Option<Arc<OrderedStore<K, V>>>,
    from: Bound<K>,
    current: Option<(K, V)>,
    state: CursorState,
}

impl<K, V> StoreCursor<K, V>
where
    K: Ord + StoreItem,
    V: StoreItem,
{
    fn new(store: Arc<OrderedStore<K, V>>, from: Bound<K>) -> Self {
        Self {
            store: Some(store),
            from,
            current: None,
            state: CursorState::Uninitialized,
        }
    }

    /// A cursor that never delivers anything
    pub fn empty() -> Self {
        Self {
            store: None,
            from: Bound::Unbounded,
            current: None,
            state: CursorState::Uninitialized,
        }
    }

    /// Key of the current record
    pub fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|(k, _)| k)
    }

    /// Whether the cursor is bound to a store
    pub fn is_empty_cursor(&self) -> bool {
        self.store.is_none()
    }
}

impl<K, V> ChangelogCursor for StoreCursor<K, V>
where
    K: Ord + StoreItem,
    V: StoreItem,
{
    type Record = V;

    /// Fails with `StoreUnavailable` if the store was closed.
    fn next(&mut self) -> Result<bool> {
        let Some(store) = &self.store else {
            if self.state != CursorState::Closed {
                self.state = CursorState::Exhausted;
            }
            return Ok(false);
        };

        match store.seek(&self.from)? {
            Some((key, value)) => {
                self.from = Bound::Excluded(key.clone());
                self.current = Some((key, value));
                self.state = CursorState::Positioned;
                Ok(true)
            }
            None => {
                self.current = None;
                self.state = CursorState::Exhausted;
                Ok(false)
            }
        }
    }

    fn record(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, v)| v)
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn close(&mut self) {
        self.store = None;
        self.current = None;
        self.state = CursorState::Closed;
    }
}
