//! Typed Storage Engine with Expiry and Dirty Tracking
//!
//! This module implements the key space of kvd. Every key maps to an
//! [`Entry`] holding exactly one typed [`Value`] (string, list, set or hash)
//! plus an optional absolute expiry time.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: the whole key space sits behind a single reader/writer
//!    lock. Every mutation takes the write lock, every read takes the read
//!    lock, and a snapshot clone under the read lock is consistent for the
//!    entire store.
//! 2. **Lazy Expiry**: an expired entry is treated as absent by every
//!    operation. `get` and all mutations remove it on contact; the background
//!    sweeper reclaims the rest.
//! 3. **Type Mismatch is a No-op**: an operation that targets a key of
//!    another kind changes nothing and returns its empty result.
//! 4. **Dirty Flag**: each successful mutation raises an atomic flag that the
//!    persistence task consumes with [`StorageEngine::take_dirty`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │  RwLock<HashMap<String, Entry>>   dirty: ⚑   │
//! │     │                                        │
//! │     ├── "name"  -> String("kvd")             │
//! │     ├── "queue" -> List([a, b, c])   ttl 5s  │
//! │     ├── "tags"  -> Set{x, y}                 │
//! │     └── "user"  -> Hash{id: 7}               │
//! └──────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

/// The type tag of an entry. Fixed for the lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    String,
    List,
    Set,
    Hash,
}

impl Kind {
    /// Lowercase name used on disk and in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::Hash => "hash",
        }
    }

    fn empty_value(self) -> Value {
        match self {
            Kind::String => Value::String(String::new()),
            Kind::List => Value::List(VecDeque::new()),
            Kind::Set => Value::Set(HashSet::new()),
            Kind::Hash => Value::Hash(HashMap::new()),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::String(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Set(_) => Kind::Set,
            Value::Hash(_) => Kind::Hash,
        }
    }
}

/// A stored value with optional expiry time.
///
/// Expiry is wall-clock based so that it survives a snapshot round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The typed value
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry expiring `ttl` from now. A zero TTL never expires.
    pub fn with_ttl(value: Value, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            SystemTime::now().checked_add(ttl)
        };
        Self { value, expires_at }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

type KeySpace = HashMap<String, Entry>;

/// The key space shared by every connection and background task.
///
/// Wrap it in an `Arc` and hand clones to the tasks; all methods take
/// `&self` and are safe to call concurrently.
///
/// # Example
///
/// ```
/// use kvd::storage::StorageEngine;
///
/// let engine = StorageEngine::new();
/// engine.set("name", "kvd".to_string(), None);
/// assert_eq!(engine.get("name"), Some("kvd".to_string()));
///
/// engine.rpush("queue", vec!["a".into(), "b".into()]);
/// assert_eq!(engine.lrange("queue", 0, -1), vec!["a", "b"]);
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    data: RwLock<KeySpace>,

    /// Set by mutations, cleared by a snapshot save
    dirty: AtomicBool,

    /// Number of entries removed because their TTL elapsed
    expired_count: AtomicU64,
}

impl StorageEngine {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, KeySpace> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeySpace> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Removes `key` if it holds an expired entry. Caller holds the write lock.
    fn purge_if_expired(&self, data: &mut KeySpace, key: &str) {
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            self.mark_dirty();
        }
    }

    /// Runs `f` against the live value at `key`, creating an empty value of
    /// `kind` first when the key is absent. `f` returns `None` to signal a
    /// kind mismatch, in which case nothing is marked dirty.
    fn mutate<R>(&self, key: &str, kind: Kind, f: impl FnOnce(&mut Value) -> Option<R>) -> Option<R> {
        let mut data = self.write();
        self.purge_if_expired(&mut data, key);

        if !data.contains_key(key) {
            data.insert(key.to_owned(), Entry::new(kind.empty_value()));
        }

        let result = data.get_mut(key).and_then(|entry| f(&mut entry.value));
        if result.is_some() {
            self.mark_dirty();
        }
        result
    }

    /// Runs `f` against the live value at `key` under the read lock.
    fn inspect<R>(&self, key: &str, f: impl FnOnce(&Value) -> Option<R>) -> Option<R> {
        let data = self.read();
        data.get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| f(&entry.value))
    }

    // ========================================================================
    // STRING / KEY OPERATIONS
    // ========================================================================

    /// Sets `key` to a string value, replacing whatever kind was there.
    ///
    /// A `ttl` of `None` or zero means the key never expires.
    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = match ttl {
            Some(ttl) => Entry::with_ttl(Value::String(value), ttl),
            None => Entry::new(Value::String(value)),
        };

        let mut data = self.write();
        data.insert(key.to_owned(), entry);
        self.mark_dirty();
    }

    /// Gets the string value for a key.
    ///
    /// Returns `None` if the key doesn't exist, has expired or is not a string.
    /// An expired key is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<String> {
        // Fast path under the read lock
        {
            let data = self.read();
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => {
                    return match &entry.value {
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    };
                }
                Some(_) => {}
            }
        }

        // Expired: take the write lock to remove it, re-checking under the lock
        let mut data = self.write();
        self.purge_if_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Deletes a key. Returns `true` if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut data = self.write();
        let existed = match data.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => return false,
        };
        // An expired entry is still a removal worth persisting
        self.mark_dirty();
        existed
    }

    /// Replaces the entire key space with an empty one.
    pub fn flush(&self) {
        let mut data = self.write();
        *data = HashMap::new();
        self.mark_dirty();
    }

    /// Returns the kind of a live key.
    pub fn key_kind(&self, key: &str) -> Option<Kind> {
        self.inspect(key, |value| Some(value.kind()))
    }

    /// Returns the number of keys, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Prepends `values` as a block: the first value becomes the new head.
    ///
    /// # Returns
    /// The new length of the list, or 0 if the key holds another kind.
    pub fn lpush(&self, key: &str, values: Vec<String>) -> usize {
        if values.is_empty() {
            return self.llen(key);
        }
        self.mutate(key, Kind::List, |value| match value {
            Value::List(list) => {
                for v in values.into_iter().rev() {
                    list.push_front(v);
                }
                Some(list.len())
            }
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Appends `values` after the current tail, in the given order.
    ///
    /// # Returns
    /// The new length of the list, or 0 if the key holds another kind.
    pub fn rpush(&self, key: &str, values: Vec<String>) -> usize {
        if values.is_empty() {
            return self.llen(key);
        }
        self.mutate(key, Kind::List, |value| match value {
            Value::List(list) => {
                list.extend(values);
                Some(list.len())
            }
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Returns the length of a list, 0 for absent keys and other kinds.
    pub fn llen(&self, key: &str) -> usize {
        self.inspect(key, |value| match value {
            Value::List(list) => Some(list.len()),
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Returns a range of elements from a list.
    /// Both start and stop are inclusive. Negative indices count from the end.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        self.inspect(key, |value| match value {
            Value::List(list) => Some(range_of(list, start, stop)),
            _ => None,
        })
        .unwrap_or_default()
    }

    // ========================================================================
    // SET OPERATIONS
    // ========================================================================

    /// Adds members to a set, creating it if needed.
    ///
    /// # Returns
    /// The number of members that were not already present.
    pub fn sadd(&self, key: &str, members: Vec<String>) -> usize {
        if members.is_empty() {
            return 0;
        }
        self.mutate(key, Kind::Set, |value| match value {
            Value::Set(set) => Some(
                members
                    .into_iter()
                    .map(|m| set.insert(m))
                    .filter(|&added| added)
                    .count(),
            ),
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Returns the members of a set in no particular order.
    pub fn smembers(&self, key: &str) -> Vec<String> {
        self.inspect(key, |value| match value {
            Value::Set(set) => Some(set.iter().cloned().collect()),
            _ => None,
        })
        .unwrap_or_default()
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Sets a field of a hash, creating the hash if needed.
    ///
    /// # Returns
    /// `true` if the field is new, `false` if it was overwritten or the key
    /// holds another kind.
    pub fn hset(&self, key: &str, field: String, value: String) -> bool {
        self.mutate(key, Kind::Hash, |v| match v {
            Value::Hash(hash) => Some(hash.insert(field, value).is_none()),
            _ => None,
        })
        .unwrap_or(false)
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.inspect(key, |value| match value {
            Value::Hash(hash) => hash.get(field).cloned(),
            _ => None,
        })
    }

    /// Returns every field and value of a hash, flattened as
    /// `[field1, value1, field2, value2, ...]`.
    pub fn hgetall(&self, key: &str) -> Vec<String> {
        self.inspect(key, |value| match value {
            Value::Hash(hash) => Some(
                hash.iter()
                    .flat_map(|(f, v)| [f.clone(), v.clone()])
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
    }

    // ========================================================================
    // EXPIRY & PERSISTENCE SUPPORT
    // ========================================================================

    /// Removes all expired entries. Called by the background sweeper.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut data = self.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - data.len();

        if removed > 0 {
            self.expired_count.fetch_add(removed as u64, Ordering::Relaxed);
            self.mark_dirty();
        }
        removed
    }

    /// Total number of entries removed because they expired.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    /// Clones every live entry under the read lock.
    pub fn snapshot(&self) -> HashMap<String, Entry> {
        let now = SystemTime::now();
        self.read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(k, entry)| (k.clone(), entry.clone()))
            .collect()
    }

    /// Installs `entries` as the whole key space. Does not mark dirty.
    pub fn replace_all(&self, entries: HashMap<String, Entry>) {
        let mut data = self.write();
        *data = entries;
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

/// Resolves an inclusive, possibly negative `[start, stop]` range against
/// `list` and clones the selected elements.
fn range_of(list: &VecDeque<String>, start: i64, stop: i64) -> Vec<String> {
    let len = list.len() as i64;

    // Convert negative indices
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };

    // Clamp to valid range
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }

    if start > stop || start >= len {
        return Vec::new();
    }

    list.iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .cloned()
        .collect()
}
