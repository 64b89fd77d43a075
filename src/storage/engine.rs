//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the keyspace shared by every client connection.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are hashed onto 64 shards, each behind its own
//!    `RwLock`, so operations on different keys rarely contend.
//! 2. **Lazy Expiry**: Every read checks the entry's deadline; an expired
//!    entry is treated as absent and removed on the spot.
//! 3. **Active Expiry**: `cleanup_expired` is driven by the background
//!    sweeper (see `expiry.rs`) to reclaim keys nobody reads again.
//! 4. **Insertion Order**: Each new key takes the next value of a store-wide
//!    sequence counter. `keys` sorts by it, so listings are reproducible.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A value and its deadline live in one `Entry` and are replaced together
//! under the shard's write lock, so readers never see one without the other.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Errors returned by storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Only the match-everything pattern is supported by `keys`.
    #[error("unsupported KEYS pattern '{0}', only '*' is supported")]
    UnsupportedPattern(String),
}

/// A stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
    /// Position of the key in insertion order
    seq: u64,
}

impl Entry {
    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Insertion sequence number of the key this entry belongs to.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    // The maps hold plain data, so a panic in another holder cannot leave
    // an entry half-written; recover the guard instead of propagating.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// The keyspace shared by all connections.
///
/// Wrap it in an `Arc` and hand a clone to every task that needs it.
///
/// # Example
///
/// ```
/// use snapkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("Ariz")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert_eq!(engine.keys(b"*").unwrap().len(), 2);
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Next insertion sequence number
    next_seq: AtomicU64,

    /// Number of physically stored entries (expired ones included until reclaimed)
    key_count: AtomicU64,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            next_seq: AtomicU64::new(0),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Sets a key-value pair without expiry.
    ///
    /// Returns `true` if the key did not exist (or had expired).
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.insert(key, value, None)
    }

    /// Sets a key-value pair that expires after `ttl`.
    ///
    /// A zero `ttl` stores an entry that is already expired. A `ttl` too large
    /// to represent as an instant is treated as no expiry.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        let expires_at = Instant::now().checked_add(ttl);
        self.insert(key, value, expires_at)
    }

    fn insert(&self, key: Bytes, value: Bytes, expires_at: Option<Instant>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(&key);
        let mut data = shard.write();

        // A live key keeps its place in the listing order.
        let seq = match data.get(&key) {
            Some(entry) if !entry.is_expired() => entry.seq,
            _ => self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let previous = data.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );

        match previous {
            None => {
                self.key_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(old) if old.is_expired() => {
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(_) => false,
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is removed as a side effect.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired - take the write lock to remove it
        let mut data = shard.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            // Another writer replaced it between the two locks
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Deletes a key.
    ///
    /// Returns `true` if a live key was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);
        let mut data = shard.write();

        match data.remove(key) {
            Some(entry) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                if entry.is_expired() {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Checks if a key exists and is not expired.
    pub fn exists(&self, key: &[u8]) -> bool {
        let shard = self.get_shard(key);
        let data = shard.read();

        data.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Returns all live keys matching `pattern`, in insertion order.
    ///
    /// Only `*` is supported; any other pattern is rejected.
    ///
    /// **Warning**: This operation scans all keys.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, StorageError> {
        if pattern != b"*" {
            return Err(StorageError::UnsupportedPattern(
                String::from_utf8_lossy(pattern).into_owned(),
            ));
        }

        let now = Instant::now();
        let mut live: Vec<(u64, Bytes)> = Vec::new();

        for shard in &self.shards {
            let data = shard.read();
            live.extend(
                data.iter()
                    .filter(|(_, entry)| !entry.is_expired_at(now))
                    .map(|(key, entry)| (entry.seq, key.clone())),
            );
        }

        live.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(live.into_iter().map(|(_, key)| key).collect())
    }

    /// Returns the number of stored entries.
    ///
    /// Expired entries that have not been reclaimed yet are still counted.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes expired entries from every shard.
    ///
    /// Called by the background expiry sweeper. Returns the number of
    /// entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write();
            let now = Instant::now();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired_at(now));

            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}
