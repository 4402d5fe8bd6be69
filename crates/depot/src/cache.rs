// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{StoreKey, StoreValue};

const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Sizing and expiry configuration for the memory cache.
#[derive(Clone, Debug)]
pub struct CachePolicy {
    max_entries: NonZeroUsize,
    expire_after_write: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            // DEFAULT_MAX_ENTRIES is non-zero.
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap(),
            expire_after_write: None,
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: NonZeroUsize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }
}

struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// Bounded LRU mapping from key to the most recent domain value.
///
/// The cache is advisory: a miss is never an error, and entries disappear
/// whenever capacity or the expire-after-write deadline says so.
pub(crate) struct MemoryCache<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    expire_after_write: Option<Duration>,
}

impl<K: StoreKey, V: StoreValue> MemoryCache<K, V> {
    pub(crate) fn new(policy: CachePolicy) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(policy.max_entries)),
            expire_after_write: policy.expire_after_write,
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = {
            let entry = entries.get(key)?;
            self.is_expired(entry)
        };
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn put(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        entries.put(
            key,
            Entry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    pub(crate) fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    pub(crate) fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.expire_after_write
            .map_or(false, |ttl| entry.written_at.elapsed() >= ttl)
    }
}
