// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use dashmap::DashMap;

use crate::StoreKey;

/// Records keys whose local writes have not been durably pushed to the
/// origin.
///
/// A record for a key means at least one write is pending replay; a
/// successful push clears it. Persistent implementations survive restarts
/// and keep cross-session reconciliation working; volatile ones are
/// permitted with that reconciliation lost.
#[async_trait]
pub trait Bookkeeper<K>: Send + Sync + 'static {
    /// Timestamp (ms since the unix epoch) of the most recent failed push
    /// for `key`, if unresolved.
    async fn get_last_failed_sync(&self, key: &K) -> Option<u64>;

    /// Returns whether the record was stored.
    async fn set_last_failed_sync(&self, key: &K, timestamp_ms: u64) -> bool;

    /// Returns whether a record was removed.
    async fn clear(&self, key: &K) -> bool;

    async fn clear_all(&self) -> bool;
}

#[async_trait]
impl<K, B> Bookkeeper<K> for std::sync::Arc<B>
where
    K: Send + Sync + 'static,
    B: Bookkeeper<K>,
{
    async fn get_last_failed_sync(&self, key: &K) -> Option<u64> {
        (**self).get_last_failed_sync(key).await
    }

    async fn set_last_failed_sync(&self, key: &K, timestamp_ms: u64) -> bool {
        (**self).set_last_failed_sync(key, timestamp_ms).await
    }

    async fn clear(&self, key: &K) -> bool {
        (**self).clear(key).await
    }

    async fn clear_all(&self) -> bool {
        (**self).clear_all().await
    }
}

/// Volatile bookkeeper; loses its records when dropped.
pub struct InMemoryBookkeeper<K> {
    records: DashMap<K, u64>,
}

impl<K: StoreKey> InMemoryBookkeeper<K> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<K: StoreKey> Default for InMemoryBookkeeper<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: StoreKey> Bookkeeper<K> for InMemoryBookkeeper<K> {
    async fn get_last_failed_sync(&self, key: &K) -> Option<u64> {
        self.records.get(key).map(|record| *record)
    }

    async fn set_last_failed_sync(&self, key: &K, timestamp_ms: u64) -> bool {
        self.records.insert(key.clone(), timestamp_ms);
        true
    }

    async fn clear(&self, key: &K) -> bool {
        self.records.remove(key).is_some()
    }

    async fn clear_all(&self) -> bool {
        self.records.clear();
        true
    }
}
