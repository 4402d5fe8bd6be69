// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::StoreError;
use crate::{StoreKey, StoreValue};

/// Uniform contract over the durable local store.
///
/// The source of truth is authoritative for offline reads: whatever the
/// engine fetches or accepts as a local write lands here before consumers
/// observe it.
#[async_trait]
pub trait SourceOfTruth<K, L>: Send + Sync + 'static {
    /// Lazily emits the currently stored value (or `None`) promptly, then
    /// every subsequent change for the key, until the stream is dropped.
    /// Must support concurrent subscriptions and be restartable.
    fn reader(&self, key: &K) -> BoxStream<'static, Result<Option<L>, StoreError>>;

    /// Upserts the value; resolves once the write is durable.
    async fn write(&self, key: &K, value: L) -> Result<(), StoreError>;

    async fn delete(&self, key: &K) -> Result<(), StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<K, L, S> SourceOfTruth<K, L> for Arc<S>
where
    K: Send + Sync + 'static,
    L: Send + 'static,
    S: SourceOfTruth<K, L>,
{
    fn reader(&self, key: &K) -> BoxStream<'static, Result<Option<L>, StoreError>> {
        (**self).reader(key)
    }

    async fn write(&self, key: &K, value: L) -> Result<(), StoreError> {
        (**self).write(key, value).await
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        (**self).delete_all().await
    }
}

/// Watch-channel backed source of truth.
///
/// Each key maps to a cell retaining the latest value; readers observe the
/// current value and every later write through the cell's channel. Intended
/// for tests and deployments that can afford to lose state across restarts,
/// in the spirit of typed-store's in-memory test database.
pub struct InMemorySourceOfTruth<K, L> {
    cells: DashMap<K, watch::Sender<Option<L>>>,
}

impl<K: StoreKey, L: StoreValue> InMemorySourceOfTruth<K, L> {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    fn subscribe(&self, key: &K) -> watch::Receiver<Option<L>> {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

impl<K: StoreKey, L: StoreValue> Default for InMemorySourceOfTruth<K, L> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: StoreKey, L: StoreValue> SourceOfTruth<K, L> for InMemorySourceOfTruth<K, L> {
    fn reader(&self, key: &K) -> BoxStream<'static, Result<Option<L>, StoreError>> {
        WatchStream::new(self.subscribe(key)).map(Ok).boxed()
    }

    async fn write(&self, key: &K, value: L) -> Result<(), StoreError> {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(value));
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError> {
        if let Some(cell) = self.cells.get(key) {
            cell.send_replace(None);
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        for cell in self.cells.iter() {
            cell.send_replace(None);
        }
        Ok(())
    }
}
