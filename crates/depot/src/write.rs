// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Local-first write processing.
//!
//! Writes enqueue per key, land optimistically in the source of truth, then
//! drive the updater toward the origin. A failed push stays queued and is
//! recorded with the bookkeeper so the conflict-resolution gate can replay
//! it before a later read; a successful push supersedes every entry that
//! entered the queue before it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::barrier::SourceOfTruthWithBarrier;
use crate::bookkeeping::Bookkeeper;
use crate::cache::MemoryCache;
use crate::convert::Converter;
use crate::error::{StoreError, UpdaterError};
use crate::keys::{KeyState, KeyStates, QueuedWrite};
use crate::response::{WriteRequest, WriteResponse};
use crate::updater::{PushOutcome, Updater};
use crate::{StoreKey, StoreValue};

pub(crate) fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

pub(crate) struct WriteCoordinator<K, N, L, V> {
    cache: Arc<MemoryCache<K, V>>,
    barrier: Arc<SourceOfTruthWithBarrier<K, L, V>>,
    converter: Arc<dyn Converter<N, L, V>>,
    updater: Updater<K, V>,
    pub(crate) bookkeeper: Arc<dyn Bookkeeper<K>>,
    pub(crate) keys: Arc<KeyStates<K, V>>,
}

impl<K, N, L, V> WriteCoordinator<K, N, L, V>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    pub(crate) fn new(
        cache: Arc<MemoryCache<K, V>>,
        barrier: Arc<SourceOfTruthWithBarrier<K, L, V>>,
        converter: Arc<dyn Converter<N, L, V>>,
        updater: Updater<K, V>,
        bookkeeper: Arc<dyn Bookkeeper<K>>,
        keys: Arc<KeyStates<K, V>>,
    ) -> Self {
        Self {
            cache,
            barrier,
            converter,
            updater,
            bookkeeper,
            keys,
        }
    }

    /// Processes one write request. Resolves once the optimistic local
    /// write and the origin push have both completed. The pipeline runs on
    /// its own task so that dropping the returned future cannot interrupt a
    /// write that already reached the source of truth.
    pub(crate) async fn write(self: Arc<Self>, request: WriteRequest<K, V>) -> WriteResponse {
        let coordinator = self.clone();
        let pipeline = tokio::spawn(async move { coordinator.run_write(request).await });
        match pipeline.await {
            Ok(response) => response,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(_) => WriteResponse::Error(StoreError::Updater(UpdaterError::message(
                "write task cancelled",
            ))),
        }
    }

    async fn run_write(&self, request: WriteRequest<K, V>) -> WriteResponse {
        let WriteRequest { key, value, .. } = request;
        let state = self.keys.state(&key);
        // Writes for one key are strictly serialized, including their origin
        // pushes; without this a superseded write could still reach the
        // origin after a newer one was acknowledged.
        let _drive = state.drive_lock.lock().await;
        let seq = {
            let mut queue = state.write_queue.lock().await;
            let seq = state.write_seq.fetch_add(1, Ordering::SeqCst);
            queue.push_back(QueuedWrite {
                seq,
                value: value.clone(),
            });
            seq
        };

        let local = match self.converter.from_domain(value.clone()) {
            Ok(local) => local,
            Err(error) => {
                Self::remove_entry(&state, seq).await;
                return WriteResponse::Error(error);
            }
        };
        if let Err(error) = self.barrier.write_local(&key, local).await {
            // The optimistic write never landed; this entry must not be
            // replayed.
            Self::remove_entry(&state, seq).await;
            debug!(?key, seq, error = %error, "optimistic local write failed");
            return WriteResponse::Error(error);
        }
        // The durable value is newer than whatever the cache holds.
        self.cache.invalidate(&key);

        match self.updater.post(key.clone(), value).await {
            PushOutcome::Success => {
                Self::dequeue_through(&state, seq).await;
                self.bookkeeper.clear(&key).await;
                trace!(?key, seq, updater = self.updater.name(), "origin push acknowledged");
                WriteResponse::Success
            }
            PushOutcome::Error(error) => {
                self.bookkeeper
                    .set_last_failed_sync(&key, unix_timestamp_ms())
                    .await;
                debug!(?key, seq, error = %error, "origin push failed, queued for replay");
                WriteResponse::Error(StoreError::Updater(error))
            }
        }
    }

    pub(crate) async fn remove_entry(state: &KeyState<V>, seq: u64) {
        state.write_queue.lock().await.retain(|entry| entry.seq != seq);
    }

    /// Drops the pushed entry together with every strictly older one: the
    /// origin has acknowledged a newer state, so they are superseded.
    pub(crate) async fn dequeue_through(state: &KeyState<V>, seq: u64) {
        state.write_queue.lock().await.retain(|entry| entry.seq > seq);
    }

    pub(crate) async fn post_queued(&self, key: &K, entry: &QueuedWrite<V>) -> PushOutcome {
        self.updater.post(key.clone(), entry.value.clone()).await
    }
}
