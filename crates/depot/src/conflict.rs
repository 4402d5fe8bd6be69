// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pre-read conflict resolution.
//!
//! Before a mutable-mode read consults any layer, pending origin pushes for
//! the key are replayed so the read does not pull potentially stale origin
//! data on top of unsynced local mutations. Replay failures never abort the
//! read; the consumer merely observes a locally-newer-than-origin value and
//! the bookkeeping record stays set.

use tracing::{debug, trace};

use crate::updater::PushOutcome;
use crate::write::{unix_timestamp_ms, WriteCoordinator};
use crate::{StoreKey, StoreValue};

impl<K, N, L, V> WriteCoordinator<K, N, L, V>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    /// Replays the pending write queue for `key` head to tail if the
    /// bookkeeper shows an unresolved sync failure. Returns once every
    /// entry has been acknowledged, or at the first failure.
    pub(crate) async fn eagerly_resolve_conflicts(&self, key: &K) {
        if self.bookkeeper.get_last_failed_sync(key).await.is_none() {
            return;
        }
        let state = self.keys.state(key);
        let _drive = state.drive_lock.lock().await;
        loop {
            let head = { state.write_queue.lock().await.front().cloned() };
            let Some(entry) = head else {
                // Nothing is pending; the key is in sync again.
                self.bookkeeper.clear(key).await;
                debug!(?key, "conflict queue drained");
                return;
            };
            match self.post_queued(key, &entry).await {
                PushOutcome::Success => {
                    Self::dequeue_through(&state, entry.seq).await;
                    trace!(?key, seq = entry.seq, "replayed queued write");
                }
                PushOutcome::Error(error) => {
                    self.bookkeeper
                        .set_last_failed_sync(key, unix_timestamp_ms())
                        .await;
                    debug!(
                        ?key,
                        seq = entry.seq,
                        error = %error,
                        "replay failed, read proceeds with local value"
                    );
                    return;
                }
            }
        }
    }
}
