// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source-of-truth wrapper serializing reads against concurrent writes.
//!
//! Every write bumps the key's version and closes its barrier before
//! touching the underlying store, then reopens it once the write is durable.
//! Reader subscriptions park while the barrier is closed and re-subscribe to
//! the underlying reader when it reopens, which re-emits the freshly written
//! value. Emissions produced after a post-subscription write carry the
//! origin recorded by that write, so the read pipeline can attribute a
//! fetch-persisted value to the fetcher rather than to the local store.
//!
//! Contract: for a given key, the values any subscriber observes form a
//! suffix of the totally ordered write history of that key.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::StoreError;
use crate::keys::{BarrierState, KeyStates};
use crate::response::ResponseOrigin;
use crate::source_of_truth::SourceOfTruth;
use crate::{StoreKey, StoreValue};

pub(crate) struct SourceOfTruthWithBarrier<K, L, V> {
    delegate: Arc<dyn SourceOfTruth<K, L>>,
    keys: Arc<KeyStates<K, V>>,
}

impl<K, L, V> SourceOfTruthWithBarrier<K, L, V>
where
    K: StoreKey,
    L: StoreValue,
    V: Send + 'static,
{
    pub(crate) fn new(delegate: Arc<dyn SourceOfTruth<K, L>>, keys: Arc<KeyStates<K, V>>) -> Self {
        Self { delegate, keys }
    }

    /// Persists a value fetched from the origin; readers re-emit it tagged
    /// with [`ResponseOrigin::Fetcher`].
    pub(crate) async fn write_from_fetch(&self, key: &K, value: L) -> Result<(), StoreError> {
        self.write_with_origin(key, value, ResponseOrigin::Fetcher)
            .await
    }

    /// Persists a locally produced value.
    pub(crate) async fn write_local(&self, key: &K, value: L) -> Result<(), StoreError> {
        self.write_with_origin(key, value, ResponseOrigin::SourceOfTruth)
            .await
    }

    async fn write_with_origin(
        &self,
        key: &K,
        value: L,
        origin: ResponseOrigin,
    ) -> Result<(), StoreError> {
        let state = self.keys.state(key);
        let _guard = state.sot_lock.lock().await;
        let version = state.version.fetch_add(1, Ordering::SeqCst) + 1;
        state.barrier.send_replace(BarrierState::Blocked { version });
        let result = self.delegate.write(key, value).await;
        state.barrier.send_replace(BarrierState::Allow { version, origin });
        result
    }

    pub(crate) async fn delete(&self, key: &K) -> Result<(), StoreError> {
        let state = self.keys.state(key);
        let _guard = state.sot_lock.lock().await;
        let version = state.version.fetch_add(1, Ordering::SeqCst) + 1;
        state.barrier.send_replace(BarrierState::Blocked { version });
        let result = self.delegate.delete(key).await;
        state.barrier.send_replace(BarrierState::Allow {
            version,
            origin: ResponseOrigin::SourceOfTruth,
        });
        result
    }

    /// Deletes every stored entry. Barriers of all referenced keys are
    /// closed for the duration so active readers observe the wipe as one
    /// transition.
    pub(crate) async fn delete_all(&self) -> Result<(), StoreError> {
        let states = self.keys.snapshot();
        let mut reopen = Vec::with_capacity(states.len());
        for state in &states {
            let version = state.version.fetch_add(1, Ordering::SeqCst) + 1;
            state.barrier.send_replace(BarrierState::Blocked { version });
            reopen.push(version);
        }
        let result = self.delegate.delete_all().await;
        for (state, version) in states.iter().zip(reopen) {
            state.barrier.send_replace(BarrierState::Allow {
                version,
                origin: ResponseOrigin::SourceOfTruth,
            });
        }
        result
    }

    /// Observes the key through the barrier. Items pair the stored value
    /// with the origin of the write that produced it.
    pub(crate) fn reader(
        &self,
        key: &K,
    ) -> BoxStream<'static, Result<(Option<L>, ResponseOrigin), StoreError>> {
        let state = self.keys.state(key);
        let delegate = self.delegate.clone();
        let key = key.clone();
        Box::pin(stream! {
            let mut barrier = state.barrier.subscribe();
            let subscribed_version = barrier.borrow().version();
            loop {
                // Wait for the barrier to open, consuming any pending
                // transition so `changed` below reflects only later writes.
                let (version, origin) = loop {
                    let snapshot = barrier.borrow_and_update().clone();
                    match snapshot {
                        BarrierState::Allow { version, origin } => break (version, origin),
                        BarrierState::Blocked { .. } => {
                            if barrier.changed().await.is_err() {
                                return;
                            }
                        }
                    }
                };
                // Values observed before any post-subscription write are
                // attributed to the store itself.
                let tag = if version > subscribed_version {
                    origin
                } else {
                    ResponseOrigin::SourceOfTruth
                };
                let mut values = delegate.reader(&key);
                loop {
                    enum Step<T> {
                        Barrier,
                        Value(Option<T>),
                    }
                    let step = tokio::select! {
                        biased;
                        changed = barrier.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            Step::Barrier
                        }
                        item = values.next() => Step::Value(item),
                    };
                    match step {
                        // A write began or completed; drop the subscription
                        // and re-evaluate, re-emitting once allowed again.
                        Step::Barrier => break,
                        Step::Value(Some(Ok(value))) => yield Ok((value, tag)),
                        Step::Value(Some(Err(error))) => yield Err(error),
                        Step::Value(None) => {
                            // The underlying reader completed. Park until the
                            // next write, then restart it.
                            if barrier.changed().await.is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        })
    }
}
