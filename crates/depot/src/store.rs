// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The read pipeline and the public store surface.
//!
//! A read subscription flows gate → memory cache → plan decision → local
//! and/or origin sources. The pipeline emits typed records and never
//! terminates on its own: errors are records, not stream failures, and the
//! stream ends only when the consumer drops it. Fetched values are persisted
//! through the write barrier and reflected back to every subscriber as the
//! source of truth echoes them.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tracing::trace;

use crate::barrier::SourceOfTruthWithBarrier;
use crate::bookkeeping::Bookkeeper;
use crate::cache::{CachePolicy, MemoryCache};
use crate::controller::{FetchEvent, FetchSubscription, FetcherController, PersistFn};
use crate::convert::{Converter, IdentityConverter, Validator};
use crate::error::{FetcherError, StoreError};
use crate::fetcher::Fetcher;
use crate::keys::KeyStates;
use crate::response::{
    ReadPolicy, ReadRequest, ReadResponse, ResponseOrigin, WriteRequest, WriteResponse,
};
use crate::source_of_truth::SourceOfTruth;
use crate::updater::Updater;
use crate::write::WriteCoordinator;
use crate::{StoreKey, StoreValue};

/// How a read plan involves the origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FetchPlan {
    /// Local sources only.
    None,
    /// Fetch once the source of truth turns out to be empty or invalid.
    OnMiss,
    /// Fetch immediately.
    Eager,
}

impl FetchPlan {
    fn for_policy(policy: ReadPolicy, cache_hit: bool) -> Self {
        match policy {
            ReadPolicy::Fresh | ReadPolicy::SkipDisk => FetchPlan::Eager,
            ReadPolicy::Cached { refresh: true } | ReadPolicy::SkipMemory { refresh: true } => {
                FetchPlan::Eager
            }
            ReadPolicy::Cached { refresh: false } => {
                if cache_hit {
                    FetchPlan::None
                } else {
                    FetchPlan::OnMiss
                }
            }
            ReadPolicy::SkipMemory { refresh: false } => FetchPlan::OnMiss,
            ReadPolicy::LocalOnly => FetchPlan::None,
        }
    }
}

struct StoreInner<K, N, L, V> {
    cache: Arc<MemoryCache<K, V>>,
    barrier: Arc<SourceOfTruthWithBarrier<K, L, V>>,
    fetches: FetcherController<K, N>,
    converter: Arc<dyn Converter<N, L, V>>,
    validator: Option<Arc<dyn Validator<V>>>,
    writer: Option<Arc<WriteCoordinator<K, N, L, V>>>,
}

impl<K: StoreKey, N: StoreValue, L: StoreValue, V: StoreValue> StoreInner<K, N, L, V> {
    fn accepts(&self, value: &V) -> bool {
        self.validator
            .as_ref()
            .map_or(true, |validator| validator.is_valid(value))
    }
}

/// Read-side handle to the data-access engine. Cheap to clone.
pub struct Store<K, N, L, V> {
    inner: Arc<StoreInner<K, N, L, V>>,
}

impl<K, N, L, V> Clone for Store<K, N, L, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, N, L, V> Store<K, N, L, V>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    pub fn builder(
        fetcher: impl Fetcher<K, N>,
        source_of_truth: impl SourceOfTruth<K, L>,
        converter: impl Converter<N, L, V>,
    ) -> StoreBuilder<K, N, L, V> {
        StoreBuilder::new(fetcher, source_of_truth, converter)
    }

    /// Subscribes to `request.key`. The returned stream is unbounded; it
    /// completes only when dropped, which also detaches the local reader
    /// and the fetch multicast.
    pub fn stream(&self, request: ReadRequest<K>) -> BoxStream<'static, ReadResponse<V>> {
        let inner = self.inner.clone();
        Box::pin(stream! {
            let ReadRequest { key, policy } = request;
            trace!(?key, ?policy, "read subscription started");
            if let Some(writer) = &inner.writer {
                writer.eagerly_resolve_conflicts(&key).await;
            }

            let cached = if policy.reads_memory() {
                inner.cache.get(&key).filter(|value| inner.accepts(value))
            } else {
                None
            };
            if let Some(value) = cached.clone() {
                yield ReadResponse::Data {
                    value,
                    origin: ResponseOrigin::Cache,
                };
            }

            let plan = FetchPlan::for_policy(policy, cached.is_some());
            if plan == FetchPlan::None {
                // Local-only: relay the source of truth until the consumer
                // goes away.
                let mut values = inner.barrier.reader(&key);
                while let Some(item) = values.next().await {
                    match item {
                        Ok((Some(local), tag)) => match inner.converter.to_domain(local) {
                            Ok(value) => {
                                if tag == ResponseOrigin::Fetcher || inner.accepts(&value) {
                                    inner.cache.put(key.clone(), value.clone());
                                    yield ReadResponse::Data { value, origin: tag };
                                } else {
                                    yield ReadResponse::NoNewData {
                                        origin: ResponseOrigin::SourceOfTruth,
                                    };
                                }
                            }
                            Err(error) => yield ReadResponse::Error(error),
                        },
                        Ok((None, _)) => {
                            yield ReadResponse::NoNewData {
                                origin: ResponseOrigin::SourceOfTruth,
                            };
                        }
                        Err(error) => yield ReadResponse::Error(error),
                    }
                }
                return;
            }

            // Composite: a source-of-truth reader and/or an origin fetch,
            // multiplexed into one response sequence.
            let fresh = matches!(policy, ReadPolicy::Fresh);
            let use_disk = !matches!(policy, ReadPolicy::SkipDisk);
            let mut emitted = cached.is_some();
            let mut fetch: Option<FetchSubscription<K, N>> = None;
            if plan == FetchPlan::Eager {
                fetch = Some(inner.fetches.subscribe(&key));
                if !emitted {
                    emitted = true;
                    yield ReadResponse::Loading;
                }
            }
            let mut values = use_disk.then(|| inner.barrier.reader(&key));
            let mut first_local = true;
            let mut origin_seen = false;

            loop {
                enum Event<A, B> {
                    Local(A),
                    Fetch(B),
                }
                let event = tokio::select! {
                    item = next_some(&mut values) => Event::Local(item),
                    item = next_some(&mut fetch) => Event::Fetch(item),
                };
                match event {
                    Event::Local(None) => {
                        values = None;
                    }
                    Event::Local(Some(Err(error))) => {
                        emitted = true;
                        yield ReadResponse::Error(error);
                    }
                    Event::Local(Some(Ok((stored, tag)))) => {
                        let was_first = std::mem::replace(&mut first_local, false);
                        let converted = match stored {
                            Some(local) => match inner.converter.to_domain(local) {
                                Ok(value) => Some(value),
                                Err(error) => {
                                    emitted = true;
                                    yield ReadResponse::Error(error);
                                    continue;
                                }
                            },
                            None => None,
                        };
                        match converted {
                            Some(value) if tag == ResponseOrigin::Fetcher => {
                                origin_seen = true;
                                inner.cache.put(key.clone(), value.clone());
                                emitted = true;
                                yield ReadResponse::Data {
                                    value,
                                    origin: ResponseOrigin::Fetcher,
                                };
                            }
                            Some(_) if fresh && !origin_seen => {
                                // Fresh reads suppress values that predate
                                // the origin round-trip.
                            }
                            Some(value) if inner.accepts(&value) => {
                                inner.cache.put(key.clone(), value.clone());
                                emitted = true;
                                yield ReadResponse::Data {
                                    value,
                                    origin: ResponseOrigin::SourceOfTruth,
                                };
                            }
                            // Absent, or rejected by the validator.
                            _ => {
                                if fresh && !origin_seen {
                                    // Still waiting for the origin.
                                } else if was_first
                                    && plan == FetchPlan::OnMiss
                                    && fetch.is_none()
                                {
                                    trace!(?key, "local miss, starting fetch");
                                    fetch = Some(inner.fetches.subscribe(&key));
                                    if !emitted {
                                        emitted = true;
                                        yield ReadResponse::Loading;
                                    }
                                } else if was_first && fetch.is_some() {
                                    // Initial miss while a fetch is already
                                    // under way: Loading said it all.
                                } else {
                                    emitted = true;
                                    yield ReadResponse::NoNewData {
                                        origin: ResponseOrigin::SourceOfTruth,
                                    };
                                }
                            }
                        }
                    }
                    Event::Fetch(None) => {
                        fetch = None;
                    }
                    Event::Fetch(Some(FetchEvent::FetchError { error })) => {
                        // Origin errors are reported without tearing down
                        // the local stream.
                        emitted = true;
                        yield ReadResponse::Error(StoreError::Fetcher(error));
                    }
                    Event::Fetch(Some(FetchEvent::PersistError { error })) => {
                        emitted = true;
                        yield ReadResponse::Error(error);
                    }
                    Event::Fetch(Some(FetchEvent::Data { value: network })) => {
                        if !use_disk {
                            // No reader to echo through; emit directly.
                            let converted = inner
                                .converter
                                .from_network(network)
                                .and_then(|local| inner.converter.to_domain(local));
                            match converted {
                                Ok(value) => {
                                    origin_seen = true;
                                    inner.cache.put(key.clone(), value.clone());
                                    emitted = true;
                                    yield ReadResponse::Data {
                                        value,
                                        origin: ResponseOrigin::Fetcher,
                                    };
                                }
                                Err(error) => {
                                    emitted = true;
                                    yield ReadResponse::Error(error);
                                }
                            }
                        }
                        // Otherwise the driver already persisted the value
                        // and the tagged echo arrives through the reader.
                    }
                }
            }
        })
    }

    /// One-shot convenience read: the first `Data` value through the
    /// standard cached path, or the first error.
    pub async fn get(&self, key: &K) -> Result<V, StoreError> {
        self.first_value(ReadRequest::cached(key.clone(), false))
            .await
    }

    /// One-shot convenience read bypassing all caches.
    pub async fn fresh(&self, key: &K) -> Result<V, StoreError> {
        self.first_value(ReadRequest::fresh(key.clone())).await
    }

    async fn first_value(&self, request: ReadRequest<K>) -> Result<V, StoreError> {
        let mut responses = self.stream(request);
        while let Some(response) = responses.next().await {
            match response {
                ReadResponse::Data { value, .. } => return Ok(value),
                ReadResponse::Error(error) => return Err(error),
                ReadResponse::Loading | ReadResponse::NoNewData { .. } => continue,
            }
        }
        Err(StoreError::Fetcher(FetcherError::message(
            "read stream ended without producing a value",
        )))
    }

    /// Invalidates the memory entry and deletes the durable entry. The
    /// origin is untouched; active subscribers observe the deletion.
    pub async fn clear(&self, key: &K) -> Result<(), StoreError> {
        self.inner.cache.invalidate(key);
        self.inner.barrier.delete(key).await
    }

    /// Drops every memory entry and deletes all durable entries.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.inner.cache.invalidate_all();
        self.inner.barrier.delete_all().await
    }
}

async fn next_some<S: Stream + Unpin>(stream: &mut Option<S>) -> Option<S::Item> {
    match stream.as_mut() {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

/// Write-capable handle sharing the read pipeline of a [`Store`].
pub struct MutableStore<K, N, L, V> {
    store: Store<K, N, L, V>,
    writer: Arc<WriteCoordinator<K, N, L, V>>,
}

impl<K, N, L, V> Clone for MutableStore<K, N, L, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<K, N, L, V> MutableStore<K, N, L, V>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    /// The read-side handle. Reads through either handle consult the
    /// conflict-resolution gate.
    pub fn as_store(&self) -> &Store<K, N, L, V> {
        &self.store
    }

    pub fn stream(&self, request: ReadRequest<K>) -> BoxStream<'static, ReadResponse<V>> {
        self.store.stream(request)
    }

    /// Applies the write locally, then pushes it to the origin. See
    /// [`WriteResponse`] for the outcome contract.
    pub async fn write(&self, request: WriteRequest<K, V>) -> WriteResponse {
        self.writer.clone().write(request).await
    }

    pub async fn get(&self, key: &K) -> Result<V, StoreError> {
        self.store.get(key).await
    }

    pub async fn fresh(&self, key: &K) -> Result<V, StoreError> {
        self.store.fresh(key).await
    }

    pub async fn clear(&self, key: &K) -> Result<(), StoreError> {
        self.store.clear(key).await
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.store.clear_all().await
    }
}

/// Assembles a [`Store`] or [`MutableStore`] from its collaborators.
pub struct StoreBuilder<K, N, L, V> {
    fetcher: Arc<dyn Fetcher<K, N>>,
    source_of_truth: Arc<dyn SourceOfTruth<K, L>>,
    converter: Arc<dyn Converter<N, L, V>>,
    validator: Option<Arc<dyn Validator<V>>>,
    cache_policy: CachePolicy,
}

impl<K, T> StoreBuilder<K, T, T, T>
where
    K: StoreKey,
    T: StoreValue,
{
    /// Builder for stores whose network, local and domain shapes coincide.
    pub fn identity(
        fetcher: impl Fetcher<K, T>,
        source_of_truth: impl SourceOfTruth<K, T>,
    ) -> Self {
        Self::new(fetcher, source_of_truth, IdentityConverter)
    }
}

impl<K, N, L, V> StoreBuilder<K, N, L, V>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    pub fn new(
        fetcher: impl Fetcher<K, N>,
        source_of_truth: impl SourceOfTruth<K, L>,
        converter: impl Converter<N, L, V>,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            source_of_truth: Arc::new(source_of_truth),
            converter: Arc::new(converter),
            validator: None,
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn validator(mut self, validator: impl Validator<V>) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// A read-only store: no updater, no gate.
    pub fn build(self) -> Store<K, N, L, V> {
        let keys = Arc::new(KeyStates::new());
        let cache = Arc::new(MemoryCache::new(self.cache_policy));
        let barrier = Arc::new(SourceOfTruthWithBarrier::new(self.source_of_truth, keys));
        let persist = persist_fn(&barrier, &self.converter);
        Store {
            inner: Arc::new(StoreInner {
                cache,
                barrier,
                fetches: FetcherController::new(self.fetcher, persist),
                converter: self.converter,
                validator: self.validator,
                writer: None,
            }),
        }
    }

    /// A mutable store: local-first writes pushed to the origin through
    /// `updater`, with failed pushes recorded in `bookkeeper` and replayed
    /// by the pre-read gate.
    pub fn build_mutable(
        self,
        updater: Updater<K, V>,
        bookkeeper: impl Bookkeeper<K>,
    ) -> MutableStore<K, N, L, V> {
        let keys = Arc::new(KeyStates::new());
        let cache = Arc::new(MemoryCache::new(self.cache_policy));
        let barrier = Arc::new(SourceOfTruthWithBarrier::new(
            self.source_of_truth,
            keys.clone(),
        ));
        let writer = Arc::new(WriteCoordinator::new(
            cache.clone(),
            barrier.clone(),
            self.converter.clone(),
            updater,
            Arc::new(bookkeeper),
            keys,
        ));
        let persist = persist_fn(&barrier, &self.converter);
        MutableStore {
            store: Store {
                inner: Arc::new(StoreInner {
                    cache,
                    barrier,
                    fetches: FetcherController::new(self.fetcher, persist),
                    converter: self.converter,
                    validator: self.validator,
                    writer: Some(writer.clone()),
                }),
            },
            writer,
        }
    }
}

/// Persist hook handed to the fetch multicast: convert the network value and
/// land it through the barrier, once per origin emission.
fn persist_fn<K, N, L, V>(
    barrier: &Arc<SourceOfTruthWithBarrier<K, L, V>>,
    converter: &Arc<dyn Converter<N, L, V>>,
) -> PersistFn<K, N>
where
    K: StoreKey,
    N: StoreValue,
    L: StoreValue,
    V: StoreValue,
{
    let barrier = barrier.clone();
    let converter = converter.clone();
    Arc::new(move |key: K, network: N| {
        let barrier = barrier.clone();
        let converter = converter.clone();
        async move {
            let local = converter.from_network(network)?;
            barrier.write_from_fetch(&key, local).await
        }
        .boxed()
    })
}
