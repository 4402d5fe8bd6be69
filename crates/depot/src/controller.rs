// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-key de-duplication and multicast of origin fetches.
//!
//! Each key has at most one live origin subscription. The first subscriber
//! launches a driver task that pulls the fetcher stream, persists each value
//! through the store's persist hook exactly once, and broadcasts every
//! outcome; later subscribers attach to the running multicast. Each flight
//! carries a cancellation token; when the last subscriber detaches the token
//! is cancelled and the driver winds down, dropping the origin call.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FetcherError, StoreError};
use crate::fetcher::Fetcher;
use crate::response::FetcherResult;
use crate::{StoreKey, StoreValue};

/// Results buffered per subscriber before a slow consumer starts lagging.
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Converts and persists one fetched value; invoked once per origin
/// emission regardless of the subscriber count.
pub(crate) type PersistFn<K, N> =
    Arc<dyn Fn(K, N) -> BoxFuture<'static, Result<(), StoreError>> + Send + Sync>;

/// What the multicast delivers to each subscriber.
#[derive(Clone, Debug)]
pub(crate) enum FetchEvent<N> {
    /// The origin produced data and it has been persisted.
    Data { value: N },
    /// The origin produced data but persisting it failed.
    PersistError { error: StoreError },
    /// The origin reported an error.
    FetchError { error: FetcherError },
}

struct Flight<N> {
    subscribers: usize,
    results: broadcast::Sender<FetchEvent<N>>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

pub(crate) struct FetcherController<K, N> {
    fetcher: Arc<dyn Fetcher<K, N>>,
    persist: PersistFn<K, N>,
    flights: Arc<DashMap<K, Flight<N>>>,
}

impl<K: StoreKey, N: StoreValue> FetcherController<K, N> {
    pub(crate) fn new(fetcher: Arc<dyn Fetcher<K, N>>, persist: PersistFn<K, N>) -> Self {
        Self {
            fetcher,
            persist,
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Attaches to the in-flight fetch for `key`, starting one if none is
    /// live. Dropping the subscription detaches; the origin call is
    /// cancelled when the last subscriber goes away.
    pub(crate) fn subscribe(&self, key: &K) -> FetchSubscription<K, N> {
        let receiver = match self.flights.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let flight = occupied.get_mut();
                if flight.driver.is_finished() {
                    // The previous origin call completed; this subscriber
                    // starts a new one.
                    *flight = self.launch(key.clone());
                }
                flight.subscribers += 1;
                flight.results.subscribe()
            }
            Entry::Vacant(vacant) => {
                let mut flight = self.launch(key.clone());
                flight.subscribers = 1;
                let receiver = flight.results.subscribe();
                vacant.insert(flight);
                receiver
            }
        };
        FetchSubscription {
            results: BroadcastStream::new(receiver),
            _guard: FlightGuard {
                flights: self.flights.clone(),
                key: key.clone(),
            },
        }
    }

    fn launch(&self, key: K) -> Flight<N> {
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn({
            let work = Self::drive(
                self.fetcher.clone(),
                self.persist.clone(),
                key.clone(),
                results.clone(),
            );
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(key = ?key, "origin fetch cancelled, last subscriber detached");
                    }
                    _ = work => {}
                }
            }
        });
        Flight {
            subscribers: 0,
            results,
            cancel,
            driver,
        }
    }

    /// Pulls the origin stream, persists and multicasts it, switching to
    /// fallback fetchers when the current one errors before producing any
    /// data.
    async fn drive(
        root: Arc<dyn Fetcher<K, N>>,
        persist: PersistFn<K, N>,
        key: K,
        results: broadcast::Sender<FetchEvent<N>>,
    ) {
        let mut fetcher = root;
        let mut produced_data = false;
        loop {
            debug!(
                key = ?key,
                fetcher = fetcher.name().unwrap_or("<anonymous>"),
                "starting origin fetch"
            );
            let mut origin = fetcher.invoke(&key);
            let mut switched = false;
            while let Some(result) = origin.next().await {
                let event = match result {
                    FetcherResult::Data { value } => {
                        produced_data = true;
                        // Persist on a separate task: aborting this driver
                        // must not interrupt a durable write.
                        let write = tokio::spawn(persist(key.clone(), value.clone()));
                        match write.await {
                            Ok(Ok(())) => FetchEvent::Data { value },
                            Ok(Err(error)) => FetchEvent::PersistError { error },
                            Err(join_error) => {
                                if join_error.is_panic() {
                                    std::panic::resume_unwind(join_error.into_panic());
                                }
                                return;
                            }
                        }
                    }
                    FetcherResult::Error(error) => {
                        if !produced_data {
                            if let Some(fallback) = fetcher.fallback() {
                                debug!(
                                    key = ?key,
                                    error = %error,
                                    fallback = fallback.name().unwrap_or("<anonymous>"),
                                    "origin errored before any data, consulting fallback"
                                );
                                fetcher = fallback;
                                switched = true;
                                break;
                            }
                        }
                        FetchEvent::FetchError { error }
                    }
                };
                // A send error means no subscriber is listening; the guard
                // of the last subscriber will abort this task.
                let _ = results.send(event);
            }
            if !switched {
                return;
            }
        }
    }
}

/// Multicast handle for one consumer. Yields fetch events; detaches on
/// drop.
pub(crate) struct FetchSubscription<K: StoreKey, N: StoreValue> {
    results: BroadcastStream<FetchEvent<N>>,
    _guard: FlightGuard<K, N>,
}

impl<K: StoreKey, N: StoreValue> Stream for FetchSubscription<K, N> {
    type Item = FetchEvent<N>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.results).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "fetch subscriber lagged behind the origin stream");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

struct FlightGuard<K: StoreKey, N: StoreValue> {
    flights: Arc<DashMap<K, Flight<N>>>,
    key: K,
}

impl<K: StoreKey, N: StoreValue> Drop for FlightGuard<K, N> {
    fn drop(&mut self) {
        if let Some(mut flight) = self.flights.get_mut(&self.key) {
            flight.subscribers = flight.subscribers.saturating_sub(1);
            if flight.subscribers > 0 {
                return;
            }
        } else {
            return;
        }
        // Re-check under removal so a subscriber that raced in keeps the
        // flight alive.
        if let Some((_, flight)) = self
            .flights
            .remove_if(&self.key, |_, flight| flight.subscribers == 0)
        {
            flight.cancel.cancel();
        }
    }
}
