// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{stream, Stream, StreamExt};

use crate::response::FetcherResult;
use crate::{StoreKey, StoreValue};

/// Pulls values for a key from the remote origin.
///
/// A fetcher may be one-shot (a single result, then completion) or
/// long-lived (a stream of results). When a fetcher errors before producing
/// any data, its [`fallback`](Fetcher::fallback) is consulted instead;
/// fallbacks chain.
pub trait Fetcher<K, N>: Send + Sync + 'static {
    /// Starts an origin call for `key`.
    fn invoke(&self, key: &K) -> BoxStream<'static, FetcherResult<N>>;

    /// Identifier used in logs.
    fn name(&self) -> Option<&str> {
        None
    }

    fn fallback(&self) -> Option<Arc<dyn Fetcher<K, N>>> {
        None
    }
}

impl<K, N, F> Fetcher<K, N> for Arc<F>
where
    F: Fetcher<K, N>,
{
    fn invoke(&self, key: &K) -> BoxStream<'static, FetcherResult<N>> {
        (**self).invoke(key)
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn fallback(&self) -> Option<Arc<dyn Fetcher<K, N>>> {
        (**self).fallback()
    }
}

/// Fetcher built from a closure, with optional name and fallback.
pub struct FunctionFetcher<K, N> {
    invoke: Arc<dyn Fn(K) -> BoxStream<'static, FetcherResult<N>> + Send + Sync>,
    name: Option<String>,
    fallback: Option<Arc<dyn Fetcher<K, N>>>,
}

impl<K: StoreKey, N: StoreValue> FunctionFetcher<K, N> {
    /// One-shot fetcher: runs the future and emits its single result.
    pub fn from_future<F, Fut>(fetch: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetcherResult<N>> + Send + 'static,
    {
        Self {
            invoke: Arc::new(move |key| stream::once(fetch(key)).boxed()),
            name: None,
            fallback: None,
        }
    }

    /// Streaming fetcher: emits every item the origin produces.
    pub fn from_stream<F, S>(fetch: F) -> Self
    where
        F: Fn(K) -> S + Send + Sync + 'static,
        S: Stream<Item = FetcherResult<N>> + Send + 'static,
    {
        Self {
            invoke: Arc::new(move |key| fetch(key).boxed()),
            name: None,
            fallback: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_fallback(mut self, fallback: impl Fetcher<K, N>) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

impl<K: StoreKey, N: StoreValue> Fetcher<K, N> for FunctionFetcher<K, N> {
    fn invoke(&self, key: &K) -> BoxStream<'static, FetcherResult<N>> {
        (self.invoke)(key.clone())
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn fallback(&self) -> Option<Arc<dyn Fetcher<K, N>>> {
        self.fallback.clone()
    }
}
