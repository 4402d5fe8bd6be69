// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use crate::error::{FetcherError, StoreError};

/// Which layer produced a read response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseOrigin {
    Cache,
    SourceOfTruth,
    Fetcher,
}

/// How a read consults the cache layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Serve memory and local data when present and valid; fetch from the
    /// origin on a miss. `refresh` additionally starts a parallel fetch even
    /// when the cached data is satisfactory.
    Cached { refresh: bool },
    /// Suppress cache and local pre-reads; only the origin-sourced value is
    /// emitted (after it has been persisted).
    Fresh,
    /// Skip the memory cache but read the source of truth.
    SkipMemory { refresh: bool },
    /// Skip the source-of-truth read and fetch unconditionally. The memory
    /// cache is still consulted and the fetched value is still persisted.
    SkipDisk,
    /// Serve only memory and local data; never contact the origin.
    LocalOnly,
}

impl ReadPolicy {
    pub(crate) fn reads_memory(&self) -> bool {
        matches!(
            self,
            ReadPolicy::Cached { .. } | ReadPolicy::SkipDisk | ReadPolicy::LocalOnly
        )
    }
}

/// A keyed read subscription request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest<K> {
    pub key: K,
    pub policy: ReadPolicy,
}

impl<K> ReadRequest<K> {
    pub fn cached(key: K, refresh: bool) -> Self {
        Self {
            key,
            policy: ReadPolicy::Cached { refresh },
        }
    }

    pub fn fresh(key: K) -> Self {
        Self {
            key,
            policy: ReadPolicy::Fresh,
        }
    }

    pub fn skip_memory(key: K, refresh: bool) -> Self {
        Self {
            key,
            policy: ReadPolicy::SkipMemory { refresh },
        }
    }

    pub fn skip_disk(key: K) -> Self {
        Self {
            key,
            policy: ReadPolicy::SkipDisk,
        }
    }

    pub fn local_only(key: K) -> Self {
        Self {
            key,
            policy: ReadPolicy::LocalOnly,
        }
    }
}

/// One record on a read subscription stream.
///
/// Errors are non-terminal: the stream stays open and keeps delivering
/// subsequent values, so a consumer can recover when connectivity returns.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadResponse<V> {
    /// A fetch has started and no layer has produced a value yet.
    Loading,
    Data { value: V, origin: ResponseOrigin },
    /// The consulted layer holds no acceptable value for the key.
    NoNewData { origin: ResponseOrigin },
    Error(StoreError),
}

impl<V> ReadResponse<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            ReadResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            ReadResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<ResponseOrigin> {
        match self {
            ReadResponse::Data { origin, .. } | ReadResponse::NoNewData { origin } => Some(*origin),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReadResponse::Error(_))
    }
}

/// A local-first write for a key.
#[derive(Clone, Debug)]
pub struct WriteRequest<K, V> {
    pub key: K,
    pub value: V,
    pub created_at: SystemTime,
}

impl<K, V> WriteRequest<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            created_at: SystemTime::now(),
        }
    }

    pub fn with_created_at(key: K, value: V, created_at: SystemTime) -> Self {
        Self {
            key,
            value,
            created_at,
        }
    }
}

/// Outcome of a write request, resolved once the optimistic local write and
/// the origin push have both completed.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteResponse {
    Success,
    Error(StoreError),
}

impl WriteResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteResponse::Success)
    }
}

/// One record emitted by an origin fetcher.
#[derive(Clone, Debug, PartialEq)]
pub enum FetcherResult<N> {
    Data { value: N },
    Error(FetcherError),
}

impl<N> FetcherResult<N> {
    pub fn data(value: N) -> Self {
        FetcherResult::Data { value }
    }

    pub fn error(error: FetcherError) -> Self {
        FetcherResult::Error(error)
    }
}
