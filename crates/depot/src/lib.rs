// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! depot is a client-side data-access engine. Consumers subscribe to a
//! reactive stream keyed by an opaque key; the engine serves cached data
//! when valid, fetches from the remote origin when not, persists fetched
//! data in a durable source of truth, and de-duplicates concurrent origin
//! requests per key. In its mutable mode it also accepts local writes,
//! applies them optimistically, pushes them to the origin, and records sync
//! failures so they can be replayed before a later read.
//!
//! The engine itself persists nothing: the source of truth, the fetcher, the
//! updater and the bookkeeper are collaborators supplied by the caller.
//!
//! ```
//! use depot::{
//!     FetcherResult, FunctionFetcher, InMemorySourceOfTruth, ReadRequest, StoreBuilder,
//! };
//! use futures::StreamExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fetcher = FunctionFetcher::from_future(|user_id: u64| async move {
//!     FetcherResult::data(format!("profile-{user_id}"))
//! });
//! let store = StoreBuilder::identity(fetcher, InMemorySourceOfTruth::new()).build();
//!
//! let mut responses = store.stream(ReadRequest::cached(42, false));
//! while let Some(response) = responses.next().await {
//!     if let Some(profile) = response.value() {
//!         assert_eq!(profile, "profile-42");
//!         break;
//!     }
//! }
//! # }
//! ```

use std::fmt::Debug;
use std::hash::Hash;

mod barrier;
mod bookkeeping;
mod cache;
mod conflict;
mod controller;
mod convert;
mod error;
mod fetcher;
mod keys;
mod response;
mod source_of_truth;
mod store;
mod updater;
mod write;

pub use bookkeeping::{Bookkeeper, InMemoryBookkeeper};
pub use cache::CachePolicy;
pub use convert::{Converter, FnValidator, IdentityConverter, Validator};
pub use error::{FetcherError, SharedError, SotOperation, StoreError, UpdaterError};
pub use fetcher::{Fetcher, FunctionFetcher};
pub use response::{
    FetcherResult, ReadPolicy, ReadRequest, ReadResponse, ResponseOrigin, WriteRequest,
    WriteResponse,
};
pub use source_of_truth::{InMemorySourceOfTruth, SourceOfTruth};
pub use store::{MutableStore, Store, StoreBuilder};
pub use updater::{OnUpdaterCompletion, Updater, UpdaterResult};

/// Requirements on the opaque key consumers address data by. The engine
/// never inspects key contents.
pub trait StoreKey: Clone + Eq + Hash + Debug + Send + Sync + Unpin + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + Unpin + 'static> StoreKey for T {}

/// Requirements on the network, local and domain value shapes.
pub trait StoreValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> StoreValue for T {}
