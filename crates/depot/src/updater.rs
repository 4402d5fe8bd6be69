// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::UpdaterError;
use crate::{StoreKey, StoreValue};

/// Outcome of a single origin push.
#[derive(Debug)]
pub enum UpdaterResult<R> {
    Success(R),
    Error(UpdaterError),
}

/// Callbacks observing every push outcome, including gate replays.
pub struct OnUpdaterCompletion<R> {
    on_success: Arc<dyn Fn(&R) + Send + Sync>,
    on_error: Arc<dyn Fn(&UpdaterError) + Send + Sync>,
}

impl<R> OnUpdaterCompletion<R> {
    pub fn new(
        on_success: impl Fn(&R) + Send + Sync + 'static,
        on_error: impl Fn(&UpdaterError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_success: Arc::new(on_success),
            on_error: Arc::new(on_error),
        }
    }
}

impl<R> Clone for OnUpdaterCompletion<R> {
    fn clone(&self) -> Self {
        Self {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

/// Push outcome with the origin response erased; only success or failure
/// crosses the engine.
pub(crate) enum PushOutcome {
    Success,
    Error(UpdaterError),
}

/// Pushes local writes to the remote origin.
///
/// The origin's response type is consumed by the optional completion
/// callbacks at construction time and never crosses the engine.
pub struct Updater<K, V> {
    name: Option<String>,
    post: Arc<dyn Fn(K, V) -> BoxFuture<'static, PushOutcome> + Send + Sync>,
}

impl<K: StoreKey, V: StoreValue> Updater<K, V> {
    pub fn new<R, F, Fut>(post: F) -> Self
    where
        R: Send + 'static,
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UpdaterResult<R>> + Send + 'static,
    {
        Self::build(post, None)
    }

    pub fn with_completion<R, F, Fut>(post: F, on_completion: OnUpdaterCompletion<R>) -> Self
    where
        R: Send + 'static,
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UpdaterResult<R>> + Send + 'static,
    {
        Self::build(post, Some(on_completion))
    }

    fn build<R, F, Fut>(post: F, on_completion: Option<OnUpdaterCompletion<R>>) -> Self
    where
        R: Send + 'static,
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UpdaterResult<R>> + Send + 'static,
    {
        let post = Arc::new(move |key: K, value: V| {
            let push = post(key, value);
            let on_completion = on_completion.clone();
            async move {
                match push.await {
                    UpdaterResult::Success(response) => {
                        if let Some(callbacks) = &on_completion {
                            (callbacks.on_success)(&response);
                        }
                        PushOutcome::Success
                    }
                    UpdaterResult::Error(error) => {
                        if let Some(callbacks) = &on_completion {
                            (callbacks.on_error)(&error);
                        }
                        PushOutcome::Error(error)
                    }
                }
            }
            .boxed()
        });
        Self { name: None, post }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn post(&self, key: K, value: V) -> BoxFuture<'static, PushOutcome> {
        (self.post)(key, value)
    }
}
