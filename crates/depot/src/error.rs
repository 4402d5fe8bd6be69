// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error cause shared across clones of a response record.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Which source-of-truth operation produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SotOperation {
    Read,
    Write,
}

impl fmt::Display for SotOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SotOperation::Read => write!(f, "read"),
            SotOperation::Write => write!(f, "write"),
        }
    }
}

/// Failure reported by the origin fetcher.
///
/// Errors are records on the read response stream, never terminal for the
/// stream itself, so they must be cheap to clone when multicast to several
/// subscribers.
#[derive(Clone)]
pub enum FetcherError {
    /// The origin call raised an error.
    Exception(SharedError),
    /// The origin reported a plain-text failure.
    Message(String),
    /// An application-defined error payload, recoverable via
    /// [`FetcherError::custom_payload`].
    Custom(Arc<dyn Any + Send + Sync>),
}

impl FetcherError {
    pub fn exception(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        FetcherError::Exception(Arc::from(error.into()))
    }

    pub fn message(message: impl Into<String>) -> Self {
        FetcherError::Message(message.into())
    }

    pub fn custom<E: Send + Sync + 'static>(payload: E) -> Self {
        FetcherError::Custom(Arc::new(payload))
    }

    /// Downcasts a [`FetcherError::Custom`] payload.
    pub fn custom_payload<E: 'static>(&self) -> Option<&E> {
        match self {
            FetcherError::Custom(payload) => payload.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for FetcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherError::Exception(error) => f.debug_tuple("Exception").field(error).finish(),
            FetcherError::Message(message) => f.debug_tuple("Message").field(message).finish(),
            FetcherError::Custom(_) => f.debug_tuple("Custom").field(&"..").finish(),
        }
    }
}

impl fmt::Display for FetcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherError::Exception(error) => write!(f, "{error}"),
            FetcherError::Message(message) => write!(f, "{message}"),
            FetcherError::Custom(_) => write!(f, "custom error payload"),
        }
    }
}

impl std::error::Error for FetcherError {}

impl PartialEq for FetcherError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FetcherError::Exception(a), FetcherError::Exception(b)) => Arc::ptr_eq(a, b),
            (FetcherError::Message(a), FetcherError::Message(b)) => a == b,
            (FetcherError::Custom(a), FetcherError::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Failure reported by the origin updater during a push.
#[derive(Clone, Debug, Error)]
pub enum UpdaterError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Exception(SharedError),
}

impl UpdaterError {
    pub fn exception(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        UpdaterError::Exception(Arc::from(error.into()))
    }

    pub fn message(message: impl Into<String>) -> Self {
        UpdaterError::Message(message.into())
    }
}

impl PartialEq for UpdaterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (UpdaterError::Message(a), UpdaterError::Message(b)) => a == b,
            (UpdaterError::Exception(a), UpdaterError::Exception(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Every failure mode observable through the engine, by layer.
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    #[error("fetcher failed: {0}")]
    Fetcher(FetcherError),
    #[error("source of truth {operation} failed: {source}")]
    SourceOfTruth {
        operation: SotOperation,
        source: SharedError,
    },
    #[error("updater failed: {0}")]
    Updater(UpdaterError),
    #[error("conversion failed: {0}")]
    Conversion(String),
}

impl StoreError {
    pub fn source_of_truth_read(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::SourceOfTruth {
            operation: SotOperation::Read,
            source: Arc::from(error.into()),
        }
    }

    pub fn source_of_truth_write(
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::SourceOfTruth {
            operation: SotOperation::Write,
            source: Arc::from(error.into()),
        }
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        StoreError::Conversion(message.into())
    }

    pub fn is_fetcher(&self) -> bool {
        matches!(self, StoreError::Fetcher(_))
    }
}

impl PartialEq for StoreError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StoreError::Fetcher(a), StoreError::Fetcher(b)) => a == b,
            (
                StoreError::SourceOfTruth {
                    operation: a,
                    source: sa,
                },
                StoreError::SourceOfTruth {
                    operation: b,
                    source: sb,
                },
            ) => a == b && Arc::ptr_eq(sa, sb),
            (StoreError::Updater(a), StoreError::Updater(b)) => a == b,
            (StoreError::Conversion(a), StoreError::Conversion(b)) => a == b,
            _ => false,
        }
    }
}

impl From<FetcherError> for StoreError {
    fn from(error: FetcherError) -> Self {
        StoreError::Fetcher(error)
    }
}

impl From<UpdaterError> for StoreError {
    fn from(error: UpdaterError) -> Self {
        StoreError::Updater(error)
    }
}
