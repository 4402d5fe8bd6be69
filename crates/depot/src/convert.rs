// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::StoreError;
use crate::StoreValue;

/// Transforms between the network (`N`), local (`L`) and domain (`V`) shapes
/// of a value.
///
/// Converters are called exactly once per boundary crossing and are expected
/// to be pure and total; a conversion failure surfaces as
/// [`StoreError::Conversion`] on the response stream.
pub trait Converter<N, L, V>: Send + Sync + 'static {
    /// Network shape to the shape handed to the source of truth.
    fn from_network(&self, network: N) -> Result<L, StoreError>;

    /// Domain shape to the shape handed to the source of truth.
    fn from_domain(&self, value: V) -> Result<L, StoreError>;

    /// Stored shape back to the shape consumers observe.
    fn to_domain(&self, local: L) -> Result<V, StoreError>;
}

/// Converter for stores whose three shapes coincide.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityConverter;

impl<T: StoreValue> Converter<T, T, T> for IdentityConverter {
    fn from_network(&self, network: T) -> Result<T, StoreError> {
        Ok(network)
    }

    fn from_domain(&self, value: T) -> Result<T, StoreError> {
        Ok(value)
    }

    fn to_domain(&self, local: T) -> Result<T, StoreError> {
        Ok(local)
    }
}

/// Decides whether a cached or stored value is still acceptable to serve.
/// Origin-fetched values are served without consulting the validator.
///
/// Implementations must be pure and must not block.
pub trait Validator<V>: Send + Sync + 'static {
    fn is_valid(&self, value: &V) -> bool;
}

/// Validator built from a predicate closure.
pub struct FnValidator<F> {
    predicate: F,
}

impl<F> FnValidator<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<V, F> Validator<V> for FnValidator<F>
where
    F: Fn(&V) -> bool + Send + Sync + 'static,
{
    fn is_valid(&self, value: &V) -> bool {
        (self.predicate)(value)
    }
}
