// Copyright 2024 Shingo OKAWA and a number of other contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! This module contains the single error kind shared across every
//! instantiation of the future types, together with the `Try` container that
//! carries a computation outcome through chains and aggregations.

use std::sync::Arc;
use std::time::Duration;

/// The value-or-error outcome of a computation. Failures travel through
/// chaining operations as ordinary `Err` values; only the extraction
/// operations hand them back to the caller.
pub type Try<T> = Result<T, Error>;

/// The error kind shared by all futures, defined once rather than duplicated
/// per instantiation. `Clone` so a stored failure can propagate through
/// short-circuits and aggregation scatter without being consumed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// An operation was invoked on a future after it had been consumed or
    /// moved out.
    #[error("immediate future used after it was consumed")]
    Consumed,
    /// A bounded blocking extraction on a deferred future expired before the
    /// handle resolved.
    #[error("timed out after {0:?} waiting for a deferred completion")]
    Timeout(Duration),
    /// The resolver half of a deferred handle was dropped without ever
    /// resolving it.
    #[error("deferred handle was dropped before completion")]
    BrokenResolver,
    /// A computation failure captured as data.
    #[error(transparent)]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Captures an arbitrary computation failure as the error arm of a `Try`.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }
}
