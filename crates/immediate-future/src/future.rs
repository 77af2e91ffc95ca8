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

//! This module contains the implementation of the `ImmediateFuture` state
//! machine. A future holds exactly one of three states: `Empty` after it has
//! been consumed or moved out, `Immediate` when the outcome was already known
//! at construction time, or `Deferred` when it wraps a handle that external
//! code still has to resolve. Chaining off an `Immediate` future runs the
//! continuation synchronously on the caller's stack, with no asynchronous
//! machinery allocated at all.

use crate::deferred::Deferred;
use crate::error::{Error, Try};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin;
use std::task;
use std::time;

/// The active payload of an `ImmediateFuture`. There is no path back to
/// `Empty` other than consumption or move-out, and no path out of it at all.
pub(crate) enum State<T: 'static> {
    Empty,
    Immediate(Try<T>),
    Deferred(Deferred<T>),
}

/// Represents a computation whose result is frequently already available
/// synchronously, but may have to fall back to genuine asynchronous
/// completion. Move-only and single-consumer: every chaining or extraction
/// operation takes the future by value.
#[must_use = "futures do nothing unless you consume or `.await` them"]
pub struct ImmediateFuture<T: 'static> {
    state: State<T>,
}

/// The conversion applied to every continuation result, so a continuation
/// may hand back a plain `Try`, another `ImmediateFuture` or a bare
/// `Deferred` handle. Futures returned by continuations are flattened rather
/// than nested.
pub trait IntoImmediateFuture<T: 'static> {
    /// Converts `self` into an `ImmediateFuture<T>`.
    fn into_immediate_future(self) -> ImmediateFuture<T>;
}

impl<T: 'static> IntoImmediateFuture<T> for ImmediateFuture<T> {
    fn into_immediate_future(self) -> ImmediateFuture<T> {
        self
    }
}

impl<T: 'static> IntoImmediateFuture<T> for Try<T> {
    fn into_immediate_future(self) -> ImmediateFuture<T> {
        ImmediateFuture::from_try(self)
    }
}

impl<T: 'static> IntoImmediateFuture<T> for Deferred<T> {
    fn into_immediate_future(self) -> ImmediateFuture<T> {
        ImmediateFuture::from(self)
    }
}

impl<T: 'static> ImmediateFuture<T> {
    /// Returns an immediate future resolved with the given value.
    pub fn ok(value: T) -> Self {
        Self::from_try(Ok(value))
    }

    /// Returns an immediate future resolved with the given failure.
    pub fn err(error: Error) -> Self {
        Self::from_try(Err(error))
    }

    /// Returns an immediate future holding the given outcome.
    pub fn from_try(outcome: Try<T>) -> Self {
        Self {
            state: State::Immediate(outcome),
        }
    }

    /// Invokes `func` on the caller's stack and converts whatever it hands
    /// back into an `ImmediateFuture`, i.e., the synchronous-computation
    /// wrapper.
    pub fn with<F, R>(func: F) -> Self
    where
        F: FnOnce() -> R,
        R: IntoImmediateFuture<T>,
    {
        func().into_immediate_future()
    }

    /// Moves the active payload out, leaving this instance `Empty`. Any
    /// further operation on the source fails with [`Error::Consumed`].
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    pub(crate) fn into_state(self) -> State<T> {
        self.state
    }

    /// Returns `true` iff the future is immediate. A deferred future always
    /// reports `false`, even when its wrapped handle has since resolved: no
    /// proactive re-check is performed, and aggregation relies on that
    /// pessimism staying put.
    // TODO: report readiness of a resolved deferred handle once `then_try`
    // learns to take the synchronous path on one.
    pub fn is_ready(&self) -> Result<bool, Error> {
        match &self.state {
            State::Immediate(_) => Ok(true),
            State::Deferred(_) => Ok(false),
            State::Empty => Err(Error::Consumed),
        }
    }

    /// Consumes the future and chains `func` over its outcome. On the
    /// immediate path `func` runs synchronously on the caller's stack; on
    /// the deferred path it is registered as a continuation and runs on
    /// whichever thread resolves the handle. Failures are values: they flow
    /// through the chain as the error arm of a `Try` and never unwind.
    pub fn then_try<U, F, R>(self, func: F) -> ImmediateFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(Try<T>) -> R + Send + 'static,
        R: IntoImmediateFuture<U>,
    {
        match self.state {
            State::Immediate(outcome) => func(outcome).into_immediate_future(),
            State::Deferred(handle) => ImmediateFuture::from(handle.defer(func)),
            State::Empty => ImmediateFuture::err(Error::Consumed),
        }
    }

    /// Consumes the future and chains `func` over its value. A pre-existing
    /// failure short-circuits: `func` is not invoked and the failure
    /// propagates unchanged, still with zero scheduling. On the deferred
    /// path the failure check happens when the handle resolves, not eagerly.
    pub fn then_value<U, F, R>(self, func: F) -> ImmediateFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoImmediateFuture<U>,
    {
        match self.state {
            State::Immediate(Err(error)) => ImmediateFuture::err(error),
            state => ImmediateFuture { state }.then_try(move |outcome| match outcome {
                Ok(value) => func(value).into_immediate_future(),
                Err(error) => ImmediateFuture::err(error),
            }),
        }
    }

    /// Consumes the future and runs `func` for its side effect only, passing
    /// the outcome through untouched. Eager for an immediate future,
    /// deferred otherwise.
    pub fn ensure<F>(self, func: F) -> ImmediateFuture<T>
    where
        T: Send,
        F: FnOnce() + Send + 'static,
    {
        self.then_try(move |outcome| {
            func();
            outcome
        })
    }

    /// Consumes the future and returns its outcome, blocking the calling
    /// thread on the deferred path until the handle resolves.
    pub fn get(self) -> Try<T> {
        self.get_try().and_then(|outcome| outcome)
    }

    /// Same as [`get`](Self::get), but the block is bounded by `timeout` on
    /// the deferred path. An immediate future ignores the timeout entirely.
    pub fn get_for(self, timeout: time::Duration) -> Try<T> {
        self.get_try_for(timeout).and_then(|outcome| outcome)
    }

    /// Consumes the future and returns its outcome as a `Try`, leaving a
    /// stored computation failure contained rather than handing it back as
    /// this call's own error. Only [`Error::Consumed`] surfaces here.
    pub fn get_try(self) -> Result<Try<T>, Error> {
        match self.state {
            State::Immediate(outcome) => Ok(outcome),
            State::Deferred(handle) => Ok(handle.wait()),
            State::Empty => Err(Error::Consumed),
        }
    }

    /// Same as [`get_try`](Self::get_try), bounded by `timeout` on the
    /// deferred path. An immediate future ignores the timeout entirely.
    pub fn get_try_for(self, timeout: time::Duration) -> Result<Try<T>, Error> {
        match self.state {
            State::Immediate(outcome) => Ok(outcome),
            State::Deferred(handle) => handle.wait_for(timeout),
            State::Empty => Err(Error::Consumed),
        }
    }

    /// Consumes the future and converts it uniformly into the deferred
    /// handle type; an immediate future is wrapped in an already-resolved
    /// handle. This is the interoperability boundary with call sites that
    /// expect the general asynchronous type.
    pub fn semi(self) -> Result<Deferred<T>, Error> {
        match self.state {
            State::Immediate(outcome) => Ok(Deferred::ready(outcome)),
            State::Deferred(handle) => Ok(handle),
            State::Empty => Err(Error::Consumed),
        }
    }
}

impl<T: 'static> Default for ImmediateFuture<T> {
    /// Returns an `Empty` future, the state a consumed or moved-out instance
    /// is left in.
    fn default() -> Self {
        Self {
            state: State::Empty,
        }
    }
}

impl<T: 'static> From<Try<T>> for ImmediateFuture<T> {
    fn from(outcome: Try<T>) -> Self {
        Self::from_try(outcome)
    }
}

impl<T: 'static> From<Deferred<T>> for ImmediateFuture<T> {
    /// Wraps a deferred handle. An already-resolved handle collapses
    /// directly into an immediate future, which is the performance invariant
    /// the whole design rests on.
    fn from(handle: Deferred<T>) -> Self {
        match handle.take_ready() {
            Ok(outcome) => Self {
                state: State::Immediate(outcome),
            },
            Err(handle) => Self {
                state: State::Deferred(handle),
            },
        }
    }
}

impl<T: 'static> Future for ImmediateFuture<T> {
    type Output = Try<T>;

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        // SAFETY: no field is structurally pinned; the immediate payload is
        // moved out as a whole and the deferred handle is `Unpin`.
        let this = unsafe { self.get_unchecked_mut() };
        match &mut this.state {
            State::Deferred(handle) => pin::Pin::new(handle).poll(cx),
            _ => match mem::replace(&mut this.state, State::Empty) {
                State::Immediate(outcome) => task::Poll::Ready(outcome),
                _ => task::Poll::Ready(Err(Error::Consumed)),
            },
        }
    }
}

impl<T: 'static> fmt::Debug for ImmediateFuture<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Empty => write!(fmt, "ImmediateFuture::Empty")?,
            State::Immediate(_) => write!(fmt, "ImmediateFuture::Immediate")?,
            State::Deferred(_) => write!(fmt, "ImmediateFuture::Deferred")?,
        }
        Ok(())
    }
}
