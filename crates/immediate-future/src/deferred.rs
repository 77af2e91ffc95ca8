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

//! This module contains the implementation of a `Deferred` handle, i.e., the
//! asynchronous half of an `ImmediateFuture`. The handle itself owns no
//! scheduler and spawns no thread: it is resolved by whatever external code
//! holds the paired `Resolver`, and it offers exactly the contract the
//! immediate layer needs, which is a readiness query, a single-consumer
//! continuation registration and a blocking extraction bounded by an
//! optional timeout.

use crate::error::{Error, Try};
use crate::future::IntoImmediateFuture;
use std::future::Future;
use std::mem;
use std::pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task;
use std::time;

const POISONED: &str = "`MutexGuard` of the deferred shared state should be locked properly";
const TAKEN: &str = "deferred outcome already taken";

/// A continuation registered to run once the handle resolves, on whichever
/// thread resolves it.
type Callback<T> = Box<dyn FnOnce(Try<T>) + Send>;

/// The state guarded by the shared mutex. A handle is either still pending,
/// possibly with a registered continuation or task waker, or complete with
/// an outcome that has not been taken yet.
enum Inner<T: 'static> {
    Pending {
        callback: Option<Callback<T>>,
        waker: Option<task::Waker>,
    },
    Complete(Option<Try<T>>),
}

/// The state shared between a `Deferred` and its `Resolver`. The condition
/// variable carries the wake-up for blocking extraction.
struct Shared<T: 'static> {
    inner: Mutex<Inner<T>>,
    resolved: Condvar,
}

impl<T: 'static> Shared<T> {
    /// Completes the handle with the given outcome. The registered
    /// continuation, if any, is invoked outside the lock; blocking waiters
    /// and task wakers are woken otherwise.
    fn complete(&self, outcome: Try<T>) {
        let mut inner = self.inner.lock().expect(POISONED);
        match mem::replace(&mut *inner, Inner::Complete(None)) {
            Inner::Complete(slot) => {
                // Already resolved; put the stored outcome back untouched.
                *inner = Inner::Complete(slot);
            }
            Inner::Pending {
                callback: Some(callback),
                waker,
            } => {
                drop(inner);
                tracing::trace!("deferred handle resolved into a continuation");
                callback(outcome);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            Inner::Pending {
                callback: None,
                waker,
            } => {
                *inner = Inner::Complete(Some(outcome));
                self.resolved.notify_all();
                drop(inner);
                tracing::trace!("deferred handle resolved");
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
    }
}

/// Represents an asynchronous computation that has not necessarily completed
/// yet. Single-consumer and move-only: registering a continuation, blocking
/// or polling all consume the handle.
pub struct Deferred<T: 'static> {
    shared: Arc<Shared<T>>,
}

/// The producing half of a `Deferred` handle, handed to whatever executor or
/// thread performs the actual work.
pub struct Resolver<T: 'static> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: 'static> Deferred<T> {
    /// Returns a pending handle together with the resolver that completes it.
    pub fn new() -> (Deferred<T>, Resolver<T>) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::Pending {
                callback: None,
                waker: None,
            }),
            resolved: Condvar::new(),
        });
        (
            Deferred {
                shared: Arc::clone(&shared),
            },
            Resolver {
                shared: Some(shared),
            },
        )
    }

    /// Returns a handle that is already resolved with the given outcome.
    pub fn ready(outcome: Try<T>) -> Deferred<T> {
        Deferred {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::Complete(Some(outcome))),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Returns `true` iff the handle has been resolved.
    pub fn is_ready(&self) -> bool {
        matches!(
            &*self.shared.inner.lock().expect(POISONED),
            Inner::Complete(_)
        )
    }

    /// Takes the outcome out of an already-resolved handle, or hands the
    /// handle back when it is still pending. This is what lets the immediate
    /// layer collapse a resolved handle at construction time.
    pub(crate) fn take_ready(self) -> Result<Try<T>, Deferred<T>> {
        {
            let mut inner = self.shared.inner.lock().expect(POISONED);
            if let Inner::Complete(outcome) = &mut *inner {
                return Ok(outcome.take().expect(TAKEN));
            }
        }
        Err(self)
    }

    /// Registers the continuation to run on resolution, or runs it right away
    /// on the caller's stack when the handle has already been resolved.
    pub(crate) fn on_complete(self, callback: impl FnOnce(Try<T>) + Send + 'static) {
        let mut inner = self.shared.inner.lock().expect(POISONED);
        match &mut *inner {
            Inner::Pending { callback: slot, .. } => {
                *slot = Some(Box::new(callback));
            }
            Inner::Complete(outcome) => {
                let outcome = outcome.take().expect(TAKEN);
                drop(inner);
                callback(outcome);
            }
        }
    }

    /// Registers `func` as the continuation of this handle and returns the
    /// handle of its result. A continuation returning a deferred
    /// `ImmediateFuture` is flattened, so the produced handle is never a
    /// future-of-future.
    pub fn defer<U, F, R>(self, func: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(Try<T>) -> R + Send + 'static,
        R: IntoImmediateFuture<U>,
    {
        let (next, resolver) = Deferred::new();
        self.on_complete(move |outcome| {
            match func(outcome).into_immediate_future().semi() {
                Ok(deferred) => deferred.on_complete(move |next_outcome| {
                    resolver.resolve(next_outcome);
                }),
                // The continuation handed back a consumed future.
                Err(error) => resolver.resolve(Err(error)),
            }
        });
        next
    }

    /// Blocks the calling thread until the handle resolves and returns the
    /// outcome.
    pub fn wait(self) -> Try<T> {
        let mut inner = self.shared.inner.lock().expect(POISONED);
        loop {
            if let Inner::Complete(outcome) = &mut *inner {
                return outcome.take().expect(TAKEN);
            }
            inner = self.shared.resolved.wait(inner).expect(POISONED);
        }
    }

    /// Blocks the calling thread until the handle resolves, for at most
    /// `timeout`. Fails with [`Error::Timeout`] when the bound expires first;
    /// the handle is consumed either way.
    pub fn wait_for(self, timeout: time::Duration) -> Result<Try<T>, Error> {
        let deadline = time::Instant::now() + timeout;
        let mut inner = self.shared.inner.lock().expect(POISONED);
        loop {
            if let Inner::Complete(outcome) = &mut *inner {
                return Ok(outcome.take().expect(TAKEN));
            }
            let now = time::Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(timeout));
            }
            inner = self
                .shared
                .resolved
                .wait_timeout(inner, deadline - now)
                .expect(POISONED)
                .0;
        }
    }
}

impl<T: 'static> Resolver<T> {
    /// Completes the paired handle with the given outcome. The registered
    /// continuation, if any, runs on the calling thread.
    pub fn resolve(mut self, outcome: Try<T>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(outcome);
        }
    }
}

impl<T: 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            tracing::warn!("deferred handle dropped before completion");
            shared.complete(Err(Error::BrokenResolver));
        }
    }
}

impl<T: 'static> Future for Deferred<T> {
    type Output = Try<T>;

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let mut inner = self.shared.inner.lock().expect(POISONED);
        match &mut *inner {
            Inner::Complete(outcome) => {
                task::Poll::Ready(outcome.take().expect("polled `Deferred` after completion"))
            }
            Inner::Pending { waker, .. } => {
                *waker = Some(cx.waker().clone());
                task::Poll::Pending
            }
        }
    }
}

impl<T: 'static> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ready() {
            write!(fmt, "Deferred::Complete")?;
        } else {
            write!(fmt, "Deferred::Pending")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn ready_handle_reports_readiness() {
        let handle = Deferred::ready(Ok(1));
        assert!(handle.is_ready());
        assert_eq!(handle.wait().unwrap(), 1);
    }

    #[test]
    fn wait_blocks_until_resolution() {
        let (handle, resolver) = Deferred::new();
        assert!(!handle.is_ready());
        let worker = thread::spawn(move || {
            thread::sleep(time::Duration::from_millis(10));
            resolver.resolve(Ok("done"));
        });
        assert_eq!(handle.wait().unwrap(), "done");
        worker.join().unwrap();
    }

    #[test]
    fn wait_for_times_out_on_an_unresolved_handle() {
        let (handle, resolver) = Deferred::<i32>::new();
        let error = handle
            .wait_for(time::Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
        drop(resolver);
    }

    #[test]
    fn dropping_the_resolver_breaks_the_handle() {
        let (handle, resolver) = Deferred::<i32>::new();
        drop(resolver);
        assert!(handle.is_ready());
        assert!(matches!(handle.wait(), Err(Error::BrokenResolver)));
    }

    #[test]
    fn continuation_runs_on_the_resolving_thread() {
        let (handle, resolver) = Deferred::new();
        let chained = handle.defer(|outcome: Try<i32>| outcome.map(|value| value * 2));
        let worker = thread::spawn(move || resolver.resolve(Ok(21)));
        assert_eq!(chained.wait().unwrap(), 42);
        worker.join().unwrap();
    }

    #[test]
    fn continuation_on_a_resolved_handle_runs_synchronously() {
        let chained = Deferred::ready(Ok(1)).defer(|outcome: Try<i32>| outcome.map(|value| value + 1));
        assert!(chained.is_ready());
        assert_eq!(chained.wait().unwrap(), 2);
    }

    #[test]
    fn handle_can_be_polled_as_a_future() {
        let (handle, resolver) = Deferred::new();
        let worker = thread::spawn(move || {
            thread::sleep(time::Duration::from_millis(10));
            resolver.resolve(Ok(7));
        });
        assert_eq!(futures::executor::block_on(handle).unwrap(), 7);
        worker.join().unwrap();
    }
}
