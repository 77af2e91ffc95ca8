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

//! This module contains the order-preserving aggregation over
//! `ImmediateFuture`s. Immediate inputs are extracted in a single pass with
//! zero scheduling; deferred inputs are combined into one joint wait and
//! scattered back into their original slots once every handle has resolved.

use crate::deferred::{Deferred, Resolver};
use crate::error::{Error, Try};
use crate::future::{ImmediateFuture, State};
use std::mem;
use std::sync::{Arc, Mutex};

const POISONED: &str = "`MutexGuard` of the joint wait state should be locked properly";

/// The book-keeping of a joint wait: one slot per handle, the number of
/// handles still pending and the resolver of the combined handle.
struct Gather<T: 'static> {
    slots: Vec<Option<Try<T>>>,
    remaining: usize,
    resolver: Option<Resolver<Vec<Try<T>>>>,
}

/// Combines many deferred handles into a single handle resolving to their
/// outcomes, in input order, once all of them have resolved. No thread is
/// spawned: the last handle to resolve completes the joint wait on its own
/// resolving thread.
fn join_all<T>(handles: Vec<Deferred<T>>) -> Deferred<Vec<Try<T>>>
where
    T: Send + 'static,
{
    if handles.is_empty() {
        return Deferred::ready(Ok(Vec::new()));
    }
    let (joined, resolver) = Deferred::new();
    let gather = Arc::new(Mutex::new(Gather {
        slots: (0..handles.len()).map(|_| None).collect(),
        remaining: handles.len(),
        resolver: Some(resolver),
    }));
    for (index, handle) in handles.into_iter().enumerate() {
        let gather = Arc::clone(&gather);
        handle.on_complete(move |outcome| {
            let mut state = gather.lock().expect(POISONED);
            state.slots[index] = Some(outcome);
            state.remaining -= 1;
            if state.remaining == 0 {
                let slots = mem::take(&mut state.slots);
                let resolver = state.resolver.take().expect("joint wait resolved twice");
                drop(state);
                resolver.resolve(Ok(slots
                    .into_iter()
                    .map(|slot| slot.expect("joint wait slot left unfilled"))
                    .collect()));
            }
        });
    }
    joined
}

/// Aggregates an ordered sequence of futures into one future producing the
/// sequence of their outcomes, index-aligned with the input. Failed entries
/// are stored as error entries, never treated as abort signals. When every
/// input is immediate, so is the aggregate, with zero scheduling overhead;
/// deferred inputs always go through the joint wait, even if their handle
/// has raced to completion in the meantime.
pub fn collect_all<T>(futures: Vec<ImmediateFuture<T>>) -> ImmediateFuture<Vec<Try<T>>>
where
    T: Send + 'static,
{
    let total = futures.len();
    let mut slots: Vec<Option<Try<T>>> = Vec::with_capacity(total);
    let mut handles = Vec::new();
    let mut indices = Vec::new();
    for (index, future) in futures.into_iter().enumerate() {
        match future.into_state() {
            State::Immediate(outcome) => slots.push(Some(outcome)),
            State::Deferred(handle) => {
                handles.push(handle);
                indices.push(index);
                slots.push(None);
            }
            State::Empty => slots.push(Some(Err(Error::Consumed))),
        }
    }
    tracing::debug!(total, deferred = handles.len(), "aggregating futures");

    if handles.is_empty() {
        let results = slots
            .into_iter()
            .map(|slot| slot.expect("immediate aggregation slot left unfilled"))
            .collect();
        return ImmediateFuture::ok(results);
    }

    ImmediateFuture::from(join_all(handles).defer(move |joined| {
        let mut slots = slots;
        match joined {
            Ok(resolved) => {
                for (offset, outcome) in resolved.into_iter().enumerate() {
                    slots[indices[offset]] = Some(outcome);
                }
            }
            Err(error) => {
                for index in &indices {
                    slots[*index] = Some(Err(error.clone()));
                }
            }
        }
        let results: Try<Vec<Try<T>>> = Ok(slots
            .into_iter()
            .map(|slot| slot.expect("aggregation slot left unfilled"))
            .collect());
        results
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn an_empty_input_collapses_to_an_immediate_empty_sequence() {
        let aggregate = collect_all(Vec::<ImmediateFuture<i32>>::new());
        assert!(aggregate.is_ready().unwrap());
        assert!(aggregate.get().unwrap().is_empty());
    }

    #[test]
    fn all_immediate_inputs_collapse_without_scheduling() {
        let aggregate = collect_all(vec![
            ImmediateFuture::ok(1),
            ImmediateFuture::err(Error::failed(std::fmt::Error)),
            ImmediateFuture::ok(3),
        ]);
        assert!(aggregate.is_ready().unwrap());
        let results = aggregate.get().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(matches!(results[1], Err(Error::Failed(_))));
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[test]
    fn outcomes_stay_index_aligned_across_resolution_order() {
        let (first, first_resolver) = Deferred::new();
        let (second, second_resolver) = Deferred::new();
        let aggregate = collect_all(vec![
            ImmediateFuture::from(first),
            ImmediateFuture::ok(10),
            ImmediateFuture::from(second),
        ]);
        assert!(!aggregate.is_ready().unwrap());
        // Resolve in reverse input order to exercise the scatter step.
        let worker = thread::spawn(move || {
            second_resolver.resolve(Ok(30));
            thread::sleep(Duration::from_millis(5));
            first_resolver.resolve(Err(Error::failed(std::fmt::Error)));
        });
        let results = aggregate.get().unwrap();
        assert!(matches!(results[0], Err(Error::Failed(_))));
        assert_eq!(*results[1].as_ref().unwrap(), 10);
        assert_eq!(*results[2].as_ref().unwrap(), 30);
        worker.join().unwrap();
    }

    #[test]
    fn a_consumed_input_contributes_an_error_entry() {
        let mut consumed = ImmediateFuture::ok(1);
        let _ = consumed.take();
        let results = collect_all(vec![consumed, ImmediateFuture::ok(2)])
            .get()
            .unwrap();
        assert!(matches!(results[0], Err(Error::Consumed)));
        assert_eq!(*results[1].as_ref().unwrap(), 2);
    }

    #[test]
    fn deferred_inputs_take_the_joint_wait_even_after_racing_to_completion() {
        let (handle, resolver) = Deferred::new();
        let future = ImmediateFuture::from(handle);
        resolver.resolve(Ok(5));
        // The handle resolved after the wrap, so the future still reports
        // itself deferred and the aggregation must not collapse eagerly.
        assert!(!future.is_ready().unwrap());
        let aggregate = collect_all(vec![future]);
        assert_eq!(*aggregate.get().unwrap()[0].as_ref().unwrap(), 5);
    }

    #[test]
    fn a_broken_resolver_contributes_an_error_entry() {
        let (handle, resolver) = Deferred::<i32>::new();
        drop(resolver);
        let (pending, pending_resolver) = Deferred::new();
        let aggregate = collect_all(vec![
            ImmediateFuture::from(handle),
            ImmediateFuture::from(pending),
        ]);
        pending_resolver.resolve(Ok(2));
        let results = aggregate.get().unwrap();
        assert!(matches!(results[0], Err(Error::BrokenResolver)));
        assert_eq!(*results[1].as_ref().unwrap(), 2);
    }
}
