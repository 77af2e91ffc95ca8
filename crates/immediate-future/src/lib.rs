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

//! This crate contains a minimal implementation of a move-only
//! future/promise primitive with a synchronous fast path. A result that is
//! already known when the future is built is stored inline as an
//! `Immediate` payload and every chained continuation runs synchronously on
//! the caller's stack; a result that is genuinely pending is carried by a
//! [`Deferred`] handle resolved by external code, and continuations run on
//! whichever thread resolves it. The crate owns no scheduler, spawns no
//! thread and performs no I/O.

mod collect;
mod deferred;
mod error;
mod future;

pub use crate::collect::collect_all;
pub use crate::deferred::{Deferred, Resolver};
pub use crate::error::{Error, Try};
pub use crate::future::{ImmediateFuture, IntoImmediateFuture};
