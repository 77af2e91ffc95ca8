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

//! This file contains a minimal demo of the immediate-future primitive: a
//! simulated blob store where cache hits are served on the synchronous fast
//! path and cache misses are resolved by worker threads, with the whole
//! batch aggregated in input order.

use clap::Parser;
use immediate_future::{collect_all, Deferred, ImmediateFuture};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, author, long_about = None)]
struct Cli {
    #[arg(short = 'n', long, default_value_t = 8, help = "Number of blobs to fetch")]
    count: usize,
    #[arg(
        short = 'd',
        long,
        default_value_t = 20,
        help = "Simulated store latency in milliseconds"
    )]
    delay_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();
    let latency = Duration::from_millis(args.delay_ms);
    let batch = (0..args.count).map(|key| fetch(key, latency)).collect();
    let results = collect_all(batch).get().unwrap();
    for (key, outcome) in results.iter().enumerate() {
        match outcome {
            Ok(blob) => println!("blob {key}: {blob}"),
            Err(error) => println!("blob {key}: failed: {error}"),
        }
    }
}

/// Fetches one blob: even keys are cache hits resolved on the caller's
/// stack, odd keys go to a worker thread standing in for the real store.
fn fetch(key: usize, latency: Duration) -> ImmediateFuture<String> {
    if key % 2 == 0 {
        tracing::debug!(key, "cache hit");
        return ImmediateFuture::ok(format!("cached:{key}"));
    }
    tracing::debug!(key, "cache miss");
    let (handle, resolver) = Deferred::new();
    thread::spawn(move || {
        thread::sleep(latency);
        resolver.resolve(Ok(format!("fetched:{key}")));
    });
    ImmediateFuture::from(handle)
}
