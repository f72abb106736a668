// Copyright 2023 RisingWave Labs
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

//! The backpressure channel between the ingestion path and downstream.
//!
//! A channel is open by default. The consumer side applies and releases
//! pressure through the [`Valve`]; sources block in [`Ingestion::wait`]
//! while the channel is closed. Both transitions are edge-reported: only
//! the call that actually flips the state returns `true`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rill_common::util::StopToken;

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Channel {
    closed: Mutex<bool>,
    reopened: Condvar,
    valve_alive: AtomicBool,
}

/// Creates a backpressure channel; returns the pressure-applying and the
/// waiting half.
pub fn backpressure() -> (Valve, Ingestion) {
    let channel = Arc::new(Channel {
        closed: Mutex::new(false),
        reopened: Condvar::new(),
        valve_alive: AtomicBool::new(true),
    });
    (
        Valve {
            channel: Arc::clone(&channel),
        },
        Ingestion { channel },
    )
}

/// The consumer half: closes and reopens the channel.
#[derive(Debug)]
pub struct Valve {
    channel: Arc<Channel>,
}

impl Valve {
    /// Closes the channel. Returns `true` only on the open-to-closed edge.
    pub fn apply_pressure(&self) -> bool {
        let mut closed = self.channel.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        true
    }

    /// Reopens the channel. Returns `true` only on the closed-to-open edge.
    pub fn release_pressure(&self) -> bool {
        let mut closed = self.channel.closed.lock();
        if !*closed {
            return false;
        }
        *closed = false;
        self.channel.reopened.notify_all();
        true
    }
}

impl Drop for Valve {
    fn drop(&mut self) {
        // Dropping the valve while pressure is applied would strand every
        // waiter; waiters observe it and abort their wait.
        self.channel.valve_alive.store(false, Ordering::Release);
        self.channel.reopened.notify_all();
    }
}

/// The producer half: blocks while the channel is closed.
#[derive(Clone, Debug)]
pub struct Ingestion {
    channel: Arc<Channel>,
}

impl Ingestion {
    /// Returns once the channel is open or `stop` is cancelled.
    /// Cancellation does not require a paired release.
    pub fn wait(&self, stop: &StopToken) {
        let mut closed = self.channel.closed.lock();
        while *closed {
            if stop.is_stop_requested() {
                return;
            }
            if !self.channel.valve_alive.load(Ordering::Acquire) {
                debug_assert!(false, "valve dropped while the channel was closed");
                return;
            }
            self.channel
                .reopened
                .wait_for(&mut closed, WAIT_SLICE);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use rill_common::util::StopSource;

    use super::*;

    #[test]
    fn pressure_transitions_are_edge_reported() {
        let (valve, _ingestion) = backpressure();

        assert!(valve.apply_pressure());
        assert!(!valve.apply_pressure());
        assert!(valve.release_pressure());
        assert!(!valve.release_pressure());
    }

    #[test]
    fn ingestion_proceeds_while_open() {
        let (_valve, ingestion) = backpressure();
        let counter = Arc::new(AtomicU64::new(0));

        let stop = StopSource::new();
        let token = stop.token();
        let thread_counter = Arc::clone(&counter);
        let thread_ingestion = ingestion.clone();
        let handle = std::thread::spawn(move || {
            while !token.is_stop_requested() {
                thread_ingestion.wait(&token);
                thread_counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        std::thread::sleep(Duration::from_millis(100));
        stop.request_stop();
        handle.join().unwrap();
        assert!(counter.load(Ordering::Relaxed) > 100);
    }

    #[test]
    fn ingestion_blocks_under_pressure_until_release() {
        let (valve, ingestion) = backpressure();
        valve.apply_pressure();

        let stop = StopSource::new();
        let token = stop.token();
        let handle = std::thread::spawn(move || {
            let started = std::time::Instant::now();
            ingestion.wait(&token);
            started.elapsed()
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(valve.release_pressure());
        let waited = handle.join().unwrap();
        assert!(waited >= Duration::from_millis(50));
    }

    #[test]
    fn cancellation_unblocks_without_release() {
        let (valve, ingestion) = backpressure();
        valve.apply_pressure();

        let stop = StopSource::new();
        let token = stop.token();
        let handle = std::thread::spawn(move || ingestion.wait(&token));

        std::thread::sleep(Duration::from_millis(50));
        stop.request_stop();
        handle.join().unwrap();
        // Pressure is still applied; release still reports the edge.
        assert!(valve.release_pressure());
    }

    #[test]
    fn concurrent_valve_flips_keep_channels_functional() {
        let channels: Vec<_> = (0..8).map(|_| backpressure()).collect();
        let stop = StopSource::new();

        let mut handles = vec![];
        for (index, (valve, ingestion)) in channels.into_iter().enumerate() {
            let token = stop.token();
            let waiter_token = stop.token();
            let waits = Arc::new(AtomicU64::new(0));
            let waiter_waits = Arc::clone(&waits);
            let waiter_ingestion = ingestion.clone();
            handles.push(std::thread::spawn(move || {
                while !waiter_token.is_stop_requested() {
                    waiter_ingestion.wait(&waiter_token);
                    waiter_waits.fetch_add(1, Ordering::Relaxed);
                }
            }));
            handles.push(std::thread::spawn(move || {
                use rand::{Rng, SeedableRng};

                let mut rng = rand::rngs::StdRng::seed_from_u64(index as u64);
                while !token.is_stop_requested() {
                    if rng.gen_bool(0.5) {
                        valve.apply_pressure();
                    } else {
                        valve.release_pressure();
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                // Leave the channel open so waiters drain.
                valve.release_pressure();
            }));
        }

        std::thread::sleep(Duration::from_millis(200));
        stop.request_stop();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
