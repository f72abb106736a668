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

//! Strongly typed identifiers.
//!
//! Every id is a distinct newtype over `u64` so that a `QueryId` can never be
//! confused with an `OperatorId` at a call site. `INVALID` (zero) is the
//! uninitialized sentinel; sequence-like ids additionally expose `INITIAL`,
//! the first valid value handed out.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! def_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// The uninitialized sentinel.
            pub const INVALID: Self = Self(0);
            /// The first valid value.
            pub const INITIAL: Self = Self(1);

            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(&self) -> u64 {
                self.0
            }

            pub fn is_valid(&self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

def_id!(
    /// Identifies a query across the whole deployment.
    QueryId
);
def_id!(
    /// Identifies a query shared between multiple submitted queries.
    SharedQueryId
);
def_id!(
    /// Identifies a query on a single worker.
    LocalQueryId
);
def_id!(
    /// Identifies an operator within a logical plan.
    OperatorId
);
def_id!(
    /// Identifies a logical stream of buffers with contiguous sequence numbers.
    OriginId
);
def_id!(
    /// Identifies a worker node in the topology.
    WorkerId
);
def_id!(
    /// Identifies an execution thread within one worker process.
    WorkerThreadId
);
def_id!(
    /// Position of a buffer within its origin stream, starting at 1.
    SequenceNumber
);
def_id!(
    /// Position of a chunk within one oversized logical buffer.
    ChunkNumber
);
def_id!(
    /// Identifies a compiled pipeline on a worker.
    PipelineId
);
def_id!(
    /// Identifies one registered physical source.
    PhysicalSourceId
);

impl SequenceNumber {
    /// The sequence number following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl OperatorId {
    /// Hands out a process-wide unique operator id. Plan construction is the
    /// only caller; rewrites keep the ids of the operators they preserve.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl OriginId {
    /// Hands out a process-wide unique origin id.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl PipelineId {
    /// Hands out a process-wide unique pipeline id.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_and_initial_sentinels() {
        assert!(!QueryId::INVALID.is_valid());
        assert!(QueryId::INITIAL.is_valid());
        assert_eq!(SequenceNumber::INITIAL.raw(), 1);
        assert_eq!(SequenceNumber::INITIAL.next().raw(), 2);
    }

    #[test]
    fn generated_operator_ids_are_unique() {
        let a = OperatorId::generate();
        let b = OperatorId::generate();
        assert_ne!(a, b);
        assert!(a.is_valid() && b.is_valid());
    }
}
