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

//! The worker topology the placement solver runs against.
//!
//! Workers form a directed graph. An edge points from a node to one of its
//! *upstream* neighbors, i.e. towards the source-hosting edge of the
//! deployment; data flows against these edges, from sources to sinks.

use std::collections::{BTreeMap, VecDeque};

use fixedbitset::FixedBitSet;
use rill_common::ids::WorkerId;

#[derive(Clone, Debug)]
struct NodeInfo {
    capacity: usize,
    upstream: Vec<WorkerId>,
}

/// A directed graph of worker nodes with capacities.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    nodes: BTreeMap<WorkerId, NodeInfo>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, worker: WorkerId, capacity: usize) {
        self.nodes.entry(worker).or_insert(NodeInfo {
            capacity,
            upstream: vec![],
        });
    }

    /// Declares `upstream` reachable from `node` in upstream direction.
    /// Both nodes must have been added.
    pub fn add_link(&mut self, node: WorkerId, upstream: WorkerId) {
        debug_assert!(self.nodes.contains_key(&upstream));
        if let Some(info) = self.nodes.get_mut(&node) {
            info.upstream.push(upstream);
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self, worker: WorkerId) -> usize {
        self.nodes.get(&worker).map_or(0, |info| info.capacity)
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.nodes.contains_key(&worker)
    }

    /// The length of the shortest upstream path from `from` to `to`;
    /// `Some(0)` when they are the same node, `None` when unreachable.
    pub fn upstream_distance(&self, from: WorkerId, to: WorkerId) -> Option<usize> {
        if from == to {
            return self.nodes.contains_key(&from).then_some(0);
        }
        let index: BTreeMap<WorkerId, usize> = self
            .nodes
            .keys()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let mut visited = FixedBitSet::with_capacity(self.nodes.len());
        let mut queue = VecDeque::new();
        visited.insert(*index.get(&from)?);
        queue.push_back((from, 0usize));
        while let Some((node, distance)) = queue.pop_front() {
            for neighbor in &self.nodes[&node].upstream {
                if *neighbor == to {
                    return Some(distance + 1);
                }
                let i = index[neighbor];
                if !visited.contains(i) {
                    visited.insert(i);
                    queue.push_back((*neighbor, distance + 1));
                }
            }
        }
        None
    }

    pub fn has_upstream_path(&self, from: WorkerId, to: WorkerId) -> bool {
        self.upstream_distance(from, to).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// sink node 1 <- 2 <- {3, 4} (3 and 4 are the source edge)
    fn diamond() -> Topology {
        let mut topology = Topology::new();
        for id in 1..=4 {
            topology.add_node(WorkerId::new(id), 4);
        }
        topology.add_link(WorkerId::new(1), WorkerId::new(2));
        topology.add_link(WorkerId::new(2), WorkerId::new(3));
        topology.add_link(WorkerId::new(2), WorkerId::new(4));
        topology
    }

    #[test]
    fn distances_follow_upstream_edges() {
        let topology = diamond();
        assert_eq!(
            topology.upstream_distance(WorkerId::new(1), WorkerId::new(3)),
            Some(2)
        );
        assert_eq!(
            topology.upstream_distance(WorkerId::new(2), WorkerId::new(4)),
            Some(1)
        );
        assert_eq!(
            topology.upstream_distance(WorkerId::new(3), WorkerId::new(3)),
            Some(0)
        );
        // Edges are directed: the source edge cannot reach the sink node.
        assert_eq!(
            topology.upstream_distance(WorkerId::new(3), WorkerId::new(1)),
            None
        );
    }

    #[test]
    fn disconnected_nodes_have_no_path() {
        let mut topology = diamond();
        topology.add_node(WorkerId::new(9), 1);
        assert!(!topology.has_upstream_path(WorkerId::new(1), WorkerId::new(9)));
    }
}
