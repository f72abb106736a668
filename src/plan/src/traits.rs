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

//! Open-world operator annotations.
//!
//! A trait set is a small bag of typed values attached to a logical
//! operator: the inferred output schema, the placement decision, the memory
//! layout choice. Rewrite stages add traits; operators never interpret
//! traits they do not know.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use rill_common::catalog::{MemoryLayoutHint, Schema};
use rill_common::ids::{OriginId, WorkerId};

/// A single typed annotation. `name` doubles as the set key, so there is at
/// most one trait of each type per operator.
pub trait PlanTrait: Send + Sync + std::fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn equals(&self, other: &dyn PlanTrait) -> bool;
}

macro_rules! impl_plan_trait {
    ($type:ident, $name:literal) => {
        impl PlanTrait for $type {
            fn name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn equals(&self, other: &dyn PlanTrait) -> bool {
                other
                    .as_any()
                    .downcast_ref::<$type>()
                    .map_or(false, |o| self == o)
            }
        }
    };
}

/// The inferred output schema of an operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSchemaTrait(pub Schema);
impl_plan_trait!(OutputSchemaTrait, "OutputSchema");

/// The worker node an operator has been assigned to.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacementTrait(pub WorkerId);
impl_plan_trait!(PlacementTrait, "Placement");

/// The origin whose buffers an operator consumes; attached to expanded
/// physical sources.
#[derive(Clone, Debug, PartialEq)]
pub struct OriginTrait(pub OriginId);
impl_plan_trait!(OriginTrait, "Origin");

/// The physical buffer layout selected for an operator's output.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryLayoutTrait(pub MemoryLayoutHint);
impl_plan_trait!(MemoryLayoutTrait, "MemoryLayout");

/// A content hash of the operator's payload and input schema, for
/// plan-sharing lookups.
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureTrait(pub u64);
impl_plan_trait!(SignatureTrait, "Signature");

/// The set of traits attached to one operator.
#[derive(Clone, Debug, Default)]
pub struct TraitSet {
    traits: BTreeMap<&'static str, Arc<dyn PlanTrait>>,
}

impl TraitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `t`, replacing any existing trait of the same type.
    pub fn insert<T: PlanTrait>(&mut self, t: T) {
        self.traits.insert(t.name(), Arc::new(t));
    }

    /// Builder-style [`TraitSet::insert`].
    pub fn with<T: PlanTrait>(mut self, t: T) -> Self {
        self.insert(t);
        self
    }

    pub fn get<T: PlanTrait>(&self) -> Option<&T> {
        self.traits
            .values()
            .find_map(|t| t.as_any().downcast_ref::<T>())
    }

    pub fn contains<T: PlanTrait>(&self) -> bool {
        self.get::<T>().is_some()
    }

    pub fn len(&self) -> usize {
        self.traits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PlanTrait>> {
        self.traits.values()
    }
}

impl PartialEq for TraitSet {
    fn eq(&self, other: &Self) -> bool {
        self.traits.len() == other.traits.len()
            && self.traits.iter().all(|(name, t)| {
                other
                    .traits
                    .get(name)
                    .map_or(false, |o| t.equals(o.as_ref()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_same_typed_trait() {
        let mut set = TraitSet::new();
        set.insert(PlacementTrait(WorkerId::new(1)));
        set.insert(PlacementTrait(WorkerId::new(2)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get::<PlacementTrait>().unwrap().0, WorkerId::new(2));
    }

    #[test]
    fn equality_is_per_type_and_value() {
        let a = TraitSet::new()
            .with(PlacementTrait(WorkerId::new(1)))
            .with(SignatureTrait(42));
        let b = TraitSet::new()
            .with(SignatureTrait(42))
            .with(PlacementTrait(WorkerId::new(1)));
        assert_eq!(a, b);

        let c = TraitSet::new().with(PlacementTrait(WorkerId::new(3)));
        assert_ne!(a, c);
    }

    #[test]
    fn typed_lookup_ignores_other_traits() {
        let set = TraitSet::new().with(OriginTrait(OriginId::new(9)));
        assert!(set.get::<PlacementTrait>().is_none());
        assert_eq!(set.get::<OriginTrait>().unwrap().0, OriginId::new(9));
    }
}
