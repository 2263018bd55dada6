//! Grow-only Counter CRDT
//!
//! One slot per contributing replica. A replica only ever increases its own
//! slot, so the join is a pointwise maximum and the value is the sum of all
//! slots.

use crate::lattice::Lattice;
use crate::replicated::Replicated;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter<K: Ord + Clone> {
    slots: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> GCounter<K> {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Grow the slot owned by `replica_id`
    pub fn increment(&mut self, replica_id: K, amount: u64) {
        let slot = self.slots.entry(replica_id).or_insert(0);
        *slot = slot.saturating_add(amount);
    }

    /// Sum of all slots
    pub fn value(&self) -> u64 {
        self.slots.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Contribution recorded for a single replica
    pub fn get(&self, replica_id: &K) -> u64 {
        self.slots.get(replica_id).copied().unwrap_or(0)
    }

    pub fn slots(&self) -> &BTreeMap<K, u64> {
        &self.slots
    }
}

impl<K: Ord + Clone> Default for GCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for GCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        joined.join_assign(other);
        joined
    }

    fn join_assign(&mut self, other: &Self) {
        for (k, v) in &other.slots {
            self.slots
                .entry(k.clone())
                .and_modify(|e| *e = (*e).max(*v))
                .or_insert(*v);
        }
    }
}

impl Replicated for GCounter<String> {
    type Delta = u64;
    type Output = u64;

    fn read(&self) -> u64 {
        self.value()
    }

    fn add(&mut self, source: &str, delta: u64) {
        self.increment(source.to_string(), delta);
    }
}
