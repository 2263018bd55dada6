//! PN-Counter (Positive-Negative Counter) CRDT
//!
//! A PN-Counter supports both increment and decrement by keeping two
//! grow-only counters: one for increments (P) and one for decrements (N).
//! The value is P - N, and the join merges each half independently.

use crate::gcounter::GCounter;
use crate::lattice::Lattice;
use crate::replicated::Replicated;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter<K: Ord + Clone> {
    /// Per-replica increments
    inc: GCounter<K>,
    /// Per-replica decrements, stored as positive amounts
    dec: GCounter<K>,
}

impl<K: Ord + Clone> PNCounter<K> {
    pub fn new() -> Self {
        Self {
            inc: GCounter::new(),
            dec: GCounter::new(),
        }
    }

    pub fn increment(&mut self, replica_id: K, amount: u64) {
        self.inc.increment(replica_id, amount);
    }

    pub fn decrement(&mut self, replica_id: K, amount: u64) {
        self.dec.increment(replica_id, amount);
    }

    /// Route a signed delta to the matching half. Zero is a no-op.
    pub fn apply(&mut self, replica_id: K, delta: i64) {
        match delta {
            d if d > 0 => self.increment(replica_id, d.unsigned_abs()),
            d if d < 0 => self.decrement(replica_id, d.unsigned_abs()),
            _ => {}
        }
    }

    /// Current value (sum of increments - sum of decrements)
    pub fn value(&self) -> i64 {
        let inc = i128::from(self.inc.value());
        let dec = i128::from(self.dec.value());
        (inc - dec).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    pub fn increments(&self) -> &GCounter<K> {
        &self.inc
    }

    pub fn decrements(&self) -> &GCounter<K> {
        &self.dec
    }
}

impl<K: Ord + Clone> Default for PNCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for PNCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            inc: self.inc.join(&other.inc),
            dec: self.dec.join(&other.dec),
        }
    }

    fn join_assign(&mut self, other: &Self) {
        self.inc.join_assign(&other.inc);
        self.dec.join_assign(&other.dec);
    }
}

impl Replicated for PNCounter<String> {
    type Delta = i64;
    type Output = i64;

    fn read(&self) -> i64 {
        self.value()
    }

    fn add(&mut self, source: &str, delta: i64) {
        self.apply(source.to_string(), delta);
    }
}
