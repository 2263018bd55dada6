//! The capability set every node-level CRDT exposes.

use crate::lattice::Lattice;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A lattice a node can mutate locally, read, and gossip as a whole.
///
/// Snapshots travel as the type's own serde representation, so a node can
/// only ever merge a snapshot of its own CRDT type; merging a different
/// variant does not type-check.
pub trait Replicated: Lattice + Serialize + DeserializeOwned + Send + 'static {
    /// What an `add` request carries.
    type Delta: DeserializeOwned;

    /// What a `read` request returns.
    type Output: Serialize;

    fn read(&self) -> Self::Output;

    /// Apply a local update on behalf of `source`, which must be the local
    /// node: counters only ever grow their own slot.
    fn add(&mut self, source: &str, delta: Self::Delta);

    /// Absorb a peer's full snapshot.
    fn merge(&mut self, other: &Self) {
        self.join_assign(other);
    }
}
