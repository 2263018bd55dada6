//! Join-semilattice trait shared by every replicated type.
//!
//! A join-semilattice (S, ⊔) satisfies:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence:   a ⊔ a = a
//!
//! Anti-entropy relies on exactly these three laws: a replica can absorb the
//! same snapshot twice, or two snapshots in either order, and still land on
//! the same state.

use std::cmp::Ordering;

pub trait Lattice: Clone + PartialEq {
    /// The bottom element (identity for join)
    fn bottom() -> Self;

    /// Least upper bound of `self` and `other`
    fn join(&self, other: &Self) -> Self;

    /// In-place join. Types with cheap pointwise merges override this to
    /// avoid rebuilding the whole state.
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// Partial order derived from join:  a ≤ b iff a ⊔ b = b
    fn partial_cmp_lattice(&self, other: &Self) -> Option<Ordering> {
        let joined = self.join(other);
        match (&joined == self, &joined == other) {
            (true, true) => Some(Ordering::Equal),
            (false, true) => Some(Ordering::Less),
            (true, false) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }

    /// Whether every update in `self` is already contained in `other`
    fn leq(&self, other: &Self) -> bool {
        matches!(
            self.partial_cmp_lattice(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }
}
