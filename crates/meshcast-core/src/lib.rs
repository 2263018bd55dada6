//! Convergent replicated data types for meshcast nodes.
//!
//! Every type here is a join-semilattice: replicas exchange full state and
//! merge it with [`Lattice::join`], so duplicated, reordered or late
//! deliveries all settle on the same value.

pub mod element;
pub mod gcounter;
pub mod gset;
pub mod lattice;
pub mod pncounter;
pub mod replicated;

pub use element::Element;
pub use gcounter::GCounter;
pub use gset::GSet;
pub use lattice::Lattice;
pub use pncounter::PNCounter;
pub use replicated::Replicated;
