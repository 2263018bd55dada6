//! Grow-only Set - elements can only be added, never removed.
//!
//! Doubles as the dedup record of the broadcast engine: a value is relayed
//! the first time `insert` reports it as new, and never again.

use crate::element::Element;
use crate::lattice::Lattice;
use crate::replicated::Replicated;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GSet<T: Ord + Clone> {
    elements: BTreeSet<T>,
}

impl<T: Ord + Clone> GSet<T> {
    pub fn new() -> Self {
        Self {
            elements: BTreeSet::new(),
        }
    }

    /// Add an element. Returns `true` if it was not present before.
    pub fn insert(&mut self, value: T) -> bool {
        self.elements.insert(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.elements.contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: Ord + Clone> Default for GSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> FromIterator<T> for GSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl<T: Ord + Clone> Lattice for GSet<T> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            elements: self.elements.union(&other.elements).cloned().collect(),
        }
    }

    fn join_assign(&mut self, other: &Self) {
        self.elements.extend(other.elements.iter().cloned());
    }
}

impl Replicated for GSet<Element> {
    type Delta = Element;
    type Output = Vec<serde_json::Value>;

    fn read(&self) -> Self::Output {
        self.elements.iter().map(|e| e.as_value().clone()).collect()
    }

    /// Elements carry no owner, so the source is ignored.
    fn add(&mut self, _source: &str, delta: Element) {
        self.elements.insert(delta);
    }
}
