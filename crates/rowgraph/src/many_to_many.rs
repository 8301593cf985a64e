//! Edge accumulation for many-to-many assembly.

use crate::identity::IdentityKey;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Accumulates `(top, bottom)` edges across an entire input.
///
/// Each edge carries a marker set of the top identities that produced it, so
/// repeated pairs collapse and merging two accumulators is a plain union.
/// Tops and bottoms iterate in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ManyToManyAccumulator {
    edges: IndexMap<IdentityKey, IndexMap<IdentityKey, HashSet<IdentityKey>>>,
}

impl ManyToManyAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge from `top` to `bottom`.
    ///
    /// Returns `true` when the pair was not seen before.
    pub fn add(&mut self, top: &IdentityKey, bottom: &IdentityKey) -> bool {
        let bottoms = self.edges.entry(top.clone()).or_default();
        let fresh = !bottoms.contains_key(bottom);
        bottoms
            .entry(bottom.clone())
            .or_default()
            .insert(top.clone());
        fresh
    }

    /// Union `other` into `self`.
    ///
    /// Marker sets of shared edges are merged; new tops and bottoms keep the
    /// order in which `other` saw them.
    pub fn merge(&mut self, other: ManyToManyAccumulator) {
        for (top, bottoms) in other.edges {
            let mine = self.edges.entry(top).or_default();
            for (bottom, markers) in bottoms {
                mine.entry(bottom).or_default().extend(markers);
            }
        }
    }

    /// Tops with at least one edge, in first-seen order.
    pub fn tops(&self) -> impl Iterator<Item = &IdentityKey> {
        self.edges.keys()
    }

    /// Bottoms of `top` in first-seen order; empty for an unknown top.
    pub fn bottoms<'a>(
        &'a self,
        top: &IdentityKey,
    ) -> impl Iterator<Item = &'a IdentityKey> + use<'a> {
        self.edges.get(top).into_iter().flat_map(IndexMap::keys)
    }

    /// Number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(IndexMap::len).sum()
    }
}
