//! Assembly stage: turns grouped fragments into entity graphs.
//!
//! Two strategies exist, chosen once when the graph is built:
//!
//! - `OneToEtc` folds each root group independently. Children are looked up
//!   by `(branch, owner identity)` inside the group, so the same child
//!   identity under two different roots yields two independent objects.
//! - `ManyToMany` first scans every group, recording `(root, bottom)` edges of
//!   each root-level collection in a [`ManyToManyAccumulator`] and merging
//!   bottom payloads and their subtrees across groups. Roots are then built
//!   and receive their accumulated bottoms in first-seen order.
//!
//! Either way, objects are only built when the [`Materialized`] iterator is
//! advanced.

use crate::extract::{BranchId, Round, SubGraph};
use crate::graph::RelationGraph;
use crate::group::{GroupedState, RootGroup};
use crate::identity::IdentityKey;
use crate::many_to_many::ManyToManyAccumulator;
use indexmap::IndexMap;
use indexmap::map::Entry;
use rowgraph_core::{AnyEntity, DynSchema, Error, Result};
use std::collections::HashMap;
use std::marker::PhantomData;

/// How fragments become objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyStrategy {
    /// One-to-one and one-to-many: each root group is folded on its own.
    OneToEtc,
    /// Root-level collections in `edges` are accumulated over the whole input.
    ManyToMany {
        /// Root-level plural branches treated as edge sets
        edges: Vec<BranchId>,
    },
}

/// Child fragments by `(branch, owner identity)`, deduplicated by child identity.
type ChildIndex = HashMap<(BranchId, IdentityKey), IndexMap<IdentityKey, Round>>;

fn index_fragment(index: &mut ChildIndex, fragment: Round) {
    let (Some(branch), Some(parent)) = (fragment.branch(), fragment.parent()) else {
        return;
    };
    let children = index.entry((branch, parent.clone())).or_default();
    match children.entry(fragment.key().clone()) {
        Entry::Occupied(mut existing) => existing.get_mut().absorb(&fragment),
        Entry::Vacant(slot) => {
            slot.insert(fragment);
        }
    }
}

/// Whole-input state of a many-to-many assembly.
#[derive(Debug, Default)]
struct SharedIndex {
    edges: Vec<(BranchId, ManyToManyAccumulator)>,
    bottoms: HashMap<(BranchId, IdentityKey), Round>,
    children: ChildIndex,
}

impl SharedIndex {
    /// Phase one: drain every group's fragments into edges, bottoms and the
    /// global child index. Each root's edges are gathered on their own and
    /// merged into the shared accumulators. Groups keep only their root
    /// fragment.
    fn collect(edges: &[BranchId], groups: &mut [RootGroup]) -> Self {
        let mut shared = SharedIndex {
            edges: edges
                .iter()
                .map(|&id| (id, ManyToManyAccumulator::new()))
                .collect(),
            ..SharedIndex::default()
        };
        for group in groups.iter_mut() {
            let top = group.root.key().clone();
            let mut local = vec![ManyToManyAccumulator::new(); shared.edges.len()];
            for fragment in std::mem::take(&mut group.fragments) {
                let slot = fragment
                    .branch()
                    .and_then(|b| shared.edges.iter().position(|(id, _)| *id == b));
                let Some(slot) = slot else {
                    index_fragment(&mut shared.children, fragment);
                    continue;
                };
                local[slot].add(&top, fragment.key());
                let bottom = (shared.edges[slot].0, fragment.key().clone());
                match shared.bottoms.get_mut(&bottom) {
                    Some(existing) => existing.absorb(&fragment),
                    None => {
                        shared.bottoms.insert(bottom, fragment);
                    }
                }
            }
            for ((_, accumulator), edges) in shared.edges.iter_mut().zip(local) {
                accumulator.merge(edges);
            }
        }
        tracing::debug!(
            roots = groups.len(),
            linked = shared
                .edges
                .iter()
                .map(|(_, a)| a.tops().count())
                .sum::<usize>(),
            edges = shared.edges.iter().map(|(_, a)| a.edge_count()).sum::<usize>(),
            bottoms = shared.bottoms.len(),
            "Many-to-many edges accumulated"
        );
        shared
    }

    fn accumulator(&self, branch: BranchId) -> Option<&ManyToManyAccumulator> {
        self.edges
            .iter()
            .find(|(id, _)| *id == branch)
            .map(|(_, acc)| acc)
    }
}

/// Recursive object builder over one lookup scope.
struct Assembler<'a> {
    graph: &'a RelationGraph,
    local: &'a ChildIndex,
    shared: Option<&'a SharedIndex>,
}

impl<'a> Assembler<'a> {
    fn children(&self, branch: &SubGraph, owner: &IdentityKey) -> Vec<&'a Round> {
        if let Some(shared) = self.shared {
            if let Some(accumulator) = shared.accumulator(branch.id()) {
                return accumulator
                    .bottoms(owner)
                    .filter_map(|bottom| shared.bottoms.get(&(branch.id(), bottom.clone())))
                    .collect();
            }
        }
        let index = match self.shared {
            Some(shared) => &shared.children,
            None => self.local,
        };
        index
            .get(&(branch.id(), owner.clone()))
            .map(|children| children.values().collect())
            .unwrap_or_default()
    }

    /// Construct and populate the entity for `round`, then attach its
    /// children recursively.
    fn build(
        &self,
        branch: Option<&SubGraph>,
        round: &Round,
        owner: Option<&IdentityKey>,
    ) -> Result<AnyEntity> {
        let schema: &DynSchema = match branch {
            Some(b) => b.extractor.schema(),
            None => self.graph.root_schema(),
        };
        let mut instance = schema.construct()?;
        for (field, value) in round.payload() {
            schema.populate(&mut *instance, field, value)?;
        }
        if let (Some(branch), Some(owner)) = (branch, owner) {
            if let Some(field) = &branch.back_reference {
                schema.populate(&mut *instance, field, &owner.as_value())?;
            }
        }

        for child in self.graph.children_of(branch.map(SubGraph::id)) {
            let fragments = self.children(child, round.key());
            if child.is_plural() {
                for fragment in fragments {
                    let built = self.build(Some(child), fragment, Some(round.key()))?;
                    schema.relate(&mut *instance, child.name(), built, child.entity())?;
                }
                continue;
            }
            let Some((first, rest)) = fragments.split_first() else {
                continue;
            };
            if let Some(conflict) = rest.iter().find(|f| f.key() != first.key()) {
                tracing::warn!(
                    owner = %round.key(),
                    branch = child.name(),
                    kept = %first.key(),
                    ignored = %conflict.key(),
                    "Conflicting identities for single-valued relation; keeping the first"
                );
            }
            let built = self.build(Some(child), first, Some(round.key()))?;
            schema.relate(&mut *instance, child.name(), built, child.entity())?;
        }
        Ok(instance)
    }
}

/// Lazily materialized roots, in discovery order.
///
/// Each call to `next` builds one root and its subtree. After an error is
/// yielded the iterator is exhausted.
pub struct Materialized<'g, T> {
    graph: &'g RelationGraph,
    groups: std::vec::IntoIter<RootGroup>,
    shared: Option<SharedIndex>,
    failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'g, T: 'static> Materialized<'g, T> {
    pub(crate) fn new(graph: &'g RelationGraph, state: GroupedState) -> Self {
        let mut groups = state.into_groups();
        let shared = match graph.strategy() {
            AssemblyStrategy::OneToEtc => None,
            AssemblyStrategy::ManyToMany { edges } => {
                Some(SharedIndex::collect(edges, &mut groups))
            }
        };
        Self {
            graph,
            groups: groups.into_iter(),
            shared,
            failed: false,
            _marker: PhantomData,
        }
    }

    /// Roots not yet materialized.
    pub fn remaining(&self) -> usize {
        if self.failed { 0 } else { self.groups.len() }
    }

    fn assemble(&self, group: RootGroup) -> Result<T> {
        let RootGroup {
            root, fragments, ..
        } = group;
        let mut local = ChildIndex::new();
        for fragment in fragments {
            index_fragment(&mut local, fragment);
        }
        let assembler = Assembler {
            graph: self.graph,
            local: &local,
            shared: self.shared.as_ref(),
        };
        let entity = assembler.build(None, &root, None)?;
        tracing::trace!(root = %root.key(), "Root materialized");
        entity.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            let schema = self.graph.root_schema();
            Error::field_mismatch(
                schema.name(),
                "(root)",
                std::any::type_name::<T>(),
                schema.rust_type(),
            )
        })
    }
}

impl<T: 'static> Iterator for Materialized<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let group = self.groups.next()?;
        let result = self.assemble(group);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl<T> std::fmt::Debug for Materialized<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materialized")
            .field("root", &self.graph.root().entity())
            .field("remaining", &self.groups.len())
            .field("failed", &self.failed)
            .finish()
    }
}
