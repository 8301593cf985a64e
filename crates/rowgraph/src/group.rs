//! Grouping stage: folds flat rows into per-root fragment lists.

use crate::extract::{BranchId, Round};
use crate::graph::RelationGraph;
use crate::identity::IdentityKey;
use indexmap::IndexMap;
use indexmap::map::Entry;
use rowgraph_core::{Result, Row};
use std::collections::HashMap;

/// Fragments gathered for one root identity.
#[derive(Debug)]
pub struct RootGroup {
    pub(crate) root: Round,
    pub(crate) fragments: Vec<Round>,
    seen: HashMap<(BranchId, IdentityKey, IdentityKey), usize>,
}

impl RootGroup {
    fn new(root: Round) -> Self {
        Self {
            root,
            fragments: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// Root fragment; its payload merges every row of the group.
    pub fn root(&self) -> &Round {
        &self.root
    }

    /// Distinct branch fragments in first-seen order.
    pub fn fragments(&self) -> &[Round] {
        &self.fragments
    }

    fn push(&mut self, fragment: Round) {
        let Some(branch) = fragment.branch() else {
            return;
        };
        let Some(parent) = fragment.parent() else {
            return;
        };
        let dedup = (branch, fragment.key().clone(), parent.clone());
        match self.seen.get(&dedup) {
            Some(&i) => self.fragments[i].absorb(&fragment),
            None => {
                self.seen.insert(dedup, self.fragments.len());
                self.fragments.push(fragment);
            }
        }
    }
}

/// Result of the grouping stage: root groups in discovery order.
#[derive(Debug, Default)]
pub struct GroupedState {
    groups: IndexMap<IdentityKey, RootGroup>,
    rows_seen: usize,
    rows_dropped: usize,
}

impl GroupedState {
    /// Number of distinct roots.
    pub fn root_count(&self) -> usize {
        self.groups.len()
    }

    /// Rows pushed through the grouper.
    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    /// Rows skipped as blank or without a root identity.
    pub fn rows_dropped(&self) -> usize {
        self.rows_dropped
    }

    /// Root keys in discovery order.
    pub fn root_keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.groups.keys()
    }

    /// Group of `root`, if seen.
    pub fn group(&self, root: &IdentityKey) -> Option<&RootGroup> {
        self.groups.get(root)
    }

    pub(crate) fn into_groups(self) -> Vec<RootGroup> {
        self.groups.into_values().collect()
    }
}

/// Streaming reducer feeding rows into a [`GroupedState`].
pub struct Grouper<'g> {
    graph: &'g RelationGraph,
    state: GroupedState,
}

impl<'g> Grouper<'g> {
    /// Start grouping for `graph`.
    pub fn new(graph: &'g RelationGraph) -> Self {
        Self {
            graph,
            state: GroupedState::default(),
        }
    }

    /// Fold one row.
    ///
    /// Returns the discovery index of the row's root group, or `None` when the
    /// row was skipped.
    pub fn push(&mut self, row: &Row) -> Result<Option<usize>> {
        self.state.rows_seen += 1;
        if row.is_blank() {
            tracing::trace!(row = self.state.rows_seen, "Skipping empty row");
            self.state.rows_dropped += 1;
            return Ok(None);
        }

        let Some(root) = self.graph.root().extract(row)? else {
            tracing::debug!(
                row = self.state.rows_seen,
                entity = self.graph.root().entity(),
                "Row has no root identity; dropped"
            );
            self.state.rows_dropped += 1;
            return Ok(None);
        };

        // Owner identities of this row, one slot per branch.
        let branches = self.graph.branches();
        let mut owners: Vec<Option<IdentityKey>> = Vec::with_capacity(branches.len());
        let mut fragments = Vec::new();
        for branch in branches {
            let owner = match branch.parent() {
                Some(parent) => owners[parent.index()].as_ref(),
                None => Some(root.key()),
            };
            let fragment = branch.extract(row, owner)?;
            owners.push(fragment.as_ref().map(|f| f.key().clone()));
            if let Some(fragment) = fragment {
                fragments.push(fragment);
            }
        }

        let entry = self.state.groups.entry(root.key().clone());
        let index = entry.index();
        let group = match entry {
            Entry::Occupied(occupied) => {
                let group = occupied.into_mut();
                group.root.absorb(&root);
                group
            }
            Entry::Vacant(vacant) => vacant.insert(RootGroup::new(root)),
        };
        tracing::trace!(root = %group.root.key(), fragments = fragments.len(), "Row grouped");
        for fragment in fragments {
            group.push(fragment);
        }
        Ok(Some(index))
    }

    /// Finish grouping.
    pub fn finish(self) -> GroupedState {
        tracing::debug!(
            rows = self.state.rows_seen,
            dropped = self.state.rows_dropped,
            roots = self.state.root_count(),
            "Grouping complete"
        );
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BranchConfig, EntityConfig, GraphConfig};
    use rowgraph_core::{EntitySchema, SchemaRegistry, SqlType, Value};

    #[allow(dead_code)]
    #[derive(Default)]
    struct Node {
        id: i64,
        tag: String,
        kids: Vec<Node>,
    }

    fn graph() -> RelationGraph {
        let registry = SchemaRegistry::new().with(
            EntitySchema::<Node>::new("Node")
                .field("id", SqlType::BigInt, |n: &mut Node, v: i64| n.id = v)
                .field("tag", SqlType::Text, |n: &mut Node, v: String| n.tag = v)
                .many("kids", "Node", |n: &mut Node, k: Node| n.kids.push(k))
                .build(),
        );
        let config = GraphConfig::new(EntityConfig::new("Node").column("id", "id").key("id"))
            .branch(BranchConfig::new(
                "kids",
                EntityConfig::new("Node")
                    .column("kidId", "id")
                    .column("kidTag", "tag")
                    .key("kidId"),
            ));
        RelationGraph::build(config, &registry).unwrap()
    }

    fn row(id: i64, kid: Value, tag: Value) -> Row {
        Row::from_pairs([("id", Value::BigInt(id)), ("kidId", kid), ("kidTag", tag)])
    }

    #[test]
    fn duplicate_fragments_collapse_and_absorb() {
        let graph = graph();
        let mut grouper = Grouper::new(&graph);
        assert_eq!(grouper.push(&row(1, Value::BigInt(5), Value::Null)).unwrap(), Some(0));
        assert_eq!(
            grouper
                .push(&row(1, Value::BigInt(5), Value::Text("x".into())))
                .unwrap(),
            Some(0)
        );
        assert_eq!(grouper.push(&row(2, Value::Null, Value::Null)).unwrap(), Some(1));
        let state = grouper.finish();

        let keys: Vec<_> = state.root_keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["Node(1)", "Node(2)"]);
        let first = state
            .group(&IdentityKey::new("Node", vec![Value::BigInt(1)]))
            .unwrap();
        assert_eq!(first.fragments().len(), 1);
        assert_eq!(first.fragments()[0].field("tag"), Some(&Value::Text("x".into())));
        assert_eq!(first.root().field("id"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn blank_rows_are_skipped() {
        let graph = graph();
        let mut grouper = Grouper::new(&graph);
        assert_eq!(grouper.push(&row(0, Value::Null, Value::Null)).unwrap(), Some(0));
        let blank = Row::from_pairs([("id", Value::Null), ("kidId", Value::Null)]);
        assert_eq!(grouper.push(&blank).unwrap(), None);
        let state = grouper.finish();
        assert_eq!(state.rows_seen(), 2);
        assert_eq!(state.rows_dropped(), 1);
    }
}
