//! Validated, immutable relation graphs.

use crate::assemble::AssemblyStrategy;
use crate::config::{Cardinality, EntityConfig, GraphConfig, RowOrdering};
use crate::extract::{BranchId, ColumnSlot, Extractor, RootRound, SubGraph};
use regex::Regex;
use rowgraph_core::{DynSchema, Error, FieldKind, Result, SchemaRegistry, SqlType};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

const ALIAS_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.]*$";

fn alias_regex() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    match PATTERN.get_or_init(|| Regex::new(ALIAS_PATTERN)) {
        Ok(regex) => Ok(regex),
        Err(e) => Err(Error::config(format!("invalid alias pattern: {e}"))),
    }
}

/// A frozen relation graph: compiled extractors for the root and every
/// branch, plus the assembly strategy.
///
/// Built once from a [`GraphConfig`] and a [`SchemaRegistry`]; immutable and
/// shareable across threads afterwards.
#[derive(Debug)]
pub struct RelationGraph {
    config: GraphConfig,
    root: RootRound,
    branches: Vec<SubGraph>,
    root_children: Vec<BranchId>,
    branch_children: Vec<Vec<BranchId>>,
    strategy: AssemblyStrategy,
}

impl RelationGraph {
    /// Validate `config` against `registry` and compile it.
    #[tracing::instrument(level = "debug", skip(config, registry), fields(root = %config.root.entity))]
    pub fn build(config: GraphConfig, registry: &SchemaRegistry) -> Result<Self> {
        let root_schema = lookup(registry, &config.root.entity)?;
        let root = RootRound {
            extractor: compile_entity(&config.root, Arc::clone(&root_schema))?,
        };

        let mut handles: HashMap<&str, BranchId> = HashMap::new();
        let mut branches: Vec<SubGraph> = Vec::with_capacity(config.branches.len());
        let mut root_children = Vec::new();
        let mut branch_children: Vec<Vec<BranchId>> = Vec::new();

        for (i, branch) in config.branches.iter().enumerate() {
            let id = BranchId(i);
            let handle = branch.handle();
            if branch.name.is_empty() || handle.is_empty() {
                return Err(Error::config("branch name must not be empty"));
            }
            if handles.contains_key(handle) {
                return Err(Error::config(format!(
                    "duplicate branch '{}'; give one of them a distinct id",
                    handle
                )));
            }

            let parent = match &branch.parent {
                Some(parent) => Some(*handles.get(parent.as_str()).ok_or_else(|| {
                    Error::config(format!(
                        "branch '{}' names parent '{}', which is not declared before it",
                        handle, parent
                    ))
                })?),
                None => None,
            };
            let parent_schema = match parent {
                Some(p) => Arc::clone(branches[p.index()].extractor.schema()),
                None => Arc::clone(&root_schema),
            };

            let plural = match parent_schema.field_kind(&branch.name) {
                Some(kind @ (FieldKind::One { .. } | FieldKind::Many { .. })) => {
                    if kind.related_entity() != Some(branch.target.entity.as_str()) {
                        return Err(Error::config(format!(
                            "relation '{}.{}' holds {}, but the branch maps {}",
                            parent_schema.name(),
                            branch.name,
                            kind.related_entity().unwrap_or("?"),
                            branch.target.entity
                        )));
                    }
                    kind.is_plural()
                }
                Some(FieldKind::Scalar(_)) => {
                    return Err(Error::config(format!(
                        "'{}.{}' is a scalar field, not a relation",
                        parent_schema.name(),
                        branch.name
                    )));
                }
                None => {
                    return Err(Error::config(format!(
                        "entity '{}' declares no relation '{}'",
                        parent_schema.name(),
                        branch.name
                    )));
                }
            };

            let schema = lookup(registry, &branch.target.entity)?;
            if let Some(field) = &branch.back_reference {
                if !matches!(schema.field_kind(field), Some(FieldKind::Scalar(_))) {
                    return Err(Error::config(format!(
                        "back reference '{}' of branch '{}' is not a scalar field of {}",
                        field,
                        handle,
                        schema.name()
                    )));
                }
            }
            let extractor = compile_entity(&branch.target, schema)?;

            match parent {
                Some(p) => branch_children[p.index()].push(id),
                None => root_children.push(id),
            }
            branch_children.push(Vec::new());
            handles.insert(handle, id);
            branches.push(SubGraph {
                id,
                handle: Arc::from(handle),
                name: Arc::from(branch.name.as_str()),
                parent,
                plural,
                back_reference: branch.back_reference.as_deref().map(Arc::from),
                extractor,
            });
        }

        let strategy = match config.cardinality {
            Cardinality::OneToEtc => AssemblyStrategy::OneToEtc,
            Cardinality::ManyToMany => {
                let edges: Vec<BranchId> = root_children
                    .iter()
                    .copied()
                    .filter(|id| branches[id.index()].plural)
                    .collect();
                if edges.is_empty() {
                    return Err(Error::config(format!(
                        "many-to-many graph for '{}' needs at least one root-level collection",
                        config.root.entity
                    )));
                }
                AssemblyStrategy::ManyToMany { edges }
            }
        };

        tracing::debug!(
            branches = branches.len(),
            strategy = ?strategy,
            ordering = ?config.ordering,
            "Relation graph built"
        );

        Ok(Self {
            config,
            root,
            branches,
            root_children,
            branch_children,
            strategy,
        })
    }

    /// Root extractor.
    pub fn root(&self) -> &RootRound {
        &self.root
    }

    /// Branches in declaration order.
    pub fn branches(&self) -> &[SubGraph] {
        &self.branches
    }

    /// Branch by handle.
    pub fn branch(&self, handle: &str) -> Option<&SubGraph> {
        self.branches.iter().find(|b| b.handle() == handle)
    }

    /// Direct children of `branch` (`None` for the root), in declaration order.
    pub fn children_of(&self, branch: Option<BranchId>) -> impl Iterator<Item = &SubGraph> {
        let ids = match branch {
            Some(id) => self.branch_children[id.index()].as_slice(),
            None => self.root_children.as_slice(),
        };
        ids.iter().map(|id| &self.branches[id.index()])
    }

    /// Assembly strategy chosen at build time.
    pub fn strategy(&self) -> &AssemblyStrategy {
        &self.strategy
    }

    /// Declared row ordering of the source.
    pub fn ordering(&self) -> RowOrdering {
        self.config.ordering
    }

    /// The configuration this graph was built from.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub(crate) fn root_schema(&self) -> &Arc<DynSchema> {
        self.root.extractor.schema()
    }

    /// Aliased SELECT list for every column whose source is known.
    ///
    /// A column's source is its explicit `source` expression, or
    /// `table.field` when the entity names a table. Columns with neither are
    /// left out, as are repeats of an alias already listed.
    pub fn select_columns(&self) -> Vec<String> {
        let entities = std::iter::once(&self.config.root)
            .chain(self.config.branches.iter().map(|b| &b.target));
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for entity in entities {
            for column in &entity.columns {
                let source = match (&column.source, &entity.table, &column.field) {
                    (Some(source), _, _) => source.clone(),
                    (None, Some(table), Some(field)) => format!("{}.{}", table, field),
                    _ => continue,
                };
                if seen.insert(column.alias.as_str()) {
                    columns.push(format!("{} AS {}", source, column.alias));
                }
            }
        }
        columns
    }
}

fn lookup(registry: &SchemaRegistry, entity: &str) -> Result<Arc<DynSchema>> {
    registry
        .get(entity)
        .ok_or_else(|| Error::config(format!("entity schema '{}' is not registered", entity)))
}

fn compile_entity(config: &EntityConfig, schema: Arc<DynSchema>) -> Result<Extractor> {
    let alias_regex = alias_regex()?;
    let mut aliases = HashSet::new();
    let mut columns = Vec::with_capacity(config.columns.len());

    for column in &config.columns {
        if !alias_regex.is_match(&column.alias) {
            return Err(Error::config(format!(
                "invalid column alias '{}' for entity {}",
                column.alias, config.entity
            )));
        }
        if !aliases.insert(column.alias.as_str()) {
            return Err(Error::config(format!(
                "duplicate column alias '{}' for entity {}",
                column.alias, config.entity
            )));
        }
        let sql_type = match &column.field {
            Some(field) => match schema.field_kind(field) {
                Some(FieldKind::Scalar(sql_type)) => *sql_type,
                Some(_) => {
                    return Err(Error::config(format!(
                        "column '{}' maps to relation '{}.{}'",
                        column.alias, config.entity, field
                    )));
                }
                None => {
                    return Err(Error::config(format!(
                        "column '{}' maps to unknown field '{}.{}'",
                        column.alias, config.entity, field
                    )));
                }
            },
            None => SqlType::Any,
        };
        columns.push(
            ColumnSlot::new(column.alias.as_str(), column.field.as_deref(), sql_type)
                .ignore_case(column.ignore_case),
        );
    }

    if config.key.is_empty() {
        return Err(Error::config(format!(
            "entity {} declares no identity columns",
            config.entity
        )));
    }
    let mut key = Vec::with_capacity(config.key.len());
    for alias in &config.key {
        let index = config
            .columns
            .iter()
            .position(|c| &c.alias == alias)
            .ok_or_else(|| {
                Error::config(format!(
                    "identity column '{}' of {} is not a mapped column",
                    alias, config.entity
                ))
            })?;
        if key.contains(&index) {
            return Err(Error::config(format!(
                "identity column '{}' of {} is listed twice",
                alias, config.entity
            )));
        }
        key.push(index);
    }

    Ok(Extractor::new(schema, columns, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchConfig;
    use rowgraph_core::EntitySchema;

    #[allow(dead_code)]
    #[derive(Default)]
    struct Root {
        id: i64,
        name: String,
        children: Vec<Child>,
        best: Option<Child>,
    }

    #[allow(dead_code)]
    #[derive(Default)]
    struct Child {
        id: i64,
        root_id: i64,
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                EntitySchema::<Root>::new("Root")
                    .field("id", SqlType::BigInt, |r: &mut Root, v: i64| r.id = v)
                    .field("name", SqlType::Text, |r: &mut Root, v: String| r.name = v)
                    .many("children", "Child", |r: &mut Root, c: Child| r.children.push(c))
                    .one("best", "Child", |r: &mut Root, c: Child| r.best = Some(c))
                    .build(),
            )
            .with(
                EntitySchema::<Child>::new("Child")
                    .field("id", SqlType::BigInt, |c: &mut Child, v: i64| c.id = v)
                    .field("rootId", SqlType::BigInt, |c: &mut Child, v: i64| {
                        c.root_id = v;
                    })
                    .build(),
            )
    }

    fn root() -> EntityConfig {
        EntityConfig::new("Root")
            .table("roots")
            .column("rootId", "id")
            .column("rootName", "name")
            .key("rootId")
    }

    fn child(prefix: &str) -> EntityConfig {
        EntityConfig::new("Child")
            .table("children")
            .column(format!("{prefix}Id"), "id")
            .key(format!("{prefix}Id"))
    }

    fn config_error(config: GraphConfig) -> String {
        match RelationGraph::build(config, &registry()) {
            Err(Error::Config(e)) => e.message,
            Err(other) => panic!("expected config error, got {other}"),
            Ok(_) => panic!("expected config error"),
        }
    }

    #[test]
    fn builds_tree_and_strategy() {
        let config = GraphConfig::new(root())
            .branch(BranchConfig::new("children", child("child")).back_reference("rootId"))
            .branch(BranchConfig::new("best", child("best")));
        let graph = RelationGraph::build(config, &registry()).unwrap();
        assert!(matches!(graph.strategy(), AssemblyStrategy::OneToEtc));
        let names: Vec<_> = graph.children_of(None).map(SubGraph::name).collect();
        assert_eq!(names, vec!["children", "best"]);
        assert!(graph.branch("children").unwrap().is_plural());
        assert!(!graph.branch("best").unwrap().is_plural());
        assert_eq!(graph.ordering(), RowOrdering::Interleaved);
    }

    #[test]
    fn graph_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RelationGraph>();
    }

    #[test]
    fn many_to_many_collects_root_collections() {
        let config = GraphConfig::new(root())
            .cardinality(Cardinality::ManyToMany)
            .branch(BranchConfig::new("children", child("child")))
            .branch(BranchConfig::new("best", child("best")));
        let graph = RelationGraph::build(config, &registry()).unwrap();
        match graph.strategy() {
            AssemblyStrategy::ManyToMany { edges } => assert_eq!(edges, &vec![BranchId(0)]),
            other => panic!("unexpected strategy {other:?}"),
        }

        let config = GraphConfig::new(root())
            .cardinality(Cardinality::ManyToMany)
            .branch(BranchConfig::new("best", child("best")));
        assert!(config_error(config).contains("root-level collection"));
    }

    #[test]
    fn rejects_bad_aliases() {
        let config = GraphConfig::new(root().column("1bad", "name"));
        assert!(config_error(config).contains("invalid column alias"));
        let config = GraphConfig::new(root().column("rootName", "name"));
        assert!(config_error(config).contains("duplicate column alias"));
    }

    #[test]
    fn rejects_unknown_schema_and_fields() {
        let config = GraphConfig::new(EntityConfig::new("Ghost").key("id"));
        assert!(config_error(config).contains("not registered"));
        let config = GraphConfig::new(root().column("rootAge", "age"));
        assert!(config_error(config).contains("unknown field"));
        let config = GraphConfig::new(root().column("rootKids", "children"));
        assert!(config_error(config).contains("relation"));
    }

    #[test]
    fn rejects_missing_keys() {
        let config = GraphConfig::new(EntityConfig::new("Root").column("rootId", "id"));
        assert!(config_error(config).contains("no identity columns"));

        let mut entity = root();
        entity.key.push("nowhere".into());
        assert!(config_error(GraphConfig::new(entity)).contains("not a mapped column"));
    }

    #[test]
    fn rejects_bad_branches() {
        let config = GraphConfig::new(root())
            .branch(BranchConfig::new("children", child("a")))
            .branch(BranchConfig::new("children", child("b")));
        assert!(config_error(config).contains("duplicate branch 'children'"));

        let config = GraphConfig::new(root())
            .branch(BranchConfig::new("children", child("a")).parent("later"));
        assert!(config_error(config).contains("not declared before"));

        let config = GraphConfig::new(root()).branch(BranchConfig::new("kids", child("a")));
        assert!(config_error(config).contains("no relation 'kids'"));

        let config = GraphConfig::new(root()).branch(BranchConfig::new(
            "children",
            EntityConfig::new("Root").column("otherId", "id").key("otherId"),
        ));
        assert!(config_error(config).contains("holds Child"));

        let config = GraphConfig::new(root())
            .branch(BranchConfig::new("children", child("a")).back_reference("missing"));
        assert!(config_error(config).contains("back reference"));
    }

    #[test]
    fn select_list_uses_sources_and_tables() {
        let config = GraphConfig::new(root()).branch(BranchConfig::new(
            "children",
            EntityConfig::new("Child")
                .column_from("childId", "id", "c.id")
                .column("childRoot", "rootId")
                .key("childId"),
        ));
        let graph = RelationGraph::build(config, &registry()).unwrap();
        assert_eq!(
            graph.select_columns(),
            vec![
                "roots.id AS rootId".to_string(),
                "roots.name AS rootName".to_string(),
                "c.id AS childId".to_string(),
            ]
        );
    }
}
