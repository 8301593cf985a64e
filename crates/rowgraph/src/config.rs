//! Declarative relation graph configuration.
//!
//! A [`GraphConfig`] says, for one root entity, which result-set columns feed
//! which entity fields, which columns identify each entity, how branches nest,
//! and which assembly strategy applies. It is plain data: build it with the
//! fluent methods below or load it from JSON, then freeze it into a
//! [`RelationGraph`](crate::RelationGraph).
//!
//! ```
//! use rowgraph::{BranchConfig, Cardinality, EntityConfig, GraphConfig};
//!
//! let config = GraphConfig::new(
//!     EntityConfig::new("Root")
//!         .column("rootId", "id")
//!         .column("rootName", "name")
//!         .key("rootId"),
//! )
//! .branch(BranchConfig::new(
//!     "round2s",
//!     EntityConfig::new("Round2").column("round2Id", "id").key("round2Id"),
//! ));
//! assert_eq!(config.cardinality, Cardinality::OneToEtc);
//! assert_eq!(config.branches.len(), 1);
//! ```

use rowgraph_core::{DynSchema, FieldKind, Result};
use serde::{Deserialize, Serialize};

/// Assembly strategy tag for a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    /// One-to-one and one-to-many: fragments augment their owner directly.
    #[default]
    OneToEtc,
    /// Root-level collections are many-to-many edge sets, accumulated over the
    /// whole input before they are attached.
    ManyToMany,
}

/// What the row source promises about how rows of one root are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowOrdering {
    /// Rows of different roots may interleave; consumers drain the source.
    #[default]
    Interleaved,
    /// All rows of one root arrive as one contiguous run (the query sorts on
    /// the root key), so `single` may stop reading once the run ends.
    ClusteredByRoot,
}

/// One result-set column and the entity field it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    /// Column alias as it appears in the row.
    pub alias: String,
    /// Entity field populated from the column; `None` for key-only columns.
    #[serde(default)]
    pub field: Option<String>,
    /// Source expression (`table.column`) for the SELECT list helper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Match the alias against row columns case-insensitively.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_case: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Conventional alias of `field` on `entity`: the entity name with a
/// lowercase first letter, then the field name capitalized (`Round2` + `id`
/// gives `round2Id`). A field whose name already contains the entity name is
/// its own alias.
pub fn convention_alias(entity: &str, field: &str) -> String {
    if field.to_lowercase().contains(&entity.to_lowercase()) {
        return field.to_string();
    }
    let mut alias = String::with_capacity(entity.len() + field.len());
    let mut entity_chars = entity.chars();
    if let Some(first) = entity_chars.next() {
        alias.extend(first.to_lowercase());
        alias.push_str(entity_chars.as_str());
    }
    let mut field_chars = field.chars();
    if let Some(first) = field_chars.next() {
        alias.extend(first.to_uppercase());
        alias.push_str(field_chars.as_str());
    }
    alias
}

/// Column mapping and identity of one entity within the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    /// Registered entity (schema) name.
    pub entity: String,
    /// Source table, used to derive SELECT expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Owned columns, in order.
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    /// Aliases of the identity columns.
    #[serde(default)]
    pub key: Vec<String>,
}

impl EntityConfig {
    /// Start an entity mapping.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: None,
            columns: Vec::new(),
            key: Vec::new(),
        }
    }

    /// Set the source table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Map column `alias` to entity field `field`.
    pub fn column(mut self, alias: impl Into<String>, field: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            alias: alias.into(),
            field: Some(field.into()),
            source: None,
            ignore_case: false,
        });
        self
    }

    /// Map column `alias` to `field`, selected from `source` (`table.column`).
    pub fn column_from(
        mut self,
        alias: impl Into<String>,
        field: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.columns.push(ColumnMapping {
            alias: alias.into(),
            field: Some(field.into()),
            source: Some(source.into()),
            ignore_case: false,
        });
        self
    }

    /// Map every scalar field of `schema` not mapped yet to its conventional
    /// alias (see [`convention_alias`]), matched case-insensitively.
    ///
    /// ```
    /// use rowgraph::{EntityConfig, EntitySchema, SqlType};
    ///
    /// #[derive(Default)]
    /// struct Round2 {
    ///     id: i64,
    /// }
    ///
    /// let schema = EntitySchema::<Round2>::new("Round2")
    ///     .field("id", SqlType::BigInt, |r: &mut Round2, v: i64| r.id = v)
    ///     .build();
    /// let entity = EntityConfig::new("Round2").fields_by_convention(&schema);
    /// assert_eq!(entity.columns[0].alias, "round2Id");
    /// ```
    pub fn fields_by_convention(mut self, schema: &DynSchema) -> Self {
        for field in schema.field_names() {
            if !matches!(schema.field_kind(field), Some(FieldKind::Scalar(_))) {
                continue;
            }
            if self.columns.iter().any(|c| c.field.as_deref() == Some(field)) {
                continue;
            }
            let alias = convention_alias(&self.entity, field);
            if self.columns.iter().any(|c| c.alias.eq_ignore_ascii_case(&alias)) {
                continue;
            }
            self.columns.push(ColumnMapping {
                alias,
                field: Some(field.to_string()),
                source: None,
                ignore_case: true,
            });
        }
        self
    }

    /// Mark the column feeding `field` as an identity column, mapping it by
    /// convention first when no column feeds it yet.
    pub fn key_field(mut self, field: &str) -> Self {
        let mapped = self
            .columns
            .iter()
            .find(|c| c.field.as_deref() == Some(field))
            .map(|c| c.alias.clone());
        let alias = match mapped {
            Some(alias) => alias,
            None => {
                let alias = convention_alias(&self.entity, field);
                self.columns.push(ColumnMapping {
                    alias: alias.clone(),
                    field: Some(field.to_string()),
                    source: None,
                    ignore_case: true,
                });
                alias
            }
        };
        self.key(alias)
    }

    /// Mark `alias` as an identity column.
    ///
    /// An alias not yet mapped becomes a key-only column.
    pub fn key(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.columns.iter().any(|c| c.alias == alias) {
            self.columns.push(ColumnMapping {
                alias: alias.clone(),
                field: None,
                source: None,
                ignore_case: false,
            });
        }
        self.key.push(alias);
        self
    }
}

/// A nested association: a relation field on the parent plus the child's
/// column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchConfig {
    /// Relation field on the parent entity.
    pub name: String,
    /// Unique handle for `parent` references; defaults to `name`.
    ///
    /// Needed when two branches fill relations of the same name at different
    /// depths, e.g. `Order.items` and `Item.items`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Handle of the parent branch; `None` attaches the branch to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Child entity mapping.
    pub target: EntityConfig,
    /// Scalar field on the child that receives the parent's identity value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_reference: Option<String>,
}

impl BranchConfig {
    /// A branch hanging off the root.
    pub fn new(name: impl Into<String>, target: EntityConfig) -> Self {
        Self {
            name: name.into(),
            id: None,
            parent: None,
            target,
            back_reference: None,
        }
    }

    /// Give the branch a handle distinct from its relation name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Handle other branches use to name this one as their parent.
    pub fn handle(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Nest under another branch.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Populate `field` on each child with its parent's identity value.
    pub fn back_reference(mut self, field: impl Into<String>) -> Self {
        self.back_reference = Some(field.into());
        self
    }
}

/// Full configuration of one relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphConfig {
    /// Root entity mapping.
    pub root: EntityConfig,
    /// Assembly strategy.
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Row ordering guarantee of the source.
    #[serde(default)]
    pub ordering: RowOrdering,
    /// Branches, parents before children.
    #[serde(default)]
    pub branches: Vec<BranchConfig>,
}

impl GraphConfig {
    /// Start a configuration for `root`.
    pub fn new(root: EntityConfig) -> Self {
        Self {
            root,
            cardinality: Cardinality::default(),
            ordering: RowOrdering::default(),
            branches: Vec::new(),
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the configuration as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the assembly strategy.
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Set the source ordering guarantee.
    pub fn ordering(mut self, ordering: RowOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Append a branch.
    pub fn branch(mut self, branch: BranchConfig) -> Self {
        self.branches.push(branch);
        self
    }
}
