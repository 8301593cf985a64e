//! rowgraph - rebuild nested entity graphs from flat, joined result rows.
//!
//! A query that joins a root table to its associations returns one flat row
//! per leaf combination. rowgraph folds those rows back into objects:
//!
//! - rows are grouped by the root's identity, in first-seen order
//! - each declared branch extracts its own fragment from every row
//! - duplicate fragments collapse by identity
//! - objects are built through explicit entity schemas, lazily, one root at
//!   a time
//!
//! # Quick Start
//!
//! ```
//! use rowgraph::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Child {
//!     id: i64,
//! }
//!
//! #[derive(Debug, Default)]
//! struct Root {
//!     id: i64,
//!     name: String,
//!     children: Vec<Child>,
//! }
//!
//! let registry = SchemaRegistry::new()
//!     .with(
//!         EntitySchema::<Root>::new("Root")
//!             .field("id", SqlType::BigInt, |r: &mut Root, v: i64| r.id = v)
//!             .field("name", SqlType::Text, |r: &mut Root, v: String| r.name = v)
//!             .many("children", "Child", |r: &mut Root, c: Child| r.children.push(c))
//!             .build(),
//!     )
//!     .with(
//!         EntitySchema::<Child>::new("Child")
//!             .field("id", SqlType::BigInt, |c: &mut Child, v: i64| c.id = v)
//!             .build(),
//!     );
//!
//! let config = GraphConfig::new(
//!     EntityConfig::new("Root")
//!         .column("rootId", "id")
//!         .column("rootName", "name")
//!         .key("rootId"),
//! )
//! .branch(BranchConfig::new(
//!     "children",
//!     EntityConfig::new("Child").column("childId", "id").key("childId"),
//! ));
//! let mapper = GraphMapper::<Root>::new(config, &registry)?;
//!
//! let rows = vec![
//!     Row::from_pairs([
//!         ("rootId", Value::BigInt(1)),
//!         ("rootName", Value::Text("A".into())),
//!         ("childId", Value::BigInt(10)),
//!     ]),
//!     Row::from_pairs([
//!         ("rootId", Value::BigInt(1)),
//!         ("rootName", Value::Text("A".into())),
//!         ("childId", Value::BigInt(11)),
//!     ]),
//! ];
//! let root = mapper.single(rows)?;
//! assert_eq!(root.children.len(), 2);
//! # Ok::<(), rowgraph::Error>(())
//! ```

pub mod assemble;
pub mod config;
pub mod extract;
pub mod graph;
pub mod group;
pub mod identity;
pub mod many_to_many;
pub mod mapper;
pub mod source;

// Re-export core types
pub use rowgraph_core::{
    AnyEntity, CardinalityError, ColumnInfo, ConfigError, ConstructionError,
    ConstructionErrorKind, Cx, DynSchema, EntitySchema, Error, FieldKind, FromValue, Outcome,
    Result, Row, SchemaRegistry, SourceError, SqlType, TypeError, Value,
};

pub use assemble::{AssemblyStrategy, Materialized};
pub use config::{
    BranchConfig, Cardinality, ColumnMapping, EntityConfig, GraphConfig, RowOrdering,
    convention_alias,
};
pub use extract::{BranchId, RootRound, Round, SubGraph};
pub use graph::RelationGraph;
pub use group::{GroupedState, Grouper, RootGroup};
pub use identity::IdentityKey;
pub use many_to_many::ManyToManyAccumulator;
pub use mapper::GraphMapper;
pub use source::{RowSource, VecRowSource};

/// Prelude module for convenient imports.
///
/// ```
/// use rowgraph::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BranchConfig, Cardinality, Cx, EntityConfig, EntitySchema, Error, GraphConfig,
        GraphMapper, Materialized, Outcome, RelationGraph, Result, Row, RowOrdering, RowSource,
        SchemaRegistry, SqlType, Value, VecRowSource,
    };
}
