//! Core types for rowgraph.
//!
//! This crate provides the building blocks the graph engine consumes:
//!
//! - `Value` and `Row` for flat, joined result rows
//! - `FromValue` for typed extraction of column values
//! - `EntitySchema` / `DynSchema` setter tables that replace reflection
//! - `Error` and `Result`
//! - `Cx` / `Outcome` re-exports from asupersync for cancel-correct row sources

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod entity;
pub mod error;
pub mod row;
pub mod types;
pub mod value;

pub use entity::{AnyEntity, DynSchema, EntitySchema, FieldKind, SchemaRegistry};
pub use error::{
    CardinalityError, ConfigError, ConstructionError, ConstructionErrorKind, Error, Result,
    SourceError, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::Value;
