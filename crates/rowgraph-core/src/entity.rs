//! Explicit entity schemas: constructors and setter tables.
//!
//! An [`EntitySchema<T>`] describes one entity type once, at configuration
//! time: its name, how to build an empty instance, and one setter per field.
//! Scalar setters convert column values through [`FromValue`]; relation
//! setters receive already-materialized child entities. Erased into a
//! [`DynSchema`], a schema lets the graph engine construct and populate any
//! entity shape without runtime reflection.
//!
//! # Example
//!
//! ```
//! use rowgraph_core::{EntitySchema, SqlType};
//!
//! #[derive(Debug, Default)]
//! struct Book {
//!     id: i64,
//!     title: String,
//! }
//!
//! #[derive(Debug, Default)]
//! struct Author {
//!     id: i64,
//!     books: Vec<Book>,
//! }
//!
//! let book = EntitySchema::<Book>::new("Book")
//!     .field("id", SqlType::BigInt, |b: &mut Book, v: i64| b.id = v)
//!     .field("title", SqlType::Text, |b: &mut Book, v: String| b.title = v)
//!     .build();
//! let author = EntitySchema::<Author>::new("Author")
//!     .field("id", SqlType::BigInt, |a: &mut Author, v: i64| a.id = v)
//!     .many("books", "Book", |a: &mut Author, b: Book| a.books.push(b))
//!     .build();
//! assert_eq!(author.name(), "Author");
//! assert!(book.has_constructor());
//! ```

use crate::error::{Error, Result};
use crate::row::FromValue;
use crate::types::SqlType;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased, owned entity instance.
pub type AnyEntity = Box<dyn Any + Send>;

type Constructor = Arc<dyn Fn() -> AnyEntity + Send + Sync>;
type ScalarSetter = Arc<dyn Fn(&mut dyn Any, &Value) -> Result<()> + Send + Sync>;
type RelationSetter = Arc<dyn Fn(&mut dyn Any, AnyEntity, &str) -> Result<()> + Send + Sync>;

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar column value of the given semantic type.
    Scalar(SqlType),
    /// A single related entity (one-to-one / many-to-one).
    One {
        /// Entity name of the related type
        entity: String,
    },
    /// A collection of related entities (one-to-many / many-to-many).
    Many {
        /// Entity name of the related type
        entity: String,
    },
}

impl FieldKind {
    /// Related entity name, for relation fields.
    pub fn related_entity(&self) -> Option<&str> {
        match self {
            FieldKind::Scalar(_) => None,
            FieldKind::One { entity } | FieldKind::Many { entity } => Some(entity),
        }
    }

    /// True for collection-valued relations.
    pub const fn is_plural(&self) -> bool {
        matches!(self, FieldKind::Many { .. })
    }
}

enum Setter {
    Scalar(ScalarSetter),
    Relation(RelationSetter),
}

struct FieldSlot {
    name: String,
    kind: FieldKind,
    setter: Setter,
}

/// Typed builder for an entity's schema.
pub struct EntitySchema<T> {
    name: String,
    constructor: Option<Constructor>,
    fields: Vec<FieldSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Default + Send + 'static> EntitySchema<T> {
    /// Start a schema whose empty instances come from `T::default()`.
    pub fn new(name: impl Into<String>) -> Self {
        let mut schema = Self::declared(name);
        schema.constructor = Some(Arc::new(|| Box::new(T::default()) as AnyEntity));
        schema
    }
}

impl<T: Send + 'static> EntitySchema<T> {
    /// Start a schema without a no-argument constructor.
    ///
    /// Materializing such an entity fails with a construction error unless a
    /// constructor is supplied through [`EntitySchema::constructor`].
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: None,
            fields: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Supply the function that builds an empty instance.
    pub fn constructor(mut self, make: fn() -> T) -> Self {
        self.constructor = Some(Arc::new(move || Box::new(make()) as AnyEntity));
        self
    }

    /// Declare a scalar field.
    ///
    /// The setter receives the column value converted through [`FromValue`];
    /// a failed conversion surfaces as a field type mismatch.
    pub fn field<V, F>(mut self, name: impl Into<String>, sql_type: SqlType, set: F) -> Self
    where
        V: FromValue + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let name = name.into();
        let entity = self.name.clone();
        let field = name.clone();
        let setter: ScalarSetter = Arc::new(move |target: &mut dyn Any, value: &Value| {
            let target = target
                .downcast_mut::<T>()
                .ok_or_else(|| instance_mismatch::<T>(&entity, &field))?;
            let converted = V::from_value(value).map_err(|_| {
                Error::field_mismatch(
                    entity.as_str(),
                    field.as_str(),
                    std::any::type_name::<V>(),
                    value.type_name(),
                )
            })?;
            set(target, converted);
            Ok(())
        });
        self.fields.push(FieldSlot {
            name,
            kind: FieldKind::Scalar(sql_type),
            setter: Setter::Scalar(setter),
        });
        self
    }

    /// Declare a single-valued relation to entity `related`.
    pub fn one<C, F>(self, name: impl Into<String>, related: impl Into<String>, set: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut T, C) + Send + Sync + 'static,
    {
        let kind = FieldKind::One {
            entity: related.into(),
        };
        self.relation(name.into(), kind, set)
    }

    /// Declare a collection-valued relation to entity `related`.
    ///
    /// The setter is called once per distinct child, in first-seen order.
    pub fn many<C, F>(self, name: impl Into<String>, related: impl Into<String>, set: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut T, C) + Send + Sync + 'static,
    {
        let kind = FieldKind::Many {
            entity: related.into(),
        };
        self.relation(name.into(), kind, set)
    }

    fn relation<C, F>(mut self, name: String, kind: FieldKind, set: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut T, C) + Send + Sync + 'static,
    {
        let entity = self.name.clone();
        let field = name.clone();
        let setter: RelationSetter =
            Arc::new(move |target: &mut dyn Any, child: AnyEntity, child_entity: &str| {
                let target = target
                    .downcast_mut::<T>()
                    .ok_or_else(|| instance_mismatch::<T>(&entity, &field))?;
                let child = child.downcast::<C>().map_err(|_| {
                    Error::field_mismatch(
                        entity.as_str(),
                        field.as_str(),
                        std::any::type_name::<C>(),
                        child_entity,
                    )
                })?;
                set(target, *child);
                Ok(())
            });
        self.fields.push(FieldSlot {
            name,
            kind,
            setter: Setter::Relation(setter),
        });
        self
    }

    /// Freeze the schema into its type-erased form.
    pub fn build(self) -> DynSchema {
        let index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.name.clone(), i))
            .collect();
        DynSchema {
            name: self.name,
            rust_type: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            constructor: self.constructor,
            fields: self.fields,
            index,
        }
    }
}

fn instance_mismatch<T>(entity: &str, field: &str) -> Error {
    Error::field_mismatch(
        entity,
        field,
        std::any::type_name::<T>(),
        "instance of a different entity type",
    )
}

/// A frozen, type-erased entity schema.
pub struct DynSchema {
    name: String,
    rust_type: &'static str,
    type_id: TypeId,
    constructor: Option<Constructor>,
    fields: Vec<FieldSlot>,
    index: HashMap<String, usize>,
}

impl DynSchema {
    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type the schema materializes.
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// True when the schema materializes values of type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Whether empty instances can be built.
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    /// Kind of a declared field.
    pub fn field_kind(&self, name: &str) -> Option<&FieldKind> {
        self.index.get(name).map(|&i| &self.fields[i].kind)
    }

    /// Declared field names, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|slot| slot.name.as_str())
    }

    /// Build an empty instance.
    pub fn construct(&self) -> Result<AnyEntity> {
        match &self.constructor {
            Some(make) => Ok(make()),
            None => {
                tracing::error!(entity = %self.name, "Can not construct entity: no constructor");
                Err(Error::missing_constructor(self.name.as_str()))
            }
        }
    }

    /// Set scalar field `field` on `instance` from `value`.
    ///
    /// Unknown field names are a no-op with a warning.
    pub fn populate(&self, instance: &mut dyn Any, field: &str, value: &Value) -> Result<()> {
        match self.index.get(field).map(|&i| &self.fields[i]) {
            Some(FieldSlot {
                setter: Setter::Scalar(set),
                ..
            }) => set(instance, value),
            Some(FieldSlot { kind, .. }) => Err(Error::field_mismatch(
                self.name.as_str(),
                field,
                describe_kind(kind),
                value.type_name(),
            )),
            None => {
                tracing::warn!(entity = %self.name, field, "Can't find field; value ignored");
                Ok(())
            }
        }
    }

    /// Attach a materialized `child` (of entity `child_entity`) to relation `field`.
    ///
    /// Unknown field names are a no-op with a warning.
    pub fn relate(
        &self,
        instance: &mut dyn Any,
        field: &str,
        child: AnyEntity,
        child_entity: &str,
    ) -> Result<()> {
        match self.index.get(field).map(|&i| &self.fields[i]) {
            Some(FieldSlot {
                setter: Setter::Relation(set),
                ..
            }) => set(instance, child, child_entity),
            Some(FieldSlot { kind, .. }) => Err(Error::field_mismatch(
                self.name.as_str(),
                field,
                describe_kind(kind),
                child_entity,
            )),
            None => {
                tracing::warn!(entity = %self.name, field, "Can't find relation field; child ignored");
                Ok(())
            }
        }
    }
}

fn describe_kind(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Scalar(t) => t.sql_name().to_string(),
        FieldKind::One { entity } => entity.clone(),
        FieldKind::Many { entity } => format!("collection of {}", entity),
    }
}

impl fmt::Debug for DynSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynSchema")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type)
            .field("has_constructor", &self.constructor.is_some())
            .field(
                "fields",
                &self
                    .fields
                    .iter()
                    .map(|slot| (&slot.name, &slot.kind))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Entity schemas by name, assembled once before graphs are built.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<DynSchema>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any earlier one with the same name.
    pub fn register(&mut self, schema: DynSchema) -> &mut Self {
        if self.schemas.contains_key(schema.name()) {
            tracing::warn!(entity = schema.name(), "Replacing registered entity schema");
        }
        self.schemas
            .insert(schema.name().to_string(), Arc::new(schema));
        self
    }

    /// Builder-style registration.
    pub fn with(mut self, schema: DynSchema) -> Self {
        self.register(schema);
        self
    }

    /// Look up a schema by entity name.
    pub fn get(&self, name: &str) -> Option<Arc<DynSchema>> {
        self.schemas.get(name).cloned()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
