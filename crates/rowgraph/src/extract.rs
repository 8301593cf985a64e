//! Per-branch extraction of fragments ("rounds") from flat rows.

use crate::identity::IdentityKey;
use rowgraph_core::{DynSchema, Error, Result, Row, SqlType, Value};
use std::sync::Arc;

/// Index of a branch within its relation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub(crate) usize);

impl BranchId {
    /// Position of the branch in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The slice of one row belonging to one entity: its identity, the identity
/// of the owner it hangs under, and the non-null payload columns.
#[derive(Debug, Clone)]
pub struct Round {
    branch: Option<BranchId>,
    key: IdentityKey,
    parent: Option<IdentityKey>,
    payload: Vec<(Arc<str>, Value)>,
}

impl Round {
    /// Branch that produced this fragment; `None` for the root.
    pub fn branch(&self) -> Option<BranchId> {
        self.branch
    }

    /// Identity of the extracted entity.
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Identity of the owning entity; `None` for the root.
    ///
    /// A non-owning reference: the owner is resolved by identity lookup at
    /// assembly time.
    pub fn parent(&self) -> Option<&IdentityKey> {
        self.parent.as_ref()
    }

    /// `(field, value)` pairs, all non-null, in column order.
    pub fn payload(&self) -> &[(Arc<str>, Value)] {
        &self.payload
    }

    /// Value of `field`, if this fragment carries it.
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.payload
            .iter()
            .find(|(name, _)| &**name == field)
            .map(|(_, v)| v)
    }

    /// Fill in fields this fragment lacks from another fragment of the same
    /// entity. Fields already present keep their first-seen value.
    pub(crate) fn absorb(&mut self, other: &Round) {
        for (field, value) in &other.payload {
            if self.field(field).is_none() {
                self.payload.push((Arc::clone(field), value.clone()));
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct ColumnSlot {
    alias: String,
    field: Option<Arc<str>>,
    sql_type: SqlType,
    ignore_case: bool,
}

impl ColumnSlot {
    pub(crate) fn new(alias: impl Into<String>, field: Option<&str>, sql_type: SqlType) -> Self {
        Self {
            alias: alias.into(),
            field: field.map(Arc::from),
            sql_type,
            ignore_case: false,
        }
    }

    pub(crate) fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    /// Non-null value of this column in `row`.
    fn read<'r>(&self, row: &'r Row) -> Option<&'r Value> {
        if self.ignore_case {
            row.get_present_ignore_case(&self.alias)
        } else {
            row.get_present(&self.alias)
        }
    }
}

/// Column-level extraction shared by root and branch extractors.
#[derive(Debug)]
pub(crate) struct Extractor {
    entity: Arc<str>,
    schema: Arc<DynSchema>,
    columns: Vec<ColumnSlot>,
    key: Vec<usize>,
}

impl Extractor {
    pub(crate) fn new(schema: Arc<DynSchema>, columns: Vec<ColumnSlot>, key: Vec<usize>) -> Self {
        Self {
            entity: Arc::from(schema.name()),
            schema,
            columns,
            key,
        }
    }

    pub(crate) fn entity(&self) -> &str {
        &self.entity
    }

    pub(crate) fn schema(&self) -> &Arc<DynSchema> {
        &self.schema
    }

    /// True when every owned column is missing or NULL in `row`.
    fn is_absent(&self, row: &Row) -> bool {
        self.columns
            .iter()
            .all(|c| c.read(row).is_none())
    }

    /// Derive the identity from key columns only.
    ///
    /// `Ok(None)` when every key column is NULL; an error when some but not
    /// all of a composite key are NULL, or a value has the wrong shape.
    fn identity(&self, row: &Row) -> Result<Option<IdentityKey>> {
        let mut values = Vec::with_capacity(self.key.len());
        let mut nulls = 0usize;
        for &i in &self.key {
            let slot = &self.columns[i];
            match slot.read(row) {
                Some(value) => {
                    if !slot.sql_type.admits(value) {
                        return Err(Error::malformed_key(
                            &*self.entity,
                            slot.alias.as_str(),
                            format!(
                                "identity column '{}' of {} expects {}, found {}",
                                slot.alias,
                                self.entity,
                                slot.sql_type.sql_name(),
                                value.type_name()
                            ),
                        ));
                    }
                    values.push(key_value(slot.sql_type, value));
                }
                None => {
                    nulls += 1;
                    values.push(Value::Null);
                }
            }
        }
        if nulls == values.len() {
            return Ok(None);
        }
        if nulls > 0 {
            return Err(Error::malformed_key(
                &*self.entity,
                self.columns[self.key[0]].alias.as_str(),
                format!(
                    "composite identity of {} is partially NULL ({} of {} columns)",
                    self.entity,
                    nulls,
                    values.len()
                ),
            ));
        }
        Ok(Some(IdentityKey::new(Arc::clone(&self.entity), values)))
    }

    fn payload(&self, row: &Row) -> Vec<(Arc<str>, Value)> {
        self.columns
            .iter()
            .filter_map(|c| {
                let field = c.field.as_ref()?;
                let value = c.read(row)?;
                Some((Arc::clone(field), value.clone()))
            })
            .collect()
    }
}

/// Identity form of a key column value.
///
/// Integer keys widen to `BigInt` so drivers that pick `INT` or `BIGINT` by
/// magnitude still yield one identity per entity.
fn key_value(sql_type: SqlType, value: &Value) -> Value {
    match value.as_i64() {
        Some(v) if sql_type.is_integer() && value.is_integer() => Value::BigInt(v),
        _ => value.clone(),
    }
}

/// Extractor for the root entity of a graph.
#[derive(Debug)]
pub struct RootRound {
    pub(crate) extractor: Extractor,
}

impl RootRound {
    /// Root entity name.
    pub fn entity(&self) -> &str {
        self.extractor.entity()
    }

    /// Extract the root fragment of `row`.
    ///
    /// The root identity comes from key columns alone, so rows that differ
    /// only in branch columns (or in optional root attributes) group together.
    /// `Ok(None)` when the row carries no root identity.
    pub fn extract(&self, row: &Row) -> Result<Option<Round>> {
        let Some(key) = self.extractor.identity(row)? else {
            return Ok(None);
        };
        Ok(Some(Round {
            branch: None,
            key,
            parent: None,
            payload: self.extractor.payload(row),
        }))
    }
}

/// Extractor for one declared branch (a nested association).
#[derive(Debug)]
pub struct SubGraph {
    pub(crate) id: BranchId,
    pub(crate) handle: Arc<str>,
    pub(crate) name: Arc<str>,
    pub(crate) parent: Option<BranchId>,
    pub(crate) plural: bool,
    pub(crate) back_reference: Option<Arc<str>>,
    pub(crate) extractor: Extractor,
}

impl SubGraph {
    /// Branch id.
    pub fn id(&self) -> BranchId {
        self.id
    }

    /// Unique handle within the graph.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Relation field on the parent entity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent branch; `None` when the branch hangs off the root.
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// True when the parent field is a collection.
    pub fn is_plural(&self) -> bool {
        self.plural
    }

    /// Child entity name.
    pub fn entity(&self) -> &str {
        self.extractor.entity()
    }

    /// Extract this branch's fragment from `row`, relative to the owner
    /// fragment extracted from the same row.
    ///
    /// Absent (`Ok(None)`) when the owner is absent, when every owned column
    /// is NULL or missing, or when no identity can be derived.
    pub fn extract(&self, row: &Row, owner: Option<&IdentityKey>) -> Result<Option<Round>> {
        let Some(owner) = owner else {
            return Ok(None);
        };
        if self.extractor.is_absent(row) {
            return Ok(None);
        }
        let Some(key) = self.extractor.identity(row)? else {
            tracing::debug!(
                branch = %self.name,
                entity = self.entity(),
                "Branch columns present without identity; fragment dropped"
            );
            return Ok(None);
        };
        Ok(Some(Round {
            branch: Some(self.id),
            key,
            parent: Some(owner.clone()),
            payload: self.extractor.payload(row),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{ConstructionErrorKind, EntitySchema};

    #[allow(dead_code)]
    #[derive(Default)]
    struct Child {
        id: i64,
        label: String,
    }

    fn child_extractor() -> Extractor {
        let schema = EntitySchema::<Child>::new("Child")
            .field("id", SqlType::BigInt, |c: &mut Child, v: i64| c.id = v)
            .field("label", SqlType::Text, |c: &mut Child, v: String| c.label = v)
            .build();
        Extractor::new(
            Arc::new(schema),
            vec![
                ColumnSlot::new("childId", Some("id"), SqlType::BigInt),
                ColumnSlot::new("childLabel", Some("label"), SqlType::Text),
            ],
            vec![0],
        )
    }

    fn branch() -> SubGraph {
        SubGraph {
            id: BranchId(0),
            handle: Arc::from("children"),
            name: Arc::from("children"),
            parent: None,
            plural: true,
            back_reference: None,
            extractor: child_extractor(),
        }
    }

    fn owner() -> IdentityKey {
        IdentityKey::new("Root", vec![Value::BigInt(1)])
    }

    #[test]
    fn extracts_identity_and_payload() {
        let row = Row::from_pairs([
            ("rootId", Value::BigInt(1)),
            ("childId", Value::BigInt(10)),
            ("childLabel", Value::Text("x".into())),
        ]);
        let round = branch().extract(&row, Some(&owner())).unwrap().unwrap();
        assert_eq!(round.key(), &IdentityKey::new("Child", vec![Value::BigInt(10)]));
        assert_eq!(round.parent(), Some(&owner()));
        assert_eq!(round.field("label"), Some(&Value::Text("x".into())));
        assert_eq!(round.branch(), Some(BranchId(0)));
    }

    #[test]
    fn absent_when_columns_null_or_missing() {
        let nulls = Row::from_pairs([
            ("rootId", Value::BigInt(1)),
            ("childId", Value::Null),
            ("childLabel", Value::Null),
        ]);
        assert!(branch().extract(&nulls, Some(&owner())).unwrap().is_none());

        let missing = Row::from_pairs([("rootId", Value::BigInt(1))]);
        assert!(branch().extract(&missing, Some(&owner())).unwrap().is_none());
    }

    #[test]
    fn absent_without_owner() {
        let row = Row::from_pairs([("childId", Value::BigInt(10))]);
        assert!(branch().extract(&row, None).unwrap().is_none());
    }

    #[test]
    fn payload_without_identity_is_dropped() {
        let row = Row::from_pairs([
            ("childId", Value::Null),
            ("childLabel", Value::Text("orphan".into())),
        ]);
        assert!(branch().extract(&row, Some(&owner())).unwrap().is_none());
    }

    #[test]
    fn malformed_key_fails_loudly() {
        let row = Row::from_pairs([("childId", Value::Text("ten".into()))]);
        let err = branch().extract(&row, Some(&owner())).unwrap_err();
        assert_eq!(err.construction_kind(), Some(ConstructionErrorKind::MalformedKey));
        assert!(err.to_string().contains("childId"));
    }

    #[test]
    fn integer_keys_share_identity_across_widths() {
        let narrow = Row::from_pairs([("childId", Value::Int(10))]);
        let wide = Row::from_pairs([("childId", Value::BigInt(10))]);
        let small = Row::from_pairs([("childId", Value::SmallInt(10))]);
        let a = branch().extract(&narrow, Some(&owner())).unwrap().unwrap();
        let b = branch().extract(&wide, Some(&owner())).unwrap().unwrap();
        let c = branch().extract(&small, Some(&owner())).unwrap().unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(b.key(), c.key());
        assert_eq!(a.key().values(), &[Value::BigInt(10)]);
    }

    #[test]
    fn partially_null_composite_key_fails() {
        let schema = EntitySchema::<Child>::new("Child").build();
        let extractor = Extractor::new(
            Arc::new(schema),
            vec![
                ColumnSlot::new("a", None, SqlType::Any),
                ColumnSlot::new("b", None, SqlType::Any),
            ],
            vec![0, 1],
        );
        let root = RootRound { extractor };
        let row = Row::from_pairs([("a", Value::Int(1)), ("b", Value::Null)]);
        assert!(root.extract(&row).is_err());

        let row = Row::from_pairs([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let round = root.extract(&row).unwrap().unwrap();
        assert!(round.key().is_composite());
        assert!(round.payload().is_empty());
    }

    #[test]
    fn root_identity_ignores_attributes() {
        let root = RootRound {
            extractor: child_extractor(),
        };
        let a = Row::from_pairs([("childId", Value::BigInt(5)), ("childLabel", Value::Null)]);
        let b = Row::from_pairs([
            ("childId", Value::BigInt(5)),
            ("childLabel", Value::Text("y".into())),
        ]);
        let ra = root.extract(&a).unwrap().unwrap();
        let rb = root.extract(&b).unwrap().unwrap();
        assert_eq!(ra.key(), rb.key());
        assert!(ra.field("label").is_none());

        let no_key = Row::from_pairs([("childLabel", Value::Text("y".into()))]);
        assert!(root.extract(&no_key).unwrap().is_none());
    }

    #[test]
    fn absorb_keeps_first_values() {
        let root = RootRound {
            extractor: child_extractor(),
        };
        let mut first = root
            .extract(&Row::from_pairs([("childId", Value::BigInt(5))]))
            .unwrap()
            .unwrap();
        let second = root
            .extract(&Row::from_pairs([
                ("childId", Value::BigInt(6)),
                ("childLabel", Value::Text("late".into())),
            ]))
            .unwrap()
            .unwrap();
        first.absorb(&second);
        assert_eq!(first.field("id"), Some(&Value::BigInt(5)));
        assert_eq!(first.field("label"), Some(&Value::Text("late".into())));
    }
}
