//! Error types for graph materialization.

use std::fmt;

/// The primary error type for all rowgraph operations.
#[derive(Debug)]
pub enum Error {
    /// Value conversion errors
    Type(TypeError),
    /// Entity construction or population errors (fatal per invocation)
    Construction(ConstructionError),
    /// Relation graph configuration errors (fatal at build time)
    Config(ConfigError),
    /// A consumer expected exactly one root and found a different count
    Cardinality(CardinalityError),
    /// Errors raised by the row source / transport, propagated unchanged
    Source(SourceError),
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct ConstructionError {
    pub kind: ConstructionErrorKind,
    /// Entity type being constructed or populated
    pub entity: String,
    /// Offending field, when the failure is field-level
    pub field: Option<String>,
    /// Declared (target) type of the field
    pub expected: Option<String>,
    /// Runtime type of the value that was offered
    pub actual: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionErrorKind {
    /// The entity type has no registered no-argument constructor
    MissingConstructor,
    /// A value's type is incompatible with the field's declared type
    FieldTypeMismatch,
    /// An identity column is present but has the wrong shape
    MalformedKey,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct CardinalityError {
    pub expected: &'static str,
    pub found: usize,
}

#[derive(Debug)]
pub struct SourceError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a row-source error from a message.
    pub fn source_error(message: impl Into<String>) -> Self {
        Error::Source(SourceError {
            message: message.into(),
            source: None,
        })
    }

    /// Missing no-argument constructor for `entity`.
    pub fn missing_constructor(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Error::Construction(ConstructionError {
            kind: ConstructionErrorKind::MissingConstructor,
            message: format!("no default constructor registered for entity '{}'", entity),
            entity,
            field: None,
            expected: None,
            actual: None,
        })
    }

    /// Field type mismatch while populating `entity.field`.
    pub fn field_mismatch(
        entity: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let (entity, field, expected, actual) =
            (entity.into(), field.into(), expected.into(), actual.into());
        Error::Construction(ConstructionError {
            kind: ConstructionErrorKind::FieldTypeMismatch,
            message: format!(
                "field type mismatch in {}: field [name: {}, type: {}], source: {}",
                entity, field, expected, actual
            ),
            entity,
            field: Some(field),
            expected: Some(expected),
            actual: Some(actual),
        })
    }

    /// An identity column of `entity` carried a value of the wrong shape.
    pub fn malformed_key(
        entity: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Construction(ConstructionError {
            kind: ConstructionErrorKind::MalformedKey,
            entity: entity.into(),
            field: Some(column.into()),
            expected: None,
            actual: None,
            message: message.into(),
        })
    }

    /// Is this a fatal construction error?
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Construction(_))
    }

    /// Is this the "not exactly one" failure raised by single-object consumers?
    pub fn is_cardinality(&self) -> bool {
        matches!(self, Error::Cardinality(_))
    }

    /// Construction error kind, if this is a construction error.
    pub fn construction_kind(&self) -> Option<ConstructionErrorKind> {
        match self {
            Error::Construction(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Construction(e) => write!(f, "Construction error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cardinality(e) => write!(f, "Cardinality error: {}", e),
            Error::Source(e) => write!(f, "Row source error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Source(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CardinalityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.found == 1 { "root" } else { "roots" };
        if self.found == 0 {
            write!(f, "expected {} root, found none", self.expected)
        } else {
            write!(f, "expected {} root, found {} {}", self.expected, self.found, noun)
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConstructionError> for Error {
    fn from(err: ConstructionError) -> Self {
        Error::Construction(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<CardinalityError> for Error {
    fn from(err: CardinalityError) -> Self {
        Error::Cardinality(err)
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        Error::Source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid graph configuration: {}", err),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for rowgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
