//! # Records and Schemas
//!
//! A [`Record`] is the unit of data that flows along topology edges: an ordered,
//! immutable tuple of scalar [`Value`]s described by the [`Schema`] of the stage
//! that emitted it.
//!
//! ## Schemas
//!
//! Every stage declares its output schema once, as an ordered list of field
//! names. A field may optionally pin a [`ValueKind`]; untyped fields accept any
//! scalar. Emission is checked against the schema, so a record that reaches a
//! router always carries exactly one value per declared field.
//!
//! ```rust
//! use tupleweave::record::{Schema, Value, ValueKind};
//!
//! let schema = Schema::typed([("word", ValueKind::Str), ("count", ValueKind::Int)]);
//! assert_eq!(schema.index_of("count"), Some(1));
//! assert!(schema.validate(&[Value::from("cat"), Value::from(2i64)]).is_ok());
//! assert!(schema.validate(&[Value::from("cat")]).is_err());
//! ```
//!
//! ## Sharing
//!
//! Records are cheap to clone: the values and schema sit behind `Arc`s, so
//! broadcast fan-out and terminal output share one allocation.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

/// The kind of a scalar [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
  /// UTF-8 string.
  Str,
  /// Signed 64-bit integer.
  Int,
  /// 64-bit float.
  Float,
  /// Boolean.
  Bool,
}

impl fmt::Display for ValueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueKind::Str => write!(f, "str"),
      ValueKind::Int => write!(f, "int"),
      ValueKind::Float => write!(f, "float"),
      ValueKind::Bool => write!(f, "bool"),
    }
  }
}

/// A single scalar field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  /// String value.
  Str(String),
  /// Integer value.
  Int(i64),
  /// Floating point value.
  Float(f64),
  /// Boolean value.
  Bool(bool),
}

impl Value {
  /// Returns the kind of this value.
  pub fn kind(&self) -> ValueKind {
    match self {
      Value::Str(_) => ValueKind::Str,
      Value::Int(_) => ValueKind::Int,
      Value::Float(_) => ValueKind::Float,
      Value::Bool(_) => ValueKind::Bool,
    }
  }

  /// Returns the string slice if this is a `Str` value.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  /// Returns the integer if this is an `Int` value.
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(n) => Some(*n),
      _ => None,
    }
  }

  /// Feeds the canonical byte representation of this value into `state`.
  ///
  /// Strings contribute their exact UTF-8 bytes followed by a terminator, numbers
  /// their little-endian bytes, and every value is prefixed with a kind tag so
  /// `Str("1")` and `Int(1)` never collide by construction. Used by fields
  /// grouping, which must give the same answer for the same values every time.
  pub fn hash_canonical<H: Hasher>(&self, state: &mut H) {
    match self {
      Value::Str(s) => {
        state.write_u8(0);
        state.write(s.as_bytes());
        state.write_u8(0xff);
      }
      Value::Int(n) => {
        state.write_u8(1);
        state.write(&n.to_le_bytes());
      }
      Value::Float(x) => {
        state.write_u8(2);
        state.write(&x.to_bits().to_le_bytes());
      }
      Value::Bool(b) => {
        state.write_u8(3);
        state.write_u8(u8::from(*b));
      }
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Str(s) => write!(f, "{}", s),
      Value::Int(n) => write!(f, "{}", n),
      Value::Float(x) => write!(f, "{}", x),
      Value::Bool(b) => write!(f, "{}", b),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Int(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Int(i64::from(n))
  }
}

impl From<u64> for Value {
  fn from(n: u64) -> Self {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::Float(x)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

/// A named field in a [`Schema`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
  /// Field name, unique within its schema.
  pub name: String,
  /// Required value kind, or `None` to accept any scalar.
  pub kind: Option<ValueKind>,
}

/// Ordered list of fields a stage emits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
  fields: Vec<Field>,
}

impl Schema {
  /// Creates an untyped schema from field names.
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      fields: names
        .into_iter()
        .map(|name| Field {
          name: name.into(),
          kind: None,
        })
        .collect(),
    }
  }

  /// Creates a schema whose fields each require a value kind.
  pub fn typed<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = (S, ValueKind)>,
    S: Into<String>,
  {
    Self {
      fields: fields
        .into_iter()
        .map(|(name, kind)| Field {
          name: name.into(),
          kind: Some(kind),
        })
        .collect(),
    }
  }

  /// Schema with no fields, for stages that never emit.
  pub fn empty() -> Self {
    Self::default()
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  /// Returns `true` if the schema declares no fields.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// The declared fields, in order.
  pub fn fields(&self) -> &[Field] {
    &self.fields
  }

  /// Iterates over field names in declaration order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.fields.iter().map(|f| f.name.as_str())
  }

  /// Position of the named field, if declared.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.fields.iter().position(|f| f.name == name)
  }

  /// Checks that `values` has one value per field and matches every pinned kind.
  ///
  /// # Errors
  ///
  /// Returns [`StageError::SchemaMismatch`] describing the first disagreement.
  pub fn validate(&self, values: &[Value]) -> Result<(), StageError> {
    if values.len() != self.fields.len() {
      return Err(StageError::SchemaMismatch(format!(
        "expected {} values for {}, got {}",
        self.fields.len(),
        self,
        values.len()
      )));
    }

    for (field, value) in self.fields.iter().zip(values) {
      match field.kind {
        Some(kind) if value.kind() != kind => {
          return Err(StageError::SchemaMismatch(format!(
            "field '{}' expects {}, got {}",
            field.name,
            kind,
            value.kind()
          )));
        }
        _ => {}
      }
    }

    Ok(())
  }

  /// Returns `true` if both schemas name the same fields in the same order and
  /// no field pins conflicting kinds.
  pub fn is_compatible_with(&self, other: &Schema) -> bool {
    self.fields.len() == other.fields.len()
      && self
        .fields
        .iter()
        .zip(&other.fields)
        .all(|(a, b)| a.name == b.name && (a.kind.is_none() || b.kind.is_none() || a.kind == b.kind))
  }
}

impl fmt::Display for Schema {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, field) in self.fields.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", field.name)?;
    }
    write!(f, "]")
  }
}

/// An immutable tuple of values emitted by one stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
  source: Arc<str>,
  schema: Arc<Schema>,
  values: Arc<[Value]>,
}

impl Record {
  /// Builds a record after validating `values` against `schema`.
  ///
  /// # Errors
  ///
  /// Returns [`StageError::SchemaMismatch`] when the values disagree with the schema.
  pub fn try_new(
    source: Arc<str>,
    schema: Arc<Schema>,
    values: Vec<Value>,
  ) -> Result<Self, StageError> {
    schema.validate(&values)?;
    Ok(Self {
      source,
      schema,
      values: values.into(),
    })
  }

  /// Name of the stage that emitted this record.
  pub fn source(&self) -> &str {
    &self.source
  }

  /// Schema the record was validated against.
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// All values, in schema order.
  pub fn values(&self) -> &[Value] {
    &self.values
  }

  /// Value at a field position.
  pub fn get(&self, index: usize) -> Option<&Value> {
    self.values.get(index)
  }

  /// Value of a named field.
  pub fn field(&self, name: &str) -> Option<&Value> {
    self.schema.index_of(name).and_then(|i| self.values.get(i))
  }

  /// String value of a named field, if present and a string.
  pub fn str_field(&self, name: &str) -> Option<&str> {
    self.field(name).and_then(Value::as_str)
  }

  /// Integer value of a named field, if present and an integer.
  pub fn int_field(&self, name: &str) -> Option<i64> {
    self.field(name).and_then(Value::as_int)
  }
}
