//! Per-field conversion between a row struct and its storage column.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::{
    column::{ColumnKind, ColumnType},
    errors::RowMapError,
    source::{RowSource, StatementSink},
    value::{SqlType, Value},
};

type Ser<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;
type Des<I, O> = Arc<dyn Fn(O) -> Result<I, RowMapError> + Send + Sync>;

/// How a field is written back into its container.
pub enum Setter<C, I> {
    Writable(fn(&mut C, Option<I>)),
    /// Backed by immutable data; every write fails.
    Immutable,
}

impl<C, I> Clone for Setter<C, I> {
    fn clone(&self) -> Self {
        match self {
            Setter::Writable(set) => Setter::Writable(*set),
            Setter::Immutable => Setter::Immutable,
        }
    }
}

/// Bidirectional mapping of one field of `C`, held in memory as `I` and
/// stored as `O`.
pub struct FieldMapper<C, I, O> {
    name: String,
    column: String,
    ordinal: OnceCell<usize>,
    column_type: ColumnType<O>,
    get: fn(&C) -> Option<I>,
    set: Setter<C, I>,
    ser: Ser<I, O>,
    des: Des<I, O>,
}

impl<C, I, O> Clone for FieldMapper<C, I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            column: self.column.clone(),
            ordinal: self.ordinal.clone(),
            column_type: self.column_type,
            get: self.get,
            set: self.set.clone(),
            ser: Arc::clone(&self.ser),
            des: Arc::clone(&self.des),
        }
    }
}

impl<C, I, O> fmt::Debug for FieldMapper<C, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapper")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("ordinal", &self.ordinal.get())
            .field("column_type", &self.column_type)
            .finish()
    }
}

impl<C, V: SqlType> FieldMapper<C, V, V> {
    /// Field stored as-is.
    pub fn new(
        name: &str,
        column_type: ColumnType<V>,
        get: fn(&C) -> Option<V>,
        set: fn(&mut C, Option<V>),
    ) -> Self {
        Self::converted(name, column_type, get, set, |v| v, |v| Ok(v))
    }

    /// Field populated only at construction; writes through the mapper fail.
    pub fn immutable(name: &str, column_type: ColumnType<V>, get: fn(&C) -> Option<V>) -> Self {
        let mut field = Self::new(name, column_type, get, |_, _| {});
        field.set = Setter::Immutable;
        field
    }
}

impl<C> FieldMapper<C, serde_json::Value, String> {
    /// JSON document stored as unbounded text.
    pub fn json(
        name: &str,
        get: fn(&C) -> Option<serde_json::Value>,
        set: fn(&mut C, Option<serde_json::Value>),
    ) -> Self {
        Self::converted(
            name,
            ColumnType::TEXT,
            get,
            set,
            |doc| doc.to_string(),
            |text| {
                serde_json::from_str(&text)
                    .map_err(|e| RowMapError::mapping_caused("invalid JSON column", e))
            },
        )
    }
}

impl<C, I, O: SqlType> FieldMapper<C, I, O> {
    /// Field with a conversion between the in-memory and stored types.
    pub fn converted<S, D>(
        name: &str,
        column_type: ColumnType<O>,
        get: fn(&C) -> Option<I>,
        set: fn(&mut C, Option<I>),
        ser: S,
        des: D,
    ) -> Self
    where
        S: Fn(I) -> O + Send + Sync + 'static,
        D: Fn(O) -> Result<I, RowMapError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            ordinal: OnceCell::new(),
            column_type,
            get,
            set: Setter::Writable(set),
            ser: Arc::new(ser),
            des: Arc::new(des),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType<O> {
        self.column_type
    }

    pub fn ser(&self, internal: Option<I>) -> Option<O> {
        internal.map(|v| self.column_type.limit((self.ser)(v)))
    }

    pub fn des(&self, external: Option<O>) -> Result<Option<I>, RowMapError> {
        external.map(|v| (self.des)(v)).transpose()
    }

    pub fn ser_from(&self, container: &C) -> Option<O> {
        self.ser((self.get)(container))
    }

    pub fn des_to(&self, container: &mut C, external: Option<O>) -> Result<(), RowMapError> {
        let set = match &self.set {
            Setter::Writable(set) => *set,
            Setter::Immutable => {
                return Err(RowMapError::setup(format!(
                    "field '{}' is backed by immutable data and cannot be set",
                    self.name
                )));
            }
        };
        let internal = self.des(external)?;
        set(container, internal);
        Ok(())
    }

    pub fn insert_ordinal(&self) -> Option<usize> {
        self.ordinal.get().copied()
    }

    /// Assigns the INSERT position. Repeating the same ordinal is a no-op.
    pub fn set_insert_ordinal(&self, ordinal: usize) -> Result<(), RowMapError> {
        let current = *self.ordinal.get_or_init(|| ordinal);
        if current != ordinal {
            return Err(RowMapError::setup(format!(
                "field '{}' already has insert ordinal {current}, refusing {ordinal}",
                self.name
            )));
        }
        Ok(())
    }

    /// Binds `value` at this field's ordinal.
    pub fn apply(&self, sink: &mut dyn StatementSink, value: Option<O>) -> Result<(), RowMapError> {
        let ordinal = self.insert_ordinal().ok_or_else(|| {
            RowMapError::setup(format!("field '{}' has no insert ordinal", self.name))
        })?;
        match value {
            Some(v) => sink.bind(ordinal, v.into_value()),
            None => sink.bind_null(ordinal, self.column_type.kind()),
        }
    }

    fn read_external(&self, value: Value) -> Result<Option<O>, RowMapError> {
        if value.is_null() {
            Ok(None)
        } else {
            O::from_value(value).map(Some)
        }
    }
}

/// Type-erased view of a [`FieldMapper`] over container `C`.
pub trait Field<C>: Send + Sync {
    fn name(&self) -> &str;

    /// Physical column name. Unchanged by renaming.
    fn column(&self) -> &str;

    fn kind(&self) -> ColumnKind;

    fn is_index(&self) -> bool {
        self.kind() == ColumnKind::Index
    }

    fn insert_ordinal(&self) -> Option<usize>;

    fn set_insert_ordinal(&self, ordinal: usize) -> Result<(), RowMapError>;

    fn value_from(&self, container: &C) -> Value;

    fn write_value(&self, container: &mut C, value: Value) -> Result<(), RowMapError>;

    /// Reads this field's column from `source` into the row under construction.
    fn read_into(&self, init: &mut RowInit<C>, source: &dyn RowSource) -> Result<(), RowMapError>;

    fn apply_from(&self, sink: &mut dyn StatementSink, container: &C) -> Result<(), RowMapError>;

    fn renamed(&self, name: String) -> Arc<dyn Field<C>>;
}

impl<C, I, O> Field<C> for FieldMapper<C, I, O>
where
    C: 'static,
    I: 'static,
    O: SqlType,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn column(&self) -> &str {
        &self.column
    }

    fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }

    fn insert_ordinal(&self) -> Option<usize> {
        FieldMapper::insert_ordinal(self)
    }

    fn set_insert_ordinal(&self, ordinal: usize) -> Result<(), RowMapError> {
        FieldMapper::set_insert_ordinal(self, ordinal)
    }

    fn value_from(&self, container: &C) -> Value {
        self.ser_from(container).map_or(Value::Null, SqlType::into_value)
    }

    fn write_value(&self, container: &mut C, value: Value) -> Result<(), RowMapError> {
        let external = self.read_external(value)?;
        self.des_to(container, external)
    }

    fn read_into(&self, init: &mut RowInit<C>, source: &dyn RowSource) -> Result<(), RowMapError> {
        let external = self.read_external(source.get(&self.name)?)?;
        if external.is_some() {
            init.resolved += 1;
        }
        self.des_to(&mut init.row, external)
    }

    fn apply_from(&self, sink: &mut dyn StatementSink, container: &C) -> Result<(), RowMapError> {
        self.apply(sink, self.ser_from(container))
    }

    fn renamed(&self, name: String) -> Arc<dyn Field<C>> {
        let mut field = self.clone();
        field.name = name;
        Arc::new(field)
    }
}

/// Owns a row while its fields are being populated.
///
/// Only the row mapper creates one; [`RowInit::finish`] hands the row out
/// unless every field came back null.
pub struct RowInit<C> {
    row: C,
    resolved: usize,
}

impl<C> RowInit<C> {
    pub(crate) fn new(row: C) -> Self {
        Self { row, resolved: 0 }
    }

    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn finish(self) -> Option<C> {
        (self.resolved > 0).then_some(self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Params, ResultSet};

    #[derive(Debug, Default, PartialEq)]
    struct Item {
        id: Option<i64>,
        label: Option<String>,
    }

    fn label_field() -> FieldMapper<Item, String, String> {
        FieldMapper::new(
            "label",
            ColumnType::SHORT_STRING,
            |i| i.label.clone(),
            |i, v| i.label = v,
        )
    }

    #[test]
    fn test_null_passes_through_both_directions() {
        let field = label_field();
        assert_eq!(field.ser(None), None);
        assert_eq!(field.des(None).unwrap(), None);
    }

    #[test]
    fn test_ser_applies_column_limit() {
        let field = label_field();
        let out = field.ser(Some("abcdefghijklmnopq".into())).unwrap();
        assert_eq!(out, "abcdefghijklmno");
    }

    #[test]
    fn test_same_ordinal_twice_is_noop() {
        let field = label_field();
        field.set_insert_ordinal(2).unwrap();
        field.set_insert_ordinal(2).unwrap();
        assert_eq!(field.insert_ordinal(), Some(2));
    }

    #[test]
    fn test_conflicting_ordinal_is_setup_error() {
        let field = label_field();
        field.set_insert_ordinal(1).unwrap();
        let err = field.set_insert_ordinal(2).unwrap_err();
        assert!(err.is_setup());
        assert_eq!(field.insert_ordinal(), Some(1));
    }

    #[test]
    fn test_apply_requires_ordinal() {
        let field = label_field();
        let mut params = Params::default();
        assert!(field.apply(&mut params, Some("x".into())).unwrap_err().is_setup());
        field.set_insert_ordinal(1).unwrap();
        field.apply(&mut params, None).unwrap();
        assert_eq!(params.values(), &[Value::Null]);
    }

    #[test]
    fn test_immutable_setter_always_fails() {
        let field: FieldMapper<Item, i64, i64> =
            FieldMapper::immutable("id", ColumnType::LONG, |i| i.id);
        let mut item = Item::default();
        assert!(field.des_to(&mut item, Some(4)).unwrap_err().is_setup());
        assert!(field.des_to(&mut item, None).unwrap_err().is_setup());
        assert_eq!(item.id, None);
    }

    #[test]
    fn test_converted_field_round_trips() {
        let field: FieldMapper<Item, i64, String> = FieldMapper::converted(
            "id",
            ColumnType::LONG_STRING,
            |i| i.id,
            |i, v| i.id = v,
            |v| format!("#{v}"),
            |s| {
                s.trim_start_matches('#')
                    .parse()
                    .map_err(|e| RowMapError::mapping_caused("bad id", e))
            },
        );
        let external = field.ser(Some(42));
        assert_eq!(external.as_deref(), Some("#42"));
        assert_eq!(field.des(external).unwrap(), Some(42));
        assert!(field.des(Some("#x".into())).unwrap_err().is_mapping());
    }

    #[test]
    fn test_read_into_counts_resolved_fields() {
        let field = label_field();
        let mut rows = ResultSet::new(vec!["label".into()])
            .with_row(vec![Value::Null])
            .unwrap();
        rows.advance();
        let mut init = RowInit::new(Item::default());
        field.read_into(&mut init, &rows).unwrap();
        assert_eq!(init.resolved(), 0);
        assert!(init.finish().is_none());
    }

    #[test]
    fn test_renamed_keeps_column_and_ordinal() {
        let field = label_field();
        field.set_insert_ordinal(3).unwrap();
        let renamed = Field::renamed(&field, "1__label".to_string());
        assert_eq!(renamed.name(), "1__label");
        assert_eq!(renamed.column(), "label");
        assert_eq!(renamed.insert_ordinal(), Some(3));
    }

    #[test]
    fn test_json_field_rejects_garbage() {
        let field: FieldMapper<Item, serde_json::Value, String> =
            FieldMapper::json("doc", |_| None, |_, _| {});
        let doc = serde_json::json!({"k": [1, 2]});
        let text = field.ser(Some(doc.clone()));
        assert_eq!(field.des(text).unwrap(), Some(doc));
        assert!(field.des(Some("{".into())).unwrap_err().is_mapping());
    }
}
