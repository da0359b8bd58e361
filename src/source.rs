//! Row-source and statement-sink abstractions consumed by the mappers.
//!
//! [`ResultSet`] is a buffered cursor over query results and [`Params`] a
//! positional parameter list; drivers fill the former and drain the latter.

use ahash::AHashMap;

use crate::{column::ColumnKind, errors::RowMapError, value::Value};

/// Cursor over rows, addressed by column name.
pub trait RowSource {
    /// Reads a column of the current row.
    fn get(&self, name: &str) -> Result<Value, RowMapError>;

    /// Moves to the next row. Returns `false` once the cursor is past the end.
    fn advance(&mut self) -> bool;

    /// Moves back one row.
    fn rewind(&mut self);

    fn is_end(&self) -> bool;
}

/// Positional parameter binding, 1-based like SQL placeholders.
pub trait StatementSink {
    fn bind(&mut self, ordinal: usize, value: Value) -> Result<(), RowMapError>;

    fn bind_null(&mut self, ordinal: usize, kind: ColumnKind) -> Result<(), RowMapError>;
}

/// Fully buffered rows with a rewindable cursor.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    columns: Vec<String>,
    index: AHashMap<String, usize>,
    rows: Vec<Vec<Value>>,
    // 0 = before the first row, rows.len() + 1 = past the end
    cursor: usize,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.clone(), pos))
            .collect();
        Self {
            columns,
            index,
            rows: Vec::new(),
            cursor: 0,
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), RowMapError> {
        if row.len() != self.columns.len() {
            return Err(RowMapError::mapping(format!(
                "row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self, RowMapError> {
        self.push_row(row)?;
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 1-based position of the current row, 0 before the first row.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl RowSource for ResultSet {
    fn get(&self, name: &str) -> Result<Value, RowMapError> {
        if self.cursor == 0 || self.cursor > self.rows.len() {
            return Err(RowMapError::mapping(format!(
                "cursor is not on a row while reading '{name}'"
            )));
        }
        let pos = self
            .index
            .get(name)
            .ok_or_else(|| RowMapError::mapping(format!("no column named '{name}'")))?;
        Ok(self.rows[self.cursor - 1][*pos].clone())
    }

    fn advance(&mut self) -> bool {
        if self.cursor <= self.rows.len() {
            self.cursor += 1;
        }
        self.cursor <= self.rows.len()
    }

    fn rewind(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn is_end(&self) -> bool {
        self.cursor > self.rows.len()
    }
}

/// Positional parameters collected from a [`StatementSink`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: Vec<Value>,
}

impl Params {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        ordinal.checked_sub(1).and_then(|pos| self.values.get(pos))
    }

    fn slot(&mut self, ordinal: usize) -> Result<&mut Value, RowMapError> {
        if ordinal == 0 {
            return Err(RowMapError::setup("parameter ordinals start at 1"));
        }
        if self.values.len() < ordinal {
            self.values.resize(ordinal, Value::Null);
        }
        Ok(&mut self.values[ordinal - 1])
    }
}

impl StatementSink for Params {
    fn bind(&mut self, ordinal: usize, value: Value) -> Result<(), RowMapError> {
        *self.slot(ordinal)? = value;
        Ok(())
    }

    fn bind_null(&mut self, ordinal: usize, _kind: ColumnKind) -> Result<(), RowMapError> {
        *self.slot(ordinal)? = Value::Null;
        Ok(())
    }
}
