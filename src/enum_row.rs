//! Rows backed by a fixed set of constants.
//!
//! The table mirrors the constants; reads resolve ids to the existing
//! constant and never construct a new value. There is no delete path.

use ahash::AHashMap;
use tracing::debug;

use crate::{errors::RowMapError, row::RowMapper, source::RowSource, value::Value};

#[derive(Debug)]
pub struct EnumMapper<T: 'static> {
    rows: RowMapper<T>,
    constants: &'static [T],
    by_id: AHashMap<i64, usize>,
}

impl<T: 'static> EnumMapper<T> {
    /// Builds the lookup table. Every constant needs a distinct integer id;
    /// the mapper must not carry a row factory.
    pub fn new(rows: RowMapper<T>, constants: &'static [T]) -> Result<Self, RowMapError> {
        let mut by_id = AHashMap::with_capacity(constants.len());
        for (ordinal, constant) in constants.iter().enumerate() {
            let id = rows.id_value(constant).as_i64().ok_or_else(|| {
                RowMapError::setup(format!(
                    "constant {ordinal} of '{}' has no integer id",
                    rows.table()
                ))
            })?;
            if by_id.insert(id, ordinal).is_some() {
                return Err(RowMapError::setup(format!(
                    "duplicate id {id} among constants of '{}'",
                    rows.table()
                )));
            }
        }
        debug!(
            target: "rowjoin::row",
            table = %rows.table(),
            constants = constants.len(),
            "enum lookup table built"
        );
        Ok(Self {
            rows,
            constants,
            by_id,
        })
    }

    pub fn rows(&self) -> &RowMapper<T> {
        &self.rows
    }

    pub fn constants(&self) -> &'static [T] {
        self.constants
    }

    pub fn lookup(&self, id: i64) -> Result<&'static T, RowMapError> {
        let constants = self.constants;
        self.by_id
            .get(&id)
            .map(|ordinal| &constants[*ordinal])
            .ok_or_else(|| {
                RowMapError::mapping(format!("no constant with id {id} in '{}'", self.rows.table()))
            })
    }

    /// Reads only the id column of the current row.
    pub fn map_row(&self, source: &dyn RowSource) -> Result<Option<&'static T>, RowMapError> {
        let id_field = self.rows.id_field();
        match source.get(id_field.name())? {
            Value::Null => Ok(None),
            value => {
                let id = value.as_i64().ok_or_else(|| {
                    RowMapError::mapping(format!("id of '{}' is not an integer", self.rows.table()))
                })?;
                self.lookup(id).map(Some)
            }
        }
    }
}
