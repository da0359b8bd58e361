//! Storage column descriptors and their value-limiting rules.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::value::SqlType;

/// Character limit of [`ColumnType::SHORT_STRING`].
pub const SHORT_STRING_LEN: usize = 15;
/// Character limit of [`ColumnType::LONG_STRING`].
pub const LONG_STRING_LEN: usize = 255;

/// Untyped column kind, used for DDL and null binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Auto-generated integer key. Never part of an INSERT.
    Index,
    Int,
    Long,
    /// Fixed-length string limited to the given number of characters.
    String(usize),
    /// Unbounded text.
    Text,
    Timestamp,
}

impl ColumnKind {
    pub fn sql_type(&self) -> String {
        match self {
            ColumnKind::Index => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            ColumnKind::Int => "INTEGER".to_string(),
            ColumnKind::Long => "BIGINT".to_string(),
            ColumnKind::String(len) => format!("VARCHAR({len})"),
            ColumnKind::Text => "TEXT".to_string(),
            ColumnKind::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

/// Typed column descriptor for external type `O`.
pub struct ColumnType<O> {
    kind: ColumnKind,
    _external: PhantomData<fn() -> O>,
}

impl<O> Clone for ColumnType<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for ColumnType<O> {}

impl<O> fmt::Debug for ColumnType<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ColumnType").field(&self.kind).finish()
    }
}

impl<O> PartialEq for ColumnType<O> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl<O> ColumnType<O> {
    const fn of(kind: ColumnKind) -> Self {
        Self {
            kind,
            _external: PhantomData,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn is_index(&self) -> bool {
        self.kind == ColumnKind::Index
    }
}

impl ColumnType<i64> {
    pub const INDEX: Self = Self::of(ColumnKind::Index);
    pub const LONG: Self = Self::of(ColumnKind::Long);
}

impl ColumnType<i32> {
    pub const INT: Self = Self::of(ColumnKind::Int);
}

impl ColumnType<String> {
    pub const SHORT_STRING: Self = Self::of(ColumnKind::String(SHORT_STRING_LEN));
    pub const LONG_STRING: Self = Self::of(ColumnKind::String(LONG_STRING_LEN));
    pub const TEXT: Self = Self::of(ColumnKind::Text);

    pub const fn fixed(len: usize) -> Self {
        Self::of(ColumnKind::String(len))
    }
}

impl ColumnType<DateTime<Utc>> {
    pub const TIMESTAMP: Self = Self::of(ColumnKind::Timestamp);
}

impl<O: SqlType> ColumnType<O> {
    /// Applies the column's limiting rule. Fixed-length strings keep their
    /// first N characters; everything else passes through.
    pub fn limit(&self, value: O) -> O {
        match self.kind {
            ColumnKind::String(len) => value.truncated(len),
            _ => value,
        }
    }
}
