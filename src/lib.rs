//! Row mapping and join stitching over SQLite.
//!
//! Field mappers convert one struct field to a storage value and back, row
//! mappers compose them into a table, and joining row mappers read a primary
//! table together with its related tables in one SELECT, folding each group
//! of rows back into one value. Repositories drive the common reads and the
//! cascading writes through an [`Executor`].
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod batch;
pub mod column;
pub mod config;
pub mod enum_row;
pub mod errors;
pub mod executor;
pub mod field;
pub mod join;
pub mod joining;
pub mod repository;
pub mod row;
pub mod schema;
pub mod source;
pub mod sqlite;
pub mod value;

pub use crate::batch::{insert_batch, insert_batch_with_config, insert_row};
pub use crate::column::{ColumnKind, ColumnType};
pub use crate::config::{BatchConfig, JoinConfig, RepositoryConfig};
pub use crate::enum_row::EnumMapper;
pub use crate::errors::RowMapError;
pub use crate::executor::{Executor, WriteOutcome};
pub use crate::field::{Field, FieldMapper, RowInit};
pub use crate::join::{
    Accessor, Cardinality, DeleteCascade, GetterState, InsertCascade, JoinOp, JoinSpec, Related,
};
pub use crate::joining::{JoinEdge, JoinGraph, JoinNode, JoiningBuilder, JoiningRowMapper};
pub use crate::repository::{EnumRepository, JoinedRepository, Repository};
pub use crate::row::{RowMapper, RowMapperBuilder};
pub use crate::source::{Params, ResultSet, RowSource, StatementSink};
pub use crate::value::{SqlType, Value};
