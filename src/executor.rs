//! Statement execution boundary.

use crate::{errors::RowMapError, source::{ResultSet, StatementSink}, value::Value};

/// Result of a single write statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub affected: usize,
    /// Key generated by the store, when it reports one.
    pub generated_key: Option<i64>,
}

/// Binds the parameters of the `n`-th row of a batch.
pub type RowBinder<'a> =
    dyn FnMut(usize, &mut dyn StatementSink) -> Result<(), RowMapError> + 'a;

/// What the mappers need from a database connection.
///
/// Implementations do not begin or commit transactions; callers wrap
/// multi-statement work in their own.
pub trait Executor {
    fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet, RowMapError>;

    fn execute(&self, sql: &str, params: &[Value]) -> Result<WriteOutcome, RowMapError>;

    /// Runs `sql` once per row, binding each through `binder`. Returns the
    /// affected count of every execution.
    fn execute_batch(
        &self,
        sql: &str,
        rows: usize,
        binder: &mut RowBinder<'_>,
    ) -> Result<Vec<usize>, RowMapError>;
}
