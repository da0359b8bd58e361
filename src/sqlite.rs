//! [`Executor`] for rusqlite connections.
//!
//! Timestamps are stored as RFC 3339 text. Query results are buffered into a
//! [`ResultSet`] so the grouped join decoder can step back one row.

use chrono::SecondsFormat;
use rusqlite::{
    Connection, ToSql, params_from_iter,
    types::{ToSqlOutput, ValueRef},
};
use tracing::trace;

use crate::{
    errors::RowMapError,
    executor::{Executor, RowBinder, WriteOutcome},
    source::{Params, ResultSet},
    value::Value,
};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::Long(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Timestamp(v) => ToSqlOutput::Owned(rusqlite::types::Value::Text(
                v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
        };
        Ok(out)
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Result<Value, RowMapError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(v) => Ok(Value::Long(v)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| RowMapError::mapping_caused("column text is not UTF-8", e)),
        ValueRef::Real(v) => Err(RowMapError::mapping(format!(
            "unsupported REAL column value {v}"
        ))),
        ValueRef::Blob(_) => Err(RowMapError::mapping("unsupported BLOB column value")),
    }
}

impl Executor for Connection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet, RowMapError> {
        trace!(target: "rowjoin::sqlite", sql, "query");
        let mut stmt = self
            .prepare_cached(sql)
            .map_err(|e| RowMapError::mapping_caused(format!("prepare '{sql}'"), e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut result = ResultSet::new(columns);
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| RowMapError::mapping_caused(format!("query '{sql}'"), e))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| RowMapError::mapping_caused("read row", e))?
        {
            let mut values = Vec::with_capacity(width);
            for pos in 0..width {
                let value = row
                    .get_ref(pos)
                    .map_err(|e| RowMapError::mapping_caused("read column", e))?;
                values.push(from_sqlite(value)?);
            }
            result.push_row(values)?;
        }
        Ok(result)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<WriteOutcome, RowMapError> {
        trace!(target: "rowjoin::sqlite", sql, "execute");
        let mut stmt = self
            .prepare_cached(sql)
            .map_err(|e| RowMapError::write_caused(format!("prepare '{sql}'"), e))?;
        let affected = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| RowMapError::write_caused(format!("execute '{sql}'"), e))?;
        let rowid = self.last_insert_rowid();
        Ok(WriteOutcome {
            affected,
            generated_key: (affected > 0 && rowid > 0).then_some(rowid),
        })
    }

    fn execute_batch(
        &self,
        sql: &str,
        rows: usize,
        binder: &mut RowBinder<'_>,
    ) -> Result<Vec<usize>, RowMapError> {
        trace!(target: "rowjoin::sqlite", sql, rows, "execute batch");
        let mut stmt = self
            .prepare_cached(sql)
            .map_err(|e| RowMapError::write_caused(format!("prepare '{sql}'"), e))?;
        let mut counts = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut params = Params::default();
            binder(row, &mut params)?;
            let affected = stmt
                .execute(params_from_iter(params.values().iter()))
                .map_err(|e| RowMapError::write_caused(format!("execute '{sql}' row {row}"), e))?;
            counts.push(affected);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::source::RowSource;

    #[test]
    fn test_round_trip_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, at TEXT, n BIGINT)")
            .unwrap();
        let at = Utc.with_ymd_and_hms(2023, 5, 6, 7, 8, 9).unwrap();
        let outcome = Executor::execute(
            &conn,
            "INSERT INTO t (at, n) VALUES (?1, ?2)",
            &[Value::Timestamp(at), Value::Null],
        )
        .unwrap();
        assert_eq!(outcome, WriteOutcome { affected: 1, generated_key: Some(1) });

        let mut rows = conn.query("SELECT id, at, n FROM t", &[]).unwrap();
        assert!(rows.advance());
        assert_eq!(rows.get("id").unwrap(), Value::Long(1));
        assert_eq!(rows.get("at").unwrap(), Value::Text(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        assert_eq!(rows.get("n").unwrap(), Value::Null);
        assert!(!rows.advance());
    }

    #[test]
    fn test_driver_failures_are_wrapped() {
        let conn = Connection::open_in_memory().unwrap();
        let err = Executor::execute(&conn, "INSERT INTO missing (a) VALUES (?1)", &[Value::Long(1)])
            .unwrap_err();
        assert!(err.is_write_failure());
        let err = conn.query("SELECT nope FROM missing", &[]).unwrap_err();
        assert!(err.is_mapping());
    }

    #[test]
    fn test_binder_errors_pass_through_unchanged() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n BIGINT)").unwrap();
        let err = Executor::execute_batch(&conn, "INSERT INTO t (n) VALUES (?1)", 2, &mut |_, _| {
            Err(RowMapError::setup("no ordinal"))
        })
        .unwrap_err();
        assert!(err.is_setup());
    }
}
