//! Batch and single-row INSERT driven by a [`RowMapper`].

use tracing::{debug, warn};

use crate::{
    config::BatchConfig,
    errors::RowMapError,
    executor::Executor,
    row::RowMapper,
    source::{Params, RowSource},
    value::Value,
};

/// Execute a batch operation with automatic chunking for large datasets
pub fn execute_batch<T, F, R>(
    items: &[T],
    config: &BatchConfig,
    mut operation: F,
) -> Result<Vec<R>, RowMapError>
where
    F: FnMut(&[T]) -> Result<Vec<R>, RowMapError>,
{
    if !config.enable_chunking || items.len() <= config.max_batch_size.max(1) {
        return operation(items);
    }

    let mut all_results = Vec::with_capacity(items.len());

    // chunks keep input order
    for chunk in items.chunks(config.max_batch_size.max(1)) {
        let chunk_results = operation(chunk)?;
        all_results.extend(chunk_results);
    }

    Ok(all_results)
}

fn expect_single_rows(table: &str, counts: &[usize]) -> Result<(), RowMapError> {
    if let Some((row, affected)) = counts.iter().enumerate().find(|(_, n)| **n != 1) {
        return Err(RowMapError::write(format!(
            "batch insert into {table} affected {affected} rows for row {row}"
        )));
    }
    Ok(())
}

/// Inserts `rows` with one parameterized statement, binding each row's
/// non-index fields in ordinal order.
pub fn insert_batch<T>(
    exec: &dyn Executor,
    mapper: &RowMapper<T>,
    rows: &[T],
) -> Result<usize, RowMapError> {
    insert_batch_with_config(exec, mapper, rows, &BatchConfig::default())
}

pub fn insert_batch_with_config<T>(
    exec: &dyn Executor,
    mapper: &RowMapper<T>,
    rows: &[T],
    config: &BatchConfig,
) -> Result<usize, RowMapError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let counts = execute_batch(rows, config, |chunk| {
        exec.execute_batch(mapper.insert_sql(), chunk.len(), &mut |row, sink| {
            mapper.apply(sink, &chunk[row])
        })
    })?;
    expect_single_rows(mapper.source_table(), &counts)?;
    debug!(
        target: "rowjoin::write",
        table = %mapper.source_table(),
        rows = counts.len(),
        "batch insert"
    );
    Ok(counts.len())
}

/// Batch insert of rows that were already serialized into insert values.
pub fn insert_value_rows<T>(
    exec: &dyn Executor,
    mapper: &RowMapper<T>,
    rows: &[Vec<Value>],
    config: &BatchConfig,
) -> Result<usize, RowMapError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let counts = execute_batch(rows, config, |chunk| {
        exec.execute_batch(mapper.insert_sql(), chunk.len(), &mut |row, sink| {
            for (pos, value) in chunk[row].iter().enumerate() {
                sink.bind(pos + 1, value.clone())?;
            }
            Ok(())
        })
    })?;
    expect_single_rows(mapper.source_table(), &counts)?;
    Ok(counts.len())
}

/// Inserts one row and returns its id.
///
/// An index id is left out of the INSERT; the generated key is read back
/// (or `MAX(id)` when the store reports none) and written into `row`. Any
/// other id is taken from the serialized values.
pub fn insert_row<T>(
    exec: &dyn Executor,
    mapper: &RowMapper<T>,
    row: &mut T,
) -> Result<Value, RowMapError> {
    let mut params = Params::default();
    mapper.apply(&mut params, row)?;
    let outcome = exec.execute(mapper.insert_sql(), params.values())?;
    if outcome.affected != 1 {
        return Err(RowMapError::write(format!(
            "insert into {} affected {} rows",
            mapper.source_table(),
            outcome.affected
        )));
    }

    let id_field = mapper.id_field();
    let id = if id_field.is_index() {
        let key = match outcome.generated_key {
            Some(key) => key,
            None => {
                warn!(
                    target: "rowjoin::write",
                    table = %mapper.source_table(),
                    "no generated key reported, falling back to MAX(id)"
                );
                max_id(exec, mapper)?
            }
        };
        let id = Value::Long(key);
        id_field.write_value(row, id.clone())?;
        id
    } else {
        id_field
            .insert_ordinal()
            .and_then(|ordinal| params.get(ordinal).cloned())
            .unwrap_or(Value::Null)
    };
    debug!(target: "rowjoin::write", table = %mapper.source_table(), id = ?id, "insert");
    Ok(id)
}

fn max_id<T>(exec: &dyn Executor, mapper: &RowMapper<T>) -> Result<i64, RowMapError> {
    let sql = format!(
        "SELECT MAX({}) AS max_id FROM {}",
        mapper.id_field().column(),
        mapper.source_table()
    );
    let mut rows = exec.query(&sql, &[])?;
    if !rows.advance() {
        return Err(RowMapError::write(format!(
            "no key found for {}",
            mapper.source_table()
        )));
    }
    rows.get("max_id")?.as_i64().ok_or_else(|| {
        RowMapError::write(format!("no key found for {}", mapper.source_table()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_batch_chunks_in_order() {
        let items: Vec<u32> = (0..7).collect();
        let config = BatchConfig {
            max_batch_size: 3,
            enable_chunking: true,
        };
        let mut calls = 0;
        let out = execute_batch(&items, &config, |chunk| {
            calls += 1;
            Ok(chunk.to_vec())
        })
        .unwrap();
        assert_eq!(out, items);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_execute_batch_without_chunking_is_one_call() {
        let items: Vec<u32> = (0..7).collect();
        let config = BatchConfig {
            max_batch_size: 3,
            enable_chunking: false,
        };
        let mut calls = 0;
        execute_batch(&items, &config, |chunk| {
            calls += 1;
            Ok(vec![chunk.len()])
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_wrong_row_count_is_write_failure() {
        assert!(expect_single_rows("t", &[1, 0, 1]).unwrap_err().is_write_failure());
        assert!(expect_single_rows("t", &[1, 1]).is_ok());
    }
}
