use tracing::debug;

use crate::{column::ColumnKind, errors::RowMapError, executor::Executor, row::RowMapper};

/// `CREATE TABLE IF NOT EXISTS` for the physical table behind `mapper`.
///
/// An index id becomes `INTEGER PRIMARY KEY AUTOINCREMENT`; any other id is
/// a plain primary key whose values the caller supplies.
pub fn create_table_sql<T>(mapper: &RowMapper<T>) -> String {
    let id_column = mapper.id_field().column().to_string();
    let columns: Vec<String> = mapper
        .fields()
        .iter()
        .map(|field| {
            let kind = field.kind();
            if field.column() == id_column && kind != ColumnKind::Index {
                format!("{} {} PRIMARY KEY", field.column(), kind.sql_type())
            } else {
                format!("{} {}", field.column(), kind.sql_type())
            }
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        mapper.source_table(),
        columns.join(", ")
    )
}

pub fn ensure_table<T>(exec: &dyn Executor, mapper: &RowMapper<T>) -> Result<(), RowMapError> {
    let sql = create_table_sql(mapper);
    exec.execute(&sql, &[])?;
    debug!(target: "rowjoin::schema", table = %mapper.source_table(), "table ensured");
    Ok(())
}
