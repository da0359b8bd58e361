//! Repositories tie a mapper to an [`Executor`] for the common reads and
//! writes: get by id, find by field, insert with cascades, delete.
//!
//! None of these open transactions. Cascading writes issue several
//! statements; callers wanting all-or-nothing behaviour wrap the call in a
//! transaction on their connection.

use tracing::{debug, info};

use crate::{
    batch,
    config::RepositoryConfig,
    enum_row::EnumMapper,
    errors::RowMapError,
    executor::Executor,
    joining::{JoiningBuilder, JoiningRowMapper},
    row::RowMapper,
    schema,
    source::RowSource,
    value::Value,
};

/// Reads and writes rows of a single table.
pub struct Repository<T> {
    mapper: RowMapper<T>,
    config: RepositoryConfig,
}

impl<T: 'static> Repository<T> {
    pub fn new(mapper: RowMapper<T>) -> Self {
        Self::with_config(mapper, RepositoryConfig::default())
    }

    pub fn with_config(mapper: RowMapper<T>, config: RepositoryConfig) -> Self {
        Self { mapper, config }
    }

    pub fn mapper(&self) -> &RowMapper<T> {
        &self.mapper
    }

    pub fn create_table(&self, exec: &dyn Executor) -> Result<(), RowMapError> {
        schema::ensure_table(exec, &self.mapper)
    }

    /// Inserts `row` and writes a generated id back into it.
    pub fn insert(&self, exec: &dyn Executor, row: &mut T) -> Result<Value, RowMapError> {
        batch::insert_row(exec, &self.mapper, row)
    }

    /// Batch insert; generated ids are not read back.
    pub fn insert_all(&self, exec: &dyn Executor, rows: &[T]) -> Result<usize, RowMapError> {
        batch::insert_batch_with_config(exec, &self.mapper, rows, &self.config.batch)
    }

    pub fn get(&self, exec: &dyn Executor, id: impl Into<Value>) -> Result<Option<T>, RowMapError> {
        let sql = format!(
            "{} WHERE {} = ?1",
            self.mapper.select_sql(),
            self.mapper.qualified_id()
        );
        let mut rows = exec.query(&sql, &[id.into()])?;
        let mut found = self.mapper.map_all(&mut rows)?;
        if found.len() > 1 {
            return Err(RowMapError::too_many(format!(
                "{} rows of '{}' share one id",
                found.len(),
                self.mapper.source_table()
            )));
        }
        Ok(found.pop())
    }

    /// Rows whose `column` equals `value`, in id order.
    pub fn find_by(
        &self,
        exec: &dyn Executor,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<T>, RowMapError> {
        let field = self.mapper.field_by_column(column).ok_or_else(|| {
            RowMapError::setup(format!(
                "'{}' has no column '{column}'",
                self.mapper.source_table()
            ))
        })?;
        let sql = format!(
            "{} WHERE {} = ?1 ORDER BY {}",
            self.mapper.select_sql(),
            self.mapper.qualified_column(field.as_ref()),
            self.mapper.qualified_id()
        );
        let mut rows = exec.query(&sql, &[value.into()])?;
        self.mapper.map_all(&mut rows)
    }

    pub fn all(&self, exec: &dyn Executor) -> Result<Vec<T>, RowMapError> {
        let sql = format!(
            "{} ORDER BY {}",
            self.mapper.select_sql(),
            self.mapper.qualified_id()
        );
        let mut rows = exec.query(&sql, &[])?;
        self.mapper.map_all(&mut rows)
    }

    /// Deletes by id and returns the number of rows removed.
    pub fn delete(&self, exec: &dyn Executor, id: impl Into<Value>) -> Result<usize, RowMapError> {
        Ok(exec.execute(&self.mapper.delete_sql(), &[id.into()])?.affected)
    }
}

/// Reads and writes a primary table together with its joins.
pub struct JoinedRepository<T> {
    mapper: JoiningRowMapper<T>,
    config: RepositoryConfig,
}

impl<T: 'static> JoinedRepository<T> {
    pub fn new(builder: &JoiningBuilder<T>) -> Result<Self, RowMapError> {
        Self::with_config(builder, RepositoryConfig::default())
    }

    pub fn with_config(
        builder: &JoiningBuilder<T>,
        config: RepositoryConfig,
    ) -> Result<Self, RowMapError> {
        let mapper = builder.build_with_config(&config.join)?;
        Ok(Self { mapper, config })
    }

    pub fn mapper(&self) -> &JoiningRowMapper<T> {
        &self.mapper
    }

    /// Creates every table of the primary row mapper. Related tables are
    /// created through their own repositories.
    pub fn create_table(&self, exec: &dyn Executor) -> Result<(), RowMapError> {
        schema::ensure_table(exec, self.mapper.base())
    }

    /// Primary row `id` with its joins.
    ///
    /// Joined rows of one id fold into a single group, so duplicate primary
    /// ids are counted on the primary table before the joined read.
    pub fn get(&self, exec: &dyn Executor, id: impl Into<Value>) -> Result<Option<T>, RowMapError> {
        let id = id.into();
        let base = self.mapper.base();
        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {} = ?1",
            base.from_table(),
            base.qualified_id()
        );
        let mut counted = exec.query(&count_sql, std::slice::from_ref(&id))?;
        let n = if counted.advance() {
            counted.get("n")?.as_i64().unwrap_or(0)
        } else {
            0
        };
        if n == 0 {
            return Ok(None);
        }
        if n > 1 {
            return Err(RowMapError::too_many(format!(
                "{n} rows of '{}' share one id",
                base.source_table()
            )));
        }

        let sql = format!(
            "{} WHERE {} = ?1 {}",
            self.mapper.select_sql(),
            self.mapper.primary().qualified_id(),
            self.mapper.order_by()
        );
        let mut rows = exec.query(&sql, &[id])?;
        if !rows.advance() {
            return Ok(None);
        }
        self.mapper.map_row(&mut rows)
    }

    /// Primary rows whose `column` equals `value`, with their joins.
    pub fn find_by(
        &self,
        exec: &dyn Executor,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<T>, RowMapError> {
        let primary = self.mapper.primary();
        let field = primary.field_by_column(column).ok_or_else(|| {
            RowMapError::setup(format!(
                "'{}' has no column '{column}'",
                primary.source_table()
            ))
        })?;
        let sql = format!(
            "{} WHERE {} = ?1 {}",
            self.mapper.select_sql(),
            primary.qualified_column(field.as_ref()),
            self.mapper.order_by()
        );
        let mut rows = exec.query(&sql, &[value.into()])?;
        self.mapper.map_all(&mut rows)
    }

    pub fn all(&self, exec: &dyn Executor) -> Result<Vec<T>, RowMapError> {
        let sql = format!("{} {}", self.mapper.select_sql(), self.mapper.order_by());
        let mut rows = exec.query(&sql, &[])?;
        self.mapper.map_all(&mut rows)
    }

    /// Inserts `row` with its insert cascades and returns the primary id.
    pub fn insert(&self, exec: &dyn Executor, row: &mut T) -> Result<Value, RowMapError> {
        insert_graph(exec, &self.mapper, row, &self.config)
    }

    /// Deletes `row` after its delete cascades. Returns every row removed.
    pub fn delete(&self, exec: &dyn Executor, row: &T) -> Result<usize, RowMapError> {
        delete_graph(exec, &self.mapper, row)
    }
}

/// Reads rows that resolve to a fixed set of constants.
pub struct EnumRepository<T: 'static> {
    mapper: EnumMapper<T>,
    config: RepositoryConfig,
}

impl<T: 'static> EnumRepository<T> {
    pub fn new(mapper: EnumMapper<T>) -> Result<Self, RowMapError> {
        if mapper.rows().id_field().is_index() {
            return Err(RowMapError::setup(format!(
                "'{}' needs an explicit id column to mirror its constants",
                mapper.rows().table()
            )));
        }
        Ok(Self {
            mapper,
            config: RepositoryConfig::default(),
        })
    }

    pub fn mapper(&self) -> &EnumMapper<T> {
        &self.mapper
    }

    pub fn create_table(&self, exec: &dyn Executor) -> Result<(), RowMapError> {
        schema::ensure_table(exec, self.mapper.rows())
    }

    /// Writes one row per constant.
    pub fn populate(&self, exec: &dyn Executor) -> Result<usize, RowMapError> {
        let inserted = batch::insert_batch_with_config(
            exec,
            self.mapper.rows(),
            self.mapper.constants(),
            &self.config.batch,
        )?;
        info!(
            target: "rowjoin::write",
            table = %self.mapper.rows().source_table(),
            rows = inserted,
            "enum table populated"
        );
        Ok(inserted)
    }

    pub fn get(
        &self,
        exec: &dyn Executor,
        id: impl Into<Value>,
    ) -> Result<Option<&'static T>, RowMapError> {
        let rows_mapper = self.mapper.rows();
        let sql = format!(
            "{} WHERE {} = ?1",
            rows_mapper.select_sql(),
            rows_mapper.qualified_id()
        );
        let mut rows = exec.query(&sql, &[id.into()])?;
        if !rows.advance() {
            return Ok(None);
        }
        let found = self.mapper.map_row(&rows)?;
        if rows.advance() {
            return Err(RowMapError::too_many(format!(
                "more than one '{}' row shares one id",
                rows_mapper.source_table()
            )));
        }
        Ok(found)
    }
}

/// Before-cascades, the parent row, then after-cascades.
pub(crate) fn insert_graph<P: 'static>(
    exec: &dyn Executor,
    mapper: &JoiningRowMapper<P>,
    row: &mut P,
    config: &RepositoryConfig,
) -> Result<Value, RowMapError> {
    for join in mapper.joins() {
        join.insert_before(exec, row, config)?;
    }
    let id = batch::insert_row(exec, mapper.base(), row)?;
    for join in mapper.joins() {
        join.insert_after(exec, row, config)?;
    }
    debug!(
        target: "rowjoin::write",
        table = %mapper.base().source_table(),
        id = ?id,
        joins = mapper.join_count(),
        "graph inserted"
    );
    Ok(id)
}

/// Related rows first, then the parent by id.
pub(crate) fn delete_graph<P: 'static>(
    exec: &dyn Executor,
    mapper: &JoiningRowMapper<P>,
    row: &P,
) -> Result<usize, RowMapError> {
    let mut deleted = 0;
    for join in mapper.joins() {
        deleted += join.delete_related(exec, row)?;
    }
    let base = mapper.base();
    deleted += exec.execute(&base.delete_sql(), &[base.id_value(row)])?.affected;
    debug!(
        target: "rowjoin::write",
        table = %base.source_table(),
        rows = deleted,
        "graph deleted"
    );
    Ok(deleted)
}
