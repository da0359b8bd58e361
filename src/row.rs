//! Row mappers: a table's worth of field mappers and the SQL derived from them.

use std::fmt;
use std::sync::Arc;

use ahash::AHashSet;
use tracing::debug;

use crate::{
    errors::RowMapError,
    field::{Field, RowInit},
    source::{RowSource, StatementSink},
    value::Value,
};

/// Bidirectional mapping between rows of one table and values of `T`.
///
/// Built once, then shared read-only. Ordinals are assigned to the non-index
/// fields in declaration order at build time.
pub struct RowMapper<T> {
    table: String,
    source_table: String,
    fields: Vec<Arc<dyn Field<T>>>,
    id: usize,
    factory: Option<fn() -> T>,
    select_sql: String,
    insert_sql: String,
}

impl<T> Clone for RowMapper<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            source_table: self.source_table.clone(),
            fields: self.fields.clone(),
            id: self.id,
            factory: self.factory,
            select_sql: self.select_sql.clone(),
            insert_sql: self.insert_sql.clone(),
        }
    }
}

impl<T> fmt::Debug for RowMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowMapper")
            .field("table", &self.table)
            .field("source_table", &self.source_table)
            .field(
                "fields",
                &self.fields.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field("id", &self.fields[self.id].name())
            .finish()
    }
}

pub struct RowMapperBuilder<T> {
    table: String,
    fields: Vec<Arc<dyn Field<T>>>,
    ids: Vec<usize>,
    factory: Option<fn() -> T>,
}

impl<T: 'static> RowMapperBuilder<T> {
    /// Supplies empty instances for [`RowMapper::map_row`].
    pub fn factory(mut self, factory: fn() -> T) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn field<F: Field<T> + 'static>(self, field: F) -> Self {
        self.shared_field(Arc::new(field))
    }

    pub fn shared_field(mut self, field: Arc<dyn Field<T>>) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds the id field.
    pub fn id<F: Field<T> + 'static>(mut self, field: F) -> Self {
        self.ids.push(self.fields.len());
        self.field(field)
    }

    pub fn build(self) -> Result<RowMapper<T>, RowMapError> {
        if self.table.trim().is_empty() {
            return Err(RowMapError::setup("row mapper requires a table name"));
        }
        let id = match self.ids.as_slice() {
            [id] => *id,
            [] => {
                return Err(RowMapError::setup(format!(
                    "table '{}' declares no id field",
                    self.table
                )));
            }
            _ => {
                return Err(RowMapError::setup(format!(
                    "table '{}' declares {} id fields",
                    self.table,
                    self.ids.len()
                )));
            }
        };
        for (pos, field) in self.fields.iter().enumerate() {
            if field.is_index() && pos != id {
                return Err(RowMapError::setup(format!(
                    "index field '{}' of '{}' must be the id field",
                    field.name(),
                    self.table
                )));
            }
        }
        RowMapper::assemble(
            self.table.clone(),
            self.table,
            self.fields,
            id,
            self.factory,
        )
    }
}

impl<T: 'static> RowMapper<T> {
    pub fn builder(table: &str) -> RowMapperBuilder<T> {
        RowMapperBuilder {
            table: table.to_string(),
            fields: Vec::new(),
            ids: Vec::new(),
            factory: None,
        }
    }

    fn assemble(
        table: String,
        source_table: String,
        fields: Vec<Arc<dyn Field<T>>>,
        id: usize,
        factory: Option<fn() -> T>,
    ) -> Result<Self, RowMapError> {
        let mut names = AHashSet::new();
        for field in &fields {
            if !names.insert(field.name().to_string()) {
                return Err(RowMapError::setup(format!(
                    "duplicate field '{}' in '{table}'",
                    field.name()
                )));
            }
        }

        let mut ordinal = 0;
        for field in fields.iter().filter(|f| !f.is_index()) {
            ordinal += 1;
            field.set_insert_ordinal(ordinal)?;
        }

        let mut mapper = Self {
            table,
            source_table,
            fields,
            id,
            factory,
            select_sql: String::new(),
            insert_sql: String::new(),
        };
        mapper.select_sql = format!(
            "SELECT {} FROM {}",
            mapper.select_columns().join(", "),
            mapper.from_table()
        );
        mapper.insert_sql = mapper.render_insert();
        debug!(
            target: "rowjoin::row",
            table = %mapper.table,
            fields = mapper.fields.len(),
            "row mapper built"
        );
        Ok(mapper)
    }

    /// New mapper over the same fields with the table and every field
    /// renamed. Physical columns, ordinals and the id are kept; SQL is
    /// regenerated.
    pub fn copy_transforming<RT, RF>(
        &self,
        rename_table: RT,
        rename_field: RF,
    ) -> Result<Self, RowMapError>
    where
        RT: Fn(&str) -> String,
        RF: Fn(&str) -> String,
    {
        let fields = self
            .fields
            .iter()
            .map(|f| f.renamed(rename_field(f.name())))
            .collect();
        Self::assemble(
            rename_table(&self.table),
            self.source_table.clone(),
            fields,
            self.id,
            self.factory,
        )
    }

    /// Copy whose table alias and fields are prefixed `"<index>__"`, derived
    /// from the physical names.
    pub fn namespaced(&self, index: usize) -> Result<Self, RowMapError> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.renamed(format!("{index}__{}", f.column())))
            .collect();
        Self::assemble(
            format!("{index}__{}", self.source_table),
            self.source_table.clone(),
            fields,
            self.id,
            self.factory,
        )
    }

    /// Reads the current row of `source`. Returns `None` when every field is
    /// null, which is how the empty side of an outer join shows up.
    pub fn map_row(&self, source: &dyn RowSource) -> Result<Option<T>, RowMapError> {
        let factory = self.factory.ok_or_else(|| {
            RowMapError::setup(format!(
                "row mapper for '{}' cannot construct rows",
                self.table
            ))
        })?;
        let mut init = RowInit::new(factory());
        for field in &self.fields {
            field.read_into(&mut init, source)?;
        }
        Ok(init.finish())
    }

    /// Maps every remaining row of `source`, skipping all-null rows.
    pub fn map_all(&self, source: &mut dyn RowSource) -> Result<Vec<T>, RowMapError> {
        let mut rows = Vec::new();
        while source.advance() {
            if let Some(row) = self.map_row(source)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

impl<T> RowMapper<T> {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn fields(&self) -> &[Arc<dyn Field<T>>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Arc<dyn Field<T>>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&Arc<dyn Field<T>>> {
        self.fields.iter().find(|f| f.column() == column)
    }

    pub fn id_field(&self) -> &Arc<dyn Field<T>> {
        &self.fields[self.id]
    }

    pub fn id_value(&self, row: &T) -> Value {
        self.id_field().value_from(row)
    }

    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = ?1",
            self.source_table,
            self.id_field().column()
        )
    }

    /// Fields written by an INSERT, in ordinal order.
    pub fn insert_fields(&self) -> impl Iterator<Item = &Arc<dyn Field<T>>> + '_ {
        self.fields.iter().filter(|f| !f.is_index())
    }

    /// External values of the non-index fields, in ordinal order.
    pub fn insert_values(&self, row: &T) -> Vec<Value> {
        self.insert_fields().map(|f| f.value_from(row)).collect()
    }

    /// Binds every non-index field of `row` at its ordinal.
    pub fn apply(&self, sink: &mut dyn StatementSink, row: &T) -> Result<(), RowMapError> {
        for field in self.insert_fields() {
            field.apply_from(sink, row)?;
        }
        Ok(())
    }

    pub fn is_renamed(&self) -> bool {
        self.table != self.source_table || self.fields.iter().any(|f| f.name() != f.column())
    }

    /// Column reference usable in WHERE and ON clauses.
    pub fn qualified_column(&self, field: &dyn Field<T>) -> String {
        if self.is_renamed() {
            format!("\"{}\".\"{}\"", self.table, field.column())
        } else {
            field.column().to_string()
        }
    }

    pub fn qualified_id(&self) -> String {
        self.qualified_column(self.id_field().as_ref())
    }

    pub fn select_columns(&self) -> Vec<String> {
        if self.is_renamed() {
            self.fields
                .iter()
                .map(|f| format!("\"{}\".\"{}\" AS \"{}\"", self.table, f.column(), f.name()))
                .collect()
        } else {
            self.fields.iter().map(|f| f.column().to_string()).collect()
        }
    }

    /// `FROM` target: the physical table, aliased when renamed.
    pub fn from_table(&self) -> String {
        if self.table == self.source_table {
            self.source_table.clone()
        } else {
            format!("{} AS \"{}\"", self.source_table, self.table)
        }
    }

    fn render_insert(&self) -> String {
        let columns: Vec<&str> = self.insert_fields().map(|f| f.column()).collect();
        if columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", self.source_table);
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.source_table,
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}
