//! Relationship declarations between a parent row type and a related one.
//!
//! A [`JoinSpec`] is a template. Building a
//! [`JoiningRowMapper`](crate::JoiningRowMapper) binds every template to a
//! namespaced copy of its related mapper, assigning join indices in
//! construction order.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    batch,
    config::{JoinConfig, RepositoryConfig},
    errors::RowMapError,
    executor::Executor,
    field::Field,
    joining::{JoinEdge, JoinGraph, JoinNode, JoiningBuilder, JoiningRowMapper},
    repository,
    row::RowMapper,
    source::RowSource,
    value::Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    Single,
    Collection,
}

/// How inserting a parent treats its attached related rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InsertCascade {
    #[default]
    DontInsert,
    /// Related rows are inserted as they are, after the parent.
    IndependentInsert,
    /// The parent is inserted first and its key is copied into each related row.
    NeedsParentId,
    /// The related row is inserted first and its key is copied into the parent.
    ParentNeedsId,
}

/// How deleting a parent treats its related rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeleteCascade {
    #[default]
    DontDelete,
    /// One DELETE matching the parent's join column.
    UseParentId,
    /// Related rows are read back and deleted one by one by their own id.
    MaterializeParent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinOp {
    #[default]
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl JoinOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinOp::Eq => "=",
            JoinOp::NotEq => "<>",
            JoinOp::Lt => "<",
            JoinOp::LtEq => "<=",
            JoinOp::Gt => ">",
            JoinOp::GtEq => ">=",
        }
    }

    /// Operator with its operands swapped: `a < b` is `b > a`.
    pub fn flipped(&self) -> JoinOp {
        match self {
            JoinOp::Lt => JoinOp::Gt,
            JoinOp::LtEq => JoinOp::GtEq,
            JoinOp::Gt => JoinOp::Lt,
            JoinOp::GtEq => JoinOp::LtEq,
            other => *other,
        }
    }
}

/// Reads and attaches related values on a parent.
pub enum Accessor<P, T> {
    Single {
        get: fn(&P) -> Option<&T>,
        get_mut: fn(&mut P) -> Option<&mut T>,
        set: fn(&mut P, T),
    },
    Collection {
        get: fn(&P) -> &[T],
        get_mut: fn(&mut P) -> &mut [T],
        push: fn(&mut P, T),
    },
}

impl<P, T> Clone for Accessor<P, T> {
    fn clone(&self) -> Self {
        match self {
            Accessor::Single { get, get_mut, set } => Accessor::Single {
                get: *get,
                get_mut: *get_mut,
                set: *set,
            },
            Accessor::Collection { get, get_mut, push } => Accessor::Collection {
                get: *get,
                get_mut: *get_mut,
                push: *push,
            },
        }
    }
}

impl<P, T> Accessor<P, T> {
    pub fn single(
        get: fn(&P) -> Option<&T>,
        get_mut: fn(&mut P) -> Option<&mut T>,
        set: fn(&mut P, T),
    ) -> Self {
        Accessor::Single { get, get_mut, set }
    }

    pub fn collection(
        get: fn(&P) -> &[T],
        get_mut: fn(&mut P) -> &mut [T],
        push: fn(&mut P, T),
    ) -> Self {
        Accessor::Collection { get, get_mut, push }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Accessor::Single { .. } => Cardinality::Single,
            Accessor::Collection { .. } => Cardinality::Collection,
        }
    }

    /// Sets a single relation or appends to a collection.
    pub fn attach(&self, parent: &mut P, related: T) {
        match self {
            Accessor::Single { set, .. } => set(parent, related),
            Accessor::Collection { push, .. } => push(parent, related),
        }
    }

    /// Steps `state` over the values already attached to `parent`.
    ///
    /// The first call materializes the attached value(s). A single relation
    /// then keeps returning that value; a collection advances one element per
    /// call and returns `None` once exhausted.
    pub fn access<'a>(&self, state: &mut GetterState<'a, T>, parent: &'a P) -> Option<&'a T> {
        match state {
            GetterState::InitSingle => {
                let value = match self {
                    Accessor::Single { get, .. } => get(parent),
                    Accessor::Collection { .. } => None,
                };
                *state = GetterState::Single(value);
                value
            }
            GetterState::Single(value) => *value,
            GetterState::InitCollection => match self {
                Accessor::Collection { get, .. } => {
                    let mut iter = get(parent).iter();
                    let first = iter.next();
                    *state = GetterState::Collection(iter);
                    first
                }
                Accessor::Single { .. } => {
                    *state = GetterState::Single(None);
                    None
                }
            },
            GetterState::Collection(iter) => iter.next(),
        }
    }

    pub fn for_each_mut<F>(&self, parent: &mut P, mut f: F) -> Result<(), RowMapError>
    where
        F: FnMut(&mut T) -> Result<(), RowMapError>,
    {
        match self {
            Accessor::Single { get_mut, .. } => {
                if let Some(child) = get_mut(parent) {
                    f(child)?;
                }
            }
            Accessor::Collection { get_mut, .. } => {
                for child in get_mut(parent) {
                    f(child)?;
                }
            }
        }
        Ok(())
    }
}

/// Per-call traversal state over the related values of one parent.
pub enum GetterState<'a, T> {
    InitSingle,
    Single(Option<&'a T>),
    InitCollection,
    Collection(std::slice::Iter<'a, T>),
}

impl<'a, T> GetterState<'a, T> {
    pub fn new(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => GetterState::InitSingle,
            Cardinality::Collection => GetterState::InitCollection,
        }
    }
}

/// Related side of a join: a plain row mapper, or a joining builder whose
/// own joins are stitched from the same rows.
pub enum Related<T> {
    Rows(RowMapper<T>),
    Joined(JoiningBuilder<T>),
}

impl<T> From<RowMapper<T>> for Related<T> {
    fn from(rows: RowMapper<T>) -> Self {
        Related::Rows(rows)
    }
}

impl<T> From<JoiningBuilder<T>> for Related<T> {
    fn from(builder: JoiningBuilder<T>) -> Self {
        Related::Joined(builder)
    }
}

/// Declaration of one relationship from `P` to `T`.
///
/// `parent_field` and `related_field` name physical columns; they are
/// checked when the joining mapper is built.
pub struct JoinSpec<P, T> {
    parent_field: String,
    related_field: String,
    op: JoinOp,
    related: Related<T>,
    accessor: Accessor<P, T>,
    insert: InsertCascade,
    delete: DeleteCascade,
}

impl<P: 'static, T: 'static> JoinSpec<P, T> {
    pub fn new(
        parent_field: &str,
        related_field: &str,
        related: impl Into<Related<T>>,
        accessor: Accessor<P, T>,
    ) -> Self {
        Self {
            parent_field: parent_field.to_string(),
            related_field: related_field.to_string(),
            op: JoinOp::Eq,
            related: related.into(),
            accessor,
            insert: InsertCascade::DontInsert,
            delete: DeleteCascade::DontDelete,
        }
    }

    pub fn op(mut self, op: JoinOp) -> Self {
        self.op = op;
        self
    }

    pub fn on_insert(mut self, cascade: InsertCascade) -> Self {
        self.insert = cascade;
        self
    }

    pub fn on_delete(mut self, cascade: DeleteCascade) -> Self {
        self.delete = cascade;
        self
    }

    pub fn cardinality(&self) -> Cardinality {
        self.accessor.cardinality()
    }
}

pub(crate) trait JoinTemplate<P>: Send + Sync {
    fn bind(
        &self,
        parent: &RowMapper<P>,
        next: &mut usize,
        depth: usize,
        config: &JoinConfig,
    ) -> Result<Box<dyn Join<P>>, RowMapError>;
}

impl<P: 'static, T: 'static> JoinTemplate<P> for JoinSpec<P, T> {
    fn bind(
        &self,
        parent: &RowMapper<P>,
        next: &mut usize,
        depth: usize,
        config: &JoinConfig,
    ) -> Result<Box<dyn Join<P>>, RowMapError> {
        if depth > config.max_join_depth {
            return Err(RowMapError::setup(format!(
                "join from '{}' sits at depth {depth}, maximum is {}",
                parent.source_table(),
                config.max_join_depth
            )));
        }
        if self.insert == InsertCascade::ParentNeedsId
            && self.cardinality() == Cardinality::Collection
        {
            return Err(RowMapError::setup(format!(
                "join from '{}' on '{}': a collection cannot supply the parent's key",
                parent.source_table(),
                self.parent_field
            )));
        }
        let parent_field = Arc::clone(
            parent
                .field_by_column(&self.parent_field)
                .ok_or_else(|| {
                    RowMapError::setup(format!(
                        "'{}' has no column '{}'",
                        parent.source_table(),
                        self.parent_field
                    ))
                })?,
        );

        let related = match &self.related {
            Related::Rows(rows) => {
                let index = *next;
                *next += 1;
                BoundRelated::Rows {
                    index,
                    mapper: rows.namespaced(index)?,
                    base: rows.clone(),
                }
            }
            Related::Joined(builder) => BoundRelated::Joined(builder.bind(next, depth, config)?),
        };
        let related_mapper = related.mapper();
        let related_field = Arc::clone(
            related_mapper
                .field_by_column(&self.related_field)
                .ok_or_else(|| {
                    RowMapError::setup(format!(
                        "'{}' has no column '{}'",
                        related_mapper.source_table(),
                        self.related_field
                    ))
                })?,
        );
        let on = format!(
            "{} {} {}",
            parent.qualified_column(parent_field.as_ref()),
            self.op.as_sql(),
            related_mapper.qualified_column(related_field.as_ref())
        );

        Ok(Box::new(BoundJoin {
            on,
            parent_field,
            related_field,
            op: self.op,
            accessor: self.accessor.clone(),
            insert: self.insert,
            delete: self.delete,
            related,
        }))
    }
}

/// A join bound to its namespaced participants.
pub(crate) trait Join<P>: Send + Sync {
    fn join_index(&self) -> usize;

    /// Maps the related participant from the current row and attaches it
    /// to `parent` when present.
    fn attach(&self, parent: &mut P, source: &dyn RowSource) -> Result<(), RowMapError>;

    fn push_columns(&self, out: &mut Vec<String>);

    fn push_clauses(&self, out: &mut Vec<String>);

    fn push_order(&self, out: &mut Vec<String>);

    fn push_graph(&self, parent_index: usize, depth: usize, graph: &mut JoinGraph);

    /// Insert values of the related rows already attached to `parent`.
    fn related_insert_values(&self, parent: &P) -> Vec<Vec<Value>>;

    fn insert_before(
        &self,
        exec: &dyn Executor,
        parent: &mut P,
        config: &RepositoryConfig,
    ) -> Result<(), RowMapError>;

    fn insert_after(
        &self,
        exec: &dyn Executor,
        parent: &mut P,
        config: &RepositoryConfig,
    ) -> Result<(), RowMapError>;

    fn delete_related(&self, exec: &dyn Executor, parent: &P) -> Result<usize, RowMapError>;
}

pub(crate) enum BoundRelated<T> {
    Rows {
        index: usize,
        mapper: RowMapper<T>,
        base: RowMapper<T>,
    },
    Joined(JoiningRowMapper<T>),
}

impl<T: 'static> BoundRelated<T> {
    fn index(&self) -> usize {
        match self {
            BoundRelated::Rows { index, .. } => *index,
            BoundRelated::Joined(joined) => joined.join_index(),
        }
    }

    /// Namespaced mapper of the related table.
    fn mapper(&self) -> &RowMapper<T> {
        match self {
            BoundRelated::Rows { mapper, .. } => mapper,
            BoundRelated::Joined(joined) => joined.primary(),
        }
    }

    /// Mapper of the related table under its own names.
    fn base(&self) -> &RowMapper<T> {
        match self {
            BoundRelated::Rows { base, .. } => base,
            BoundRelated::Joined(joined) => joined.base(),
        }
    }

    fn insert(
        &self,
        exec: &dyn Executor,
        row: &mut T,
        config: &RepositoryConfig,
    ) -> Result<Value, RowMapError> {
        match self {
            BoundRelated::Rows { base, .. } => batch::insert_row(exec, base, row),
            BoundRelated::Joined(joined) => repository::insert_graph(exec, joined, row, config),
        }
    }
}

pub(crate) struct BoundJoin<P, T> {
    on: String,
    parent_field: Arc<dyn Field<P>>,
    related_field: Arc<dyn Field<T>>,
    op: JoinOp,
    accessor: Accessor<P, T>,
    insert: InsertCascade,
    delete: DeleteCascade,
    related: BoundRelated<T>,
}

impl<P: 'static, T: 'static> BoundJoin<P, T> {
    fn parent_value(&self, parent: &P) -> Value {
        self.parent_field.value_from(parent)
    }

    /// `WHERE` condition on the related table matching a parent value bound at `?1`.
    fn related_condition(&self) -> String {
        format!(
            "{} {} ?1",
            self.related_field.column(),
            self.op.flipped().as_sql()
        )
    }
}

impl<P: 'static, T: 'static> Join<P> for BoundJoin<P, T> {
    fn join_index(&self) -> usize {
        self.related.index()
    }

    fn attach(&self, parent: &mut P, source: &dyn RowSource) -> Result<(), RowMapError> {
        let joined = match &self.related {
            BoundRelated::Rows { mapper, .. } => {
                if let Some(related) = mapper.map_row(source)? {
                    self.accessor.attach(parent, related);
                }
                return Ok(());
            }
            BoundRelated::Joined(joined) => joined,
        };

        // A nested participant spans several rows: while its key repeats,
        // the rows feed the joins of the value attached last.
        let key = joined.current_key(source)?;
        if key.is_null() {
            return Ok(());
        }
        let last = match &self.accessor {
            Accessor::Single { get_mut, .. } => get_mut(parent),
            Accessor::Collection { get_mut, .. } => get_mut(parent).last_mut(),
        };
        if let Some(last) = last.filter(|r| joined.primary().id_value(r).same_key(&key)) {
            return joined.attach_all(last, source);
        }
        if let Some(related) = joined.map_single_row(source)? {
            self.accessor.attach(parent, related);
        }
        Ok(())
    }

    fn push_columns(&self, out: &mut Vec<String>) {
        match &self.related {
            BoundRelated::Rows { mapper, .. } => out.extend(mapper.select_columns()),
            BoundRelated::Joined(joined) => joined.push_columns(out),
        }
    }

    fn push_clauses(&self, out: &mut Vec<String>) {
        out.push(format!(
            "LEFT JOIN {} ON {}",
            self.related.mapper().from_table(),
            self.on
        ));
        if let BoundRelated::Joined(joined) = &self.related {
            joined.push_clauses(out);
        }
    }

    fn push_order(&self, out: &mut Vec<String>) {
        match &self.related {
            BoundRelated::Rows { mapper, .. } => out.push(mapper.qualified_id()),
            BoundRelated::Joined(joined) => joined.push_order(out),
        }
    }

    fn push_graph(&self, parent_index: usize, depth: usize, graph: &mut JoinGraph) {
        match &self.related {
            BoundRelated::Rows { index, mapper, .. } => graph.nodes.push(JoinNode {
                index: *index,
                alias: mapper.table().to_string(),
                table: mapper.source_table().to_string(),
                depth,
            }),
            BoundRelated::Joined(joined) => joined.collect_graph(graph),
        }
        graph.edges.push(JoinEdge {
            parent: parent_index,
            related: self.related.index(),
            cardinality: self.accessor.cardinality(),
            on: self.on.clone(),
        });
    }

    fn related_insert_values(&self, parent: &P) -> Vec<Vec<Value>> {
        let base = self.related.base();
        let mut state = GetterState::new(self.accessor.cardinality());
        let mut rows = Vec::new();
        match self.accessor.cardinality() {
            Cardinality::Single => {
                if let Some(related) = self.accessor.access(&mut state, parent) {
                    rows.push(base.insert_values(related));
                }
            }
            Cardinality::Collection => {
                while let Some(related) = self.accessor.access(&mut state, parent) {
                    rows.push(base.insert_values(related));
                }
            }
        }
        rows
    }

    fn insert_before(
        &self,
        exec: &dyn Executor,
        parent: &mut P,
        config: &RepositoryConfig,
    ) -> Result<(), RowMapError> {
        if self.insert != InsertCascade::ParentNeedsId {
            return Ok(());
        }
        let key = match &self.accessor {
            Accessor::Single { get_mut, .. } => match get_mut(parent) {
                Some(related) => {
                    self.related.insert(exec, related, config)?;
                    self.related_field.value_from(related)
                }
                None => return Ok(()),
            },
            Accessor::Collection { .. } => return Ok(()),
        };
        self.parent_field.write_value(parent, key)
    }

    fn insert_after(
        &self,
        exec: &dyn Executor,
        parent: &mut P,
        config: &RepositoryConfig,
    ) -> Result<(), RowMapError> {
        match self.insert {
            InsertCascade::NeedsParentId => {
                let key = self.parent_value(parent);
                self.accessor.for_each_mut(parent, |related| {
                    self.related_field.write_value(related, key.clone())?;
                    self.related.insert(exec, related, config).map(|_| ())
                })
            }
            InsertCascade::IndependentInsert => match &self.related {
                BoundRelated::Rows { base, .. } => {
                    let rows = self.related_insert_values(parent);
                    batch::insert_value_rows(exec, base, &rows, &config.batch).map(|_| ())
                }
                BoundRelated::Joined(_) => self.accessor.for_each_mut(parent, |related| {
                    self.related.insert(exec, related, config).map(|_| ())
                }),
            },
            InsertCascade::DontInsert | InsertCascade::ParentNeedsId => Ok(()),
        }
    }

    fn delete_related(&self, exec: &dyn Executor, parent: &P) -> Result<usize, RowMapError> {
        if self.delete == DeleteCascade::DontDelete {
            return Ok(0);
        }
        let key = self.parent_value(parent);
        if key.is_null() {
            return Ok(0);
        }
        let base = self.related.base();
        match self.delete {
            DeleteCascade::UseParentId => {
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    base.source_table(),
                    self.related_condition()
                );
                Ok(exec.execute(&sql, &[key])?.affected)
            }
            DeleteCascade::MaterializeParent => {
                let sql = format!("{} WHERE {}", base.select_sql(), self.related_condition());
                let mut rows = exec.query(&sql, &[key])?;
                let children = base.map_all(&mut rows)?;
                let delete_sql = base.delete_sql();
                let mut deleted = 0;
                for child in &children {
                    deleted += exec.execute(&delete_sql, &[base.id_value(child)])?.affected;
                }
                Ok(deleted)
            }
            DeleteCascade::DontDelete => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Order {
        lines: Vec<u32>,
        note: Option<u32>,
    }

    fn lines() -> Accessor<Order, u32> {
        Accessor::collection(
            |o| o.lines.as_slice(),
            |o| o.lines.as_mut_slice(),
            |o, l| o.lines.push(l),
        )
    }

    fn note() -> Accessor<Order, u32> {
        Accessor::single(|o| o.note.as_ref(), |o| o.note.as_mut(), |o, n| o.note = Some(n))
    }

    #[test]
    fn test_collection_state_advances() {
        let order = Order {
            lines: vec![4, 5, 6],
            note: None,
        };
        let accessor = lines();
        let mut state = GetterState::new(accessor.cardinality());
        assert!(matches!(state, GetterState::InitCollection));
        let mut seen = Vec::new();
        while let Some(line) = accessor.access(&mut state, &order) {
            seen.push(*line);
        }
        assert_eq!(seen, vec![4, 5, 6]);
        assert!(matches!(state, GetterState::Collection(_)));
    }

    #[test]
    fn test_single_state_materializes_once() {
        let order = Order {
            lines: Vec::new(),
            note: Some(9),
        };
        let accessor = note();
        let mut state = GetterState::new(Cardinality::Single);
        assert_eq!(accessor.access(&mut state, &order), Some(&9));
        assert!(matches!(state, GetterState::Single(Some(9))));
        assert_eq!(accessor.access(&mut state, &order), Some(&9));
    }

    #[test]
    fn test_attach_sets_or_appends() {
        let mut order = Order::default();
        lines().attach(&mut order, 1);
        lines().attach(&mut order, 2);
        note().attach(&mut order, 3);
        assert_eq!(order.lines, vec![1, 2]);
        assert_eq!(order.note, Some(3));
    }

    #[test]
    fn test_for_each_mut_visits_children() {
        let mut order = Order {
            lines: vec![1, 2],
            note: None,
        };
        lines()
            .for_each_mut(&mut order, |line| {
                *line *= 10;
                Ok(())
            })
            .unwrap();
        assert_eq!(order.lines, vec![10, 20]);
        note().for_each_mut(&mut order, |_| panic!("no note")).unwrap();
    }

    #[test]
    fn test_flipped_operators() {
        assert_eq!(JoinOp::Lt.flipped(), JoinOp::Gt);
        assert_eq!(JoinOp::GtEq.flipped(), JoinOp::LtEq);
        assert_eq!(JoinOp::Eq.flipped(), JoinOp::Eq);
        assert_eq!(JoinOp::NotEq.as_sql(), "<>");
    }
}
