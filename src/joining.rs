//! Joined reads: one SELECT over a primary table and its related tables,
//! stitched back into a graph of values.
//!
//! Every participant gets a join index in construction order (the primary
//! row is 0) and is read through a copy of its mapper whose table alias and
//! result columns carry the `"<index>__"` prefix. That keeps self-joins and
//! repeated tables apart in the result set.
//!
//! ```text
//! SELECT "0__linky"."id" AS "0__id", ..., "1__thing"."id" AS "1__id", ...
//! FROM linky AS "0__linky"
//! LEFT JOIN thing AS "1__thing" ON "0__linky"."link" = "1__thing"."link"
//! ```

use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    config::JoinConfig,
    errors::RowMapError,
    join::{Cardinality, Join, JoinSpec, JoinTemplate},
    row::RowMapper,
    source::RowSource,
    value::Value,
};

/// Collects the joins of a primary row mapper.
pub struct JoiningBuilder<P> {
    primary: RowMapper<P>,
    joins: Vec<Box<dyn JoinTemplate<P>>>,
}

impl<P: 'static> JoiningBuilder<P> {
    pub fn new(primary: RowMapper<P>) -> Self {
        Self {
            primary,
            joins: Vec::new(),
        }
    }

    pub fn join<T: 'static>(mut self, spec: JoinSpec<P, T>) -> Self {
        self.joins.push(Box::new(spec));
        self
    }

    pub fn primary(&self) -> &RowMapper<P> {
        &self.primary
    }

    pub fn build(&self) -> Result<JoiningRowMapper<P>, RowMapError> {
        self.build_with_config(&JoinConfig::default())
    }

    pub fn build_with_config(&self, config: &JoinConfig) -> Result<JoiningRowMapper<P>, RowMapError> {
        let mut next = 0;
        let mapper = self.bind(&mut next, 0, config)?;
        debug!(
            target: "rowjoin::join",
            table = %self.primary.source_table(),
            participants = next,
            "joining mapper built"
        );
        trace!(target: "rowjoin::join", sql = %mapper.select_sql, "joined select");
        Ok(mapper)
    }

    /// Binds this builder as the participant at `*next`, its joins one level
    /// below `depth`.
    pub(crate) fn bind(
        &self,
        next: &mut usize,
        depth: usize,
        config: &JoinConfig,
    ) -> Result<JoiningRowMapper<P>, RowMapError> {
        let index = *next;
        *next += 1;
        let primary = self.primary.namespaced(index)?;
        let mut joins = Vec::with_capacity(self.joins.len());
        for join in &self.joins {
            joins.push(join.bind(&primary, next, depth + 1, config)?);
        }
        Ok(JoiningRowMapper::assemble(
            self.primary.clone(),
            primary,
            joins,
            index,
            depth,
        ))
    }
}

/// Participant of a join graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JoinNode {
    pub index: usize,
    pub alias: String,
    pub table: String,
    pub depth: usize,
}

/// Join from the participant at `parent` to the one at `related`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JoinEdge {
    pub parent: usize,
    pub related: usize,
    pub cardinality: Cardinality,
    pub on: String,
}

/// Shape of a built joining mapper, nodes in join-index order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JoinGraph {
    pub nodes: Vec<JoinNode>,
    pub edges: Vec<JoinEdge>,
}

impl JoinGraph {
    pub fn node(&self, index: usize) -> Option<&JoinNode> {
        self.nodes.iter().find(|n| n.index == index)
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &JoinEdge> + '_ {
        self.edges.iter().filter(move |e| e.parent == index)
    }
}

/// Row mapper for a primary table plus its joined participants.
pub struct JoiningRowMapper<P> {
    base: RowMapper<P>,
    primary: RowMapper<P>,
    joins: Vec<Box<dyn Join<P>>>,
    index: usize,
    depth: usize,
    select_sql: String,
}

impl<P: 'static> JoiningRowMapper<P> {
    pub fn builder(primary: RowMapper<P>) -> JoiningBuilder<P> {
        JoiningBuilder::new(primary)
    }

    fn assemble(
        base: RowMapper<P>,
        primary: RowMapper<P>,
        joins: Vec<Box<dyn Join<P>>>,
        index: usize,
        depth: usize,
    ) -> Self {
        let mut mapper = Self {
            base,
            primary,
            joins,
            index,
            depth,
            select_sql: String::new(),
        };
        let mut columns = Vec::new();
        mapper.push_columns(&mut columns);
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            mapper.primary.from_table()
        );
        let mut clauses = Vec::new();
        mapper.push_clauses(&mut clauses);
        for clause in clauses {
            sql.push(' ');
            sql.push_str(&clause);
        }
        mapper.select_sql = sql;
        mapper
    }

    /// Maps one primary row and every related row grouped under it.
    ///
    /// `source` must sit on the first row of a group. Rows are consumed while
    /// the primary id stays the same; the first row of the next group is
    /// rewound so the next call starts there. Callers order the result by the
    /// primary id (see [`order_by`](Self::order_by)) so groups are
    /// contiguous.
    pub fn map_row(&self, source: &mut dyn RowSource) -> Result<Option<P>, RowMapError> {
        let Some(mut parent) = self.primary.map_row(&*source)? else {
            return Ok(None);
        };
        self.attach_all(&mut parent, &*source)?;

        let key = self.current_key(&*source)?;
        let mut grouped = 1;
        while source.advance() {
            if !self.current_key(&*source)?.same_key(&key) {
                source.rewind();
                break;
            }
            self.attach_all(&mut parent, &*source)?;
            grouped += 1;
        }
        trace!(
            target: "rowjoin::join",
            table = %self.primary.source_table(),
            key = ?key,
            rows = grouped,
            "group stitched"
        );
        Ok(Some(parent))
    }

    /// Maps every remaining group of `source`.
    pub fn map_all(&self, source: &mut dyn RowSource) -> Result<Vec<P>, RowMapError> {
        let mut rows = Vec::new();
        while source.advance() {
            if let Some(row) = self.map_row(source)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Maps the current row only, without grouping.
    pub(crate) fn map_single_row(&self, source: &dyn RowSource) -> Result<Option<P>, RowMapError> {
        let Some(mut parent) = self.primary.map_row(source)? else {
            return Ok(None);
        };
        self.attach_all(&mut parent, source)?;
        Ok(Some(parent))
    }

    /// Primary id of the current row, null on the empty side of an outer join.
    pub(crate) fn current_key(&self, source: &dyn RowSource) -> Result<Value, RowMapError> {
        source.get(self.primary.id_field().name())
    }

    /// Maps every join from the current row onto an existing `parent`.
    pub(crate) fn attach_all(&self, parent: &mut P, source: &dyn RowSource) -> Result<(), RowMapError> {
        for join in &self.joins {
            join.attach(parent, source)?;
        }
        Ok(())
    }

    /// Insert values of the rows attached to `parent`, keyed by join index.
    pub fn related_insert_values(&self, parent: &P) -> Vec<(usize, Vec<Vec<Value>>)> {
        self.joins
            .iter()
            .map(|join| (join.join_index(), join.related_insert_values(parent)))
            .collect()
    }

    pub fn join_graph(&self) -> JoinGraph {
        let mut graph = JoinGraph::default();
        self.collect_graph(&mut graph);
        graph.nodes.sort_by_key(|n| n.index);
        graph
    }

    pub(crate) fn collect_graph(&self, graph: &mut JoinGraph) {
        graph.nodes.push(JoinNode {
            index: self.index,
            alias: self.primary.table().to_string(),
            table: self.primary.source_table().to_string(),
            depth: self.depth,
        });
        for join in &self.joins {
            join.push_graph(self.index, self.depth + 1, graph);
        }
    }
}

impl<P> JoiningRowMapper<P> {
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// The primary mapper under its own names.
    pub fn base(&self) -> &RowMapper<P> {
        &self.base
    }

    /// The namespaced primary mapper used for reads.
    pub fn primary(&self) -> &RowMapper<P> {
        &self.primary
    }

    pub fn join_index(&self) -> usize {
        self.index
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// `ORDER BY` over the ids of every participant, primary first.
    pub fn order_by(&self) -> String {
        let mut columns = Vec::new();
        self.push_order(&mut columns);
        format!("ORDER BY {}", columns.join(", "))
    }

    pub(crate) fn joins(&self) -> &[Box<dyn Join<P>>] {
        &self.joins
    }

    pub(crate) fn push_columns(&self, out: &mut Vec<String>) {
        out.extend(self.primary.select_columns());
        for join in &self.joins {
            join.push_columns(out);
        }
    }

    pub(crate) fn push_clauses(&self, out: &mut Vec<String>) {
        for join in &self.joins {
            join.push_clauses(out);
        }
    }

    pub(crate) fn push_order(&self, out: &mut Vec<String>) {
        out.push(self.primary.qualified_id());
        for join in &self.joins {
            join.push_order(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        column::ColumnType,
        field::FieldMapper,
        join::{Accessor, InsertCascade},
        source::ResultSet,
    };

    #[derive(Debug, Default, PartialEq)]
    struct Linky {
        id: Option<i64>,
        link: Option<i64>,
        things: Vec<Thing>,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Thing {
        id: Option<i64>,
        link: Option<i64>,
        name: Option<String>,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Node {
        id: Option<i64>,
        owner_id: Option<i64>,
        owner: Option<Box<Node>>,
    }

    fn linky_rows() -> RowMapper<Linky> {
        RowMapper::builder("linky")
            .factory(Linky::default)
            .id(FieldMapper::new("id", ColumnType::INDEX, |l: &Linky| l.id, |l, v| l.id = v))
            .field(FieldMapper::new("link", ColumnType::LONG, |l: &Linky| l.link, |l, v| l.link = v))
            .build()
            .unwrap()
    }

    fn thing_rows() -> RowMapper<Thing> {
        RowMapper::builder("thing")
            .factory(Thing::default)
            .id(FieldMapper::new("id", ColumnType::INDEX, |t: &Thing| t.id, |t, v| t.id = v))
            .field(FieldMapper::new("link", ColumnType::LONG, |t: &Thing| t.link, |t, v| t.link = v))
            .field(FieldMapper::new(
                "name",
                ColumnType::LONG_STRING,
                |t: &Thing| t.name.clone(),
                |t, v| t.name = v,
            ))
            .build()
            .unwrap()
    }

    fn things() -> Accessor<Linky, Thing> {
        Accessor::collection(
            |l| l.things.as_slice(),
            |l| l.things.as_mut_slice(),
            |l, t| l.things.push(t),
        )
    }

    #[derive(Debug, Default, PartialEq)]
    struct Holder {
        id: Option<i64>,
        link: Option<i64>,
        linky: Option<Linky>,
        linkies: Vec<Linky>,
    }

    fn holder_rows() -> RowMapper<Holder> {
        RowMapper::builder("holder")
            .factory(Holder::default)
            .id(FieldMapper::new("id", ColumnType::INDEX, |h: &Holder| h.id, |h, v| h.id = v))
            .field(FieldMapper::new("link", ColumnType::LONG, |h: &Holder| h.link, |h, v| h.link = v))
            .build()
            .unwrap()
    }

    fn linky_with_things() -> JoiningBuilder<Linky> {
        JoiningRowMapper::builder(linky_rows())
            .join(JoinSpec::new("link", "link", thing_rows(), things()))
    }

    fn holder_rows_set(rows: Vec<[Value; 7]>) -> ResultSet {
        let columns = ["0__id", "0__link", "1__id", "1__link", "2__id", "2__link", "2__name"];
        let mut set = ResultSet::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            set.push_row(row.to_vec()).unwrap();
        }
        set
    }

    fn holder_row(linky: i64, thing: i64, name: &str) -> [Value; 7] {
        [
            Value::Long(1),
            Value::Long(1),
            Value::Long(linky),
            Value::Long(1),
            Value::Long(thing),
            Value::Long(1),
            name.into(),
        ]
    }

    fn node_rows() -> RowMapper<Node> {
        RowMapper::builder("node")
            .factory(Node::default)
            .id(FieldMapper::new("id", ColumnType::LONG, |n: &Node| n.id, |n, v| n.id = v))
            .field(FieldMapper::new(
                "owner_id",
                ColumnType::LONG,
                |n: &Node| n.owner_id,
                |n, v| n.owner_id = v,
            ))
            .build()
            .unwrap()
    }

    fn owner() -> Accessor<Node, Node> {
        Accessor::single(
            |n| n.owner.as_deref(),
            |n| n.owner.as_deref_mut(),
            |n, o| n.owner = Some(Box::new(o)),
        )
    }

    fn linky_mapper() -> JoiningRowMapper<Linky> {
        JoiningRowMapper::builder(linky_rows())
            .join(JoinSpec::new("link", "link", thing_rows(), things()))
            .build()
            .unwrap()
    }

    fn joined_rows(rows: Vec<[Value; 5]>) -> ResultSet {
        let columns = ["0__id", "0__link", "1__id", "1__link", "1__name"];
        let mut set = ResultSet::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            set.push_row(row.to_vec()).unwrap();
        }
        set
    }

    fn thing_row(parent: i64, id: i64, name: &str) -> [Value; 5] {
        [
            Value::Long(parent),
            Value::Long(1),
            Value::Long(id),
            Value::Long(1),
            name.into(),
        ]
    }

    #[test]
    fn test_select_sql_namespaces_participants() {
        let mapper = linky_mapper();
        assert_eq!(
            mapper.select_sql(),
            "SELECT \"0__linky\".\"id\" AS \"0__id\", \"0__linky\".\"link\" AS \"0__link\", \
             \"1__thing\".\"id\" AS \"1__id\", \"1__thing\".\"link\" AS \"1__link\", \
             \"1__thing\".\"name\" AS \"1__name\" FROM linky AS \"0__linky\" \
             LEFT JOIN thing AS \"1__thing\" ON \"0__linky\".\"link\" = \"1__thing\".\"link\""
        );
        assert_eq!(
            mapper.order_by(),
            "ORDER BY \"0__linky\".\"id\", \"1__thing\".\"id\""
        );
    }

    #[test]
    fn test_contiguous_rows_fold_into_one_parent() {
        let mapper = linky_mapper();
        let mut rows = joined_rows(vec![
            thing_row(1, 10, "A"),
            thing_row(1, 11, "B"),
            thing_row(1, 12, "C"),
        ]);
        assert!(rows.advance());
        let linky = mapper.map_row(&mut rows).unwrap().unwrap();
        let names: Vec<_> = linky.things.iter().filter_map(|t| t.name.as_deref()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(rows.is_end());
    }

    #[test]
    fn test_next_group_is_rewound() {
        let mapper = linky_mapper();
        let mut rows = joined_rows(vec![
            thing_row(1, 10, "A"),
            thing_row(2, 11, "B"),
            thing_row(2, 12, "C"),
        ]);
        assert!(rows.advance());
        let first = mapper.map_row(&mut rows).unwrap().unwrap();
        assert_eq!(first.things.len(), 1);
        assert_eq!(rows.position(), 1);

        assert!(rows.advance());
        let second = mapper.map_row(&mut rows).unwrap().unwrap();
        assert_eq!(second.id, Some(2));
        assert_eq!(second.things.len(), 2);
    }

    #[test]
    fn test_outer_join_gap_attaches_nothing() {
        let mapper = linky_mapper();
        let mut rows = joined_rows(vec![[
            Value::Long(4),
            Value::Long(7),
            Value::Null,
            Value::Null,
            Value::Null,
        ]]);
        let all = mapper.map_all(&mut rows).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].things.is_empty());
    }

    #[test]
    fn test_self_join_aliases_are_distinct() {
        let nested = JoiningRowMapper::builder(node_rows())
            .join(JoinSpec::new("owner_id", "id", node_rows(), owner()));
        let mapper = JoiningRowMapper::builder(node_rows())
            .join(JoinSpec::new("owner_id", "id", nested, owner()))
            .build()
            .unwrap();
        let graph = mapper.join_graph();
        let aliases: Vec<_> = graph.nodes.iter().map(|n| n.alias.as_str()).collect();
        assert_eq!(aliases, vec!["0__node", "1__node", "2__node"]);
        assert_eq!(graph.node(2).unwrap().depth, 2);
        assert_eq!(graph.children(1).count(), 1);
        assert!(mapper
            .select_sql()
            .contains("LEFT JOIN node AS \"2__node\" ON \"1__node\".\"owner_id\" = \"2__node\".\"id\""));
    }

    #[test]
    fn test_depth_limit_is_setup_error() {
        let nested = JoiningRowMapper::builder(node_rows())
            .join(JoinSpec::new("owner_id", "id", node_rows(), owner()));
        let builder = JoiningRowMapper::builder(node_rows())
            .join(JoinSpec::new("owner_id", "id", nested, owner()));
        let err = builder
            .build_with_config(&JoinConfig { max_join_depth: 1 })
            .err()
            .unwrap();
        assert!(err.is_setup());
        assert!(builder.build_with_config(&JoinConfig { max_join_depth: 2 }).is_ok());
    }

    #[test]
    fn test_unknown_join_column_is_setup_error() {
        let err = JoiningRowMapper::builder(linky_rows())
            .join(JoinSpec::new("nope", "link", thing_rows(), things()))
            .build()
            .err()
            .unwrap();
        assert!(err.is_setup());
    }

    #[test]
    fn test_collection_cannot_supply_parent_key() {
        let err = JoiningRowMapper::builder(linky_rows())
            .join(
                JoinSpec::new("link", "link", thing_rows(), things())
                    .on_insert(InsertCascade::ParentNeedsId),
            )
            .build()
            .err()
            .unwrap();
        assert!(err.is_setup());
    }

    #[test]
    fn test_nested_single_keeps_collecting_while_its_key_repeats() {
        let mapper = JoiningRowMapper::builder(holder_rows())
            .join(JoinSpec::new(
                "link",
                "id",
                linky_with_things(),
                Accessor::single(
                    |h: &Holder| h.linky.as_ref(),
                    |h| h.linky.as_mut(),
                    |h, l| h.linky = Some(l),
                ),
            ))
            .build()
            .unwrap();
        let mut rows = holder_rows_set(vec![holder_row(1, 10, "A"), holder_row(1, 11, "B")]);
        let all = mapper.map_all(&mut rows).unwrap();
        assert_eq!(all.len(), 1);
        let linky = all[0].linky.as_ref().unwrap();
        let names: Vec<_> = linky.things.iter().filter_map(|t| t.name.as_deref()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_nested_collection_groups_by_member_key() {
        let mapper = JoiningRowMapper::builder(holder_rows())
            .join(JoinSpec::new(
                "link",
                "link",
                linky_with_things(),
                Accessor::collection(
                    |h: &Holder| h.linkies.as_slice(),
                    |h| h.linkies.as_mut_slice(),
                    |h, l| h.linkies.push(l),
                ),
            ))
            .build()
            .unwrap();
        let mut rows = holder_rows_set(vec![
            holder_row(5, 10, "A"),
            holder_row(5, 11, "B"),
            holder_row(6, 12, "C"),
        ]);
        let all = mapper.map_all(&mut rows).unwrap();
        assert_eq!(all.len(), 1);
        let linkies = &all[0].linkies;
        assert_eq!(linkies.iter().map(|l| l.id).collect::<Vec<_>>(), vec![Some(5), Some(6)]);
        assert_eq!(linkies[0].things.len(), 2);
        assert_eq!(linkies[1].things.len(), 1);
    }

    #[test]
    fn test_related_insert_values_walk_collection() {
        let mapper = linky_mapper();
        let linky = Linky {
            id: Some(1),
            link: Some(1),
            things: vec![
                Thing { id: Some(10), link: Some(1), name: Some("A".into()) },
                Thing { id: None, link: Some(1), name: None },
            ],
        };
        assert_eq!(
            mapper.related_insert_values(&linky),
            vec![(
                1,
                vec![
                    vec![Value::Long(1), Value::Text("A".into())],
                    vec![Value::Long(1), Value::Null],
                ]
            )]
        );
    }
}
