use std::collections::{HashSet, VecDeque};

use datasubset_core::{
    DatabaseGraph, Error, Result, Row, TableDependencyEdge, TableExportConfig, TableNode, TableRef,
};
use futures::stream::{self, Stream};

use crate::selection::SelectionCondition;
use crate::source::{ItemGenerator, RowSource};

/// Identity of a physical row within one export run:
/// `schema.table^<pk value>^...`.
///
/// Primary key columns are taken in row order. Rows of tables without a
/// primary key, or rows carrying none of its columns, are identified by
/// every value they hold.
pub fn row_identity_key(table: &TableNode, row: &Row) -> String {
    let mut key = String::from(table.key());
    key.push('^');

    let primary_key = table.primary_key_columns();
    let mut matched = false;
    for (column, value) in row.iter() {
        if primary_key
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(column))
        {
            key.push_str(&value.key_fragment());
            key.push('^');
            matched = true;
        }
    }

    if !matched {
        for value in row.values() {
            key.push_str(&value.key_fragment());
            key.push('^');
        }
    }
    key
}

/// Export engine. Holds the row source, the item generator and the set of
/// rows already exported in the current run.
///
/// A traversal is not meant to be shared; run independent exports with
/// separate instances.
pub struct ExportTraversal<S, G> {
    source: S,
    generator: G,
    exported: HashSet<String>,
    described: HashSet<String>,
}

impl<S, G> ExportTraversal<S, G>
where
    S: RowSource,
    G: ItemGenerator,
{
    pub fn new(source: S, generator: G) -> Self {
        Self {
            source,
            generator,
            exported: HashSet::new(),
            described: HashSet::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn into_parts(self) -> (S, G) {
        (self.source, self.generator)
    }

    /// Rows marked as exported by the current or last run.
    pub fn exported_rows(&self) -> usize {
        self.exported.len()
    }

    /// Start a run over `roots`, in order. Resets the exported set and both
    /// collaborators. Nothing is fetched until the run is polled.
    pub fn export<'a>(
        &'a mut self,
        roots: &'a [TableExportConfig],
        graph: &'a DatabaseGraph,
    ) -> ExportRun<'a, S, G> {
        self.exported.clear();
        self.described.clear();
        self.source.init_export();
        self.generator.init_export();

        tracing::info!(
            event = "export_started",
            roots = roots.len(),
            tables = graph.node_count()
        );

        ExportRun {
            traversal: self,
            graph,
            roots: roots.iter(),
            stack: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Run an export to completion and collect every item.
    pub async fn export_all(
        &mut self,
        roots: &[TableExportConfig],
        graph: &DatabaseGraph,
    ) -> Result<Vec<G::Item>> {
        let mut run = self.export(roots, graph);
        let mut items = Vec::new();
        while let Some(item) = run.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

/// Rows fetched for one table, and the row currently being expanded.
struct Frame<'a> {
    table: &'a TableRef,
    rows: VecDeque<Row>,
    current: Option<Cursor>,
}

impl<'a> Frame<'a> {
    fn new(table: &'a TableRef, rows: Vec<Row>) -> Self {
        Self {
            table,
            rows: rows.into(),
            current: None,
        }
    }
}

struct Cursor {
    row: Row,
    phase: Phase,
}

/// Position within one row: foreign keys, then the row itself, then
/// declared relations. Indices point into the table's outgoing edges.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Parents(usize),
    Emit,
    Related(usize),
}

/// One lazy export run. Pull items with [`ExportRun::next`] or adapt it with
/// [`ExportRun::into_stream`].
///
/// Each poll does at most one row fetch. Dropping the run early leaves no
/// fetch in flight. After an error the run yields nothing more.
pub struct ExportRun<'a, S, G: ItemGenerator> {
    traversal: &'a mut ExportTraversal<S, G>,
    graph: &'a DatabaseGraph,
    roots: std::slice::Iter<'a, TableExportConfig>,
    stack: Vec<Frame<'a>>,
    pending: VecDeque<G::Item>,
    finished: bool,
}

impl<'a, S, G> ExportRun<'a, S, G>
where
    S: RowSource,
    G: ItemGenerator,
{
    /// Next item in output order, `None` once the run is complete.
    pub async fn next(&mut self) -> Option<Result<G::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            if self.finished {
                return None;
            }

            match self.step().await {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    tracing::info!(
                        event = "export_finished",
                        rows = self.traversal.exported.len()
                    );
                }
                Err(err) => {
                    self.finished = true;
                    self.stack.clear();
                    tracing::error!(event = "export_failed", error = %err);
                    return Some(Err(err));
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<G::Item>> {
        stream::unfold(self, |mut run| async move {
            let item = run.next().await?;
            Some((item, run))
        })
    }

    /// Advance the walk by one unit of work. `Ok(false)` once every root is done.
    async fn step(&mut self) -> Result<bool> {
        let graph: &'a DatabaseGraph = self.graph;

        let Some(frame) = self.stack.last_mut() else {
            return self.start_next_root().await;
        };

        let Some(cursor) = frame.current.as_mut() else {
            match frame.rows.pop_front() {
                Some(row) => {
                    let key = row_identity_key(frame.table, &row);
                    if self.traversal.exported.insert(key) {
                        frame.current = Some(Cursor {
                            row,
                            phase: Phase::Parents(0),
                        });
                    }
                }
                None => {
                    self.stack.pop();
                }
            }
            return Ok(true);
        };

        let table: &'a TableRef = frame.table;
        let edges = graph.outgoing_edges(table);

        let (index, parents) = match cursor.phase {
            Phase::Emit => {
                let items = self.traversal.generator.generate(table, &cursor.row)?;
                tracing::debug!(event = "row_exported", table = %table.full_name());
                self.pending.extend(items);
                cursor.phase = Phase::Related(0);
                return Ok(true);
            }
            Phase::Parents(index) => (index, true),
            Phase::Related(index) => (index, false),
        };

        let Some(edge) = edges.get(index) else {
            if parents {
                cursor.phase = Phase::Emit;
            } else {
                frame.current = None;
            }
            return Ok(true);
        };
        cursor.phase = if parents {
            Phase::Parents(index + 1)
        } else {
            Phase::Related(index + 1)
        };

        let Some(data) = edge.data.as_ref() else {
            return Ok(true);
        };
        if data.is_foreign_key() != parents {
            return Ok(true);
        }
        let Some(selection) = SelectionCondition::for_edge(data, &cursor.row) else {
            tracing::debug!(
                event = "edge_skipped_null",
                source = %table.full_name(),
                target = %edge.target.full_name()
            );
            return Ok(true);
        };

        let target: &'a TableRef = &edge.target;
        let rows = self.fetch(target, Some(data), &selection).await?;
        self.stack.push(Frame::new(target, rows));
        Ok(true)
    }

    async fn start_next_root(&mut self) -> Result<bool> {
        let graph: &'a DatabaseGraph = self.graph;
        while let Some(root) = self.roots.next() {
            let Some(table) = graph.find_table(&root.schema, &root.table_name) else {
                tracing::warn!(event = "root_table_missing", table = %root.full_name());
                continue;
            };

            tracing::debug!(event = "root_started", root = %root);
            let selection = SelectionCondition::for_root(root);
            let rows = self.fetch(table, None, &selection).await?;
            self.stack.push(Frame::new(table, rows));
            return Ok(true);
        }
        Ok(false)
    }

    async fn fetch(
        &mut self,
        table: &TableNode,
        edge: Option<&TableDependencyEdge>,
        selection: &SelectionCondition,
    ) -> Result<Vec<Row>> {
        let rows = self
            .traversal
            .source
            .fetch_rows(table, edge, selection)
            .await?;

        if rows.len() > 1 && selection.is_unique_lookup(table) {
            return Err(Error::DataIntegrity(format!(
                "{} returned {} rows for a primary key lookup",
                table.full_name(),
                rows.len()
            )));
        }

        let traversal = &mut *self.traversal;
        if !traversal.described.contains(table.key())
            && let Some(columns) = traversal.source.column_types(table)
        {
            traversal.generator.describe_table(table, &columns);
            traversal.described.insert(table.key().to_string());
        }

        tracing::debug!(
            event = "rows_fetched",
            table = %table.full_name(),
            rows = rows.len()
        );
        Ok(rows)
    }
}
