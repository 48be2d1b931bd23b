use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use datasubset_core::{Result, Row, TableDependencyEdge, TableNode, Value};
use datasubset_export::{ColumnMetadata, RowSource, SelectionCondition};

use crate::db_error;
use crate::decode::decode_row;
use crate::queries;
use crate::sql::{ColumnInfo, build_select, param_text};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SelectKey {
    table: String,
    target_columns: Vec<String>,
    where_clause: Option<String>,
    primary_key_columns: Vec<String>,
}

impl SelectKey {
    fn new(table: &TableNode, selection: &SelectionCondition) -> Self {
        let lower = |pairs: &[(String, Value)]| -> Vec<String> {
            pairs
                .iter()
                .map(|(column, _)| column.to_lowercase())
                .collect()
        };
        Self {
            table: table.key().to_string(),
            target_columns: lower(&selection.parent_values),
            where_clause: selection.where_clause.clone(),
            primary_key_columns: lower(&selection.primary_key_values),
        }
    }
}

/// Row source over a connection pool.
///
/// Each fetch holds one pooled connection for its duration. Column metadata
/// is cached per table for the lifetime of the source; statement text is
/// cached until the next export run.
pub struct PostgresRowSource {
    pool: PgPool,
    columns: HashMap<String, Arc<[ColumnInfo]>>,
    selects: HashMap<SelectKey, String>,
}

impl PostgresRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            columns: HashMap::new(),
            selects: HashMap::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RowSource for PostgresRowSource {
    fn init_export(&mut self) {
        self.selects.clear();
    }

    async fn fetch_rows(
        &mut self,
        table: &TableNode,
        _edge: Option<&TableDependencyEdge>,
        selection: &SelectionCondition,
    ) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;

        let columns = match self.columns.get(table.key()) {
            Some(columns) => Arc::clone(columns),
            None => {
                let columns: Arc<[ColumnInfo]> =
                    queries::list_columns(&mut conn, table.schema(), table.name())
                        .await?
                        .into();
                self.columns
                    .insert(table.key().to_string(), Arc::clone(&columns));
                columns
            }
        };

        let key = SelectKey::new(table, selection);
        let sql = match self.selects.get(&key) {
            Some(sql) => sql.clone(),
            None => {
                let sql = build_select(table, &columns, selection)?;
                tracing::debug!(event = "select_prepared", table = %table.full_name(), sql = %sql);
                self.selects.insert(key, sql.clone());
                sql
            }
        };

        let mut query = sqlx::query(&sql);
        for (_, value) in selection.equalities() {
            query = query.bind(param_text(value));
        }
        let rows = query.fetch_all(&mut *conn).await.map_err(db_error)?;

        rows.iter().map(|row| decode_row(row, &columns)).collect()
    }

    fn column_types(&self, table: &TableNode) -> Option<Vec<ColumnMetadata>> {
        let columns = self.columns.get(table.key())?;
        Some(
            columns
                .iter()
                .map(|column| ColumnMetadata {
                    name: column.name.clone(),
                    data_type: column.sql_type.clone(),
                })
                .collect(),
        )
    }
}
