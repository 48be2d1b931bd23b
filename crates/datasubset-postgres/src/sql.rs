//! SELECT text for row fetches.
//!
//! Every parameter is bound as text and cast back to the column's declared
//! type inside the statement, so one binding path serves every column type.

use datasubset_core::{Error, Result, TableNode, Value};
use datasubset_export::{SelectionCondition, SqlDialect};

use crate::dialect::PostgresDialect;

/// Catalog facts about one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `pg_type.typname`, e.g. `int4` or `_text`.
    pub type_name: String,
    /// `format_type` output, e.g. `character varying(40)`.
    pub sql_type: String,
}

/// Types decoded into a native [`Value`]; everything else is read as text.
pub fn is_native(type_name: &str) -> bool {
    matches!(
        type_name,
        "bool"
            | "int2"
            | "int4"
            | "int8"
            | "float4"
            | "float8"
            | "text"
            | "varchar"
            | "bpchar"
            | "name"
            | "uuid"
            | "date"
            | "time"
            | "timestamp"
            | "timestamptz"
            | "json"
            | "jsonb"
            | "bytea"
            | "_bool"
            | "_int4"
            | "_int8"
            | "_float8"
            | "_text"
    )
}

pub fn select_list(columns: &[ColumnInfo]) -> String {
    let dialect = PostgresDialect;
    columns
        .iter()
        .map(|column| {
            let quoted = dialect.quote_identifier(&column.name);
            if is_native(&column.type_name) {
                quoted
            } else {
                format!("{quoted}::text AS {quoted}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statement for `selection` against `table`. Parameters are numbered in
/// [`SelectionCondition::equalities`] order.
pub fn build_select(
    table: &TableNode,
    columns: &[ColumnInfo],
    selection: &SelectionCondition,
) -> Result<String> {
    let dialect = PostgresDialect;
    let mut conditions = Vec::new();
    for (index, (column, _)) in selection.equalities().enumerate() {
        let info = columns
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "column {column} does not exist in {}",
                    table.full_name()
                ))
            })?;
        conditions.push(format!(
            "{} = ${}::text::{}",
            dialect.quote_identifier(&info.name),
            index + 1,
            info.sql_type
        ));
    }
    if let Some(clause) = &selection.where_clause {
        conditions.push(format!("({clause})"));
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list(columns),
        dialect.qualified_table(table)
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    Ok(sql)
}

/// Text form of a parameter, parsed back by the cast in the statement.
pub fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Int(int) => Some(int.to_string()),
        Value::Float(float) => Some(float.to_string()),
        Value::Text(text) => Some(text.clone()),
        Value::Bytes(bytes) => Some(format!("\\x{}", hex::encode(bytes))),
        Value::Uuid(uuid) => Some(uuid.to_string()),
        Value::Date(date) => Some(date.to_string()),
        Value::Time(time) => Some(time.to_string()),
        Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => Some(ts.to_rfc3339()),
        Value::Json(json) => Some(json.to_string()),
        Value::Array(items) => Some(array_text(items)),
        Value::Typed { text, .. } => Some(text.clone()),
    }
}

fn array_text(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match param_text(item) {
            None => "NULL".to_string(),
            Some(text) if matches!(item, Value::Array(_)) => text,
            Some(text) => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}
