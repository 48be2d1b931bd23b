use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::Row as _;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use datasubset_core::{Result, Row, Value};

use crate::db_error;
use crate::sql::ColumnInfo;

/// Decode a fetched row. `columns` is the select list the statement was
/// built from, in the same order.
pub fn decode_row(row: &PgRow, columns: &[ColumnInfo]) -> Result<Row> {
    let mut decoded = Row::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        decoded.push(column.name.clone(), decode_value(row, index, column)?);
    }
    Ok(decoded)
}

fn decode_value(row: &PgRow, index: usize, column: &ColumnInfo) -> Result<Value> {
    let value = match column.type_name.as_str() {
        "bool" => get::<bool>(row, index)?.map(Value::Bool),
        "int2" => get::<i16>(row, index)?.map(|v| Value::Int(v.into())),
        "int4" => get::<i32>(row, index)?.map(|v| Value::Int(v.into())),
        "int8" => get::<i64>(row, index)?.map(Value::Int),
        "float4" => get::<f32>(row, index)?.map(|v| Value::Float(v.into())),
        "float8" => get::<f64>(row, index)?.map(Value::Float),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, index)?.map(Value::Text),
        "uuid" => get::<Uuid>(row, index)?.map(Value::Uuid),
        "date" => get::<NaiveDate>(row, index)?.map(Value::Date),
        "time" => get::<NaiveTime>(row, index)?.map(Value::Time),
        "timestamp" => get::<NaiveDateTime>(row, index)?.map(Value::Timestamp),
        "timestamptz" => get::<DateTime<Utc>>(row, index)?.map(Value::TimestampTz),
        "json" | "jsonb" => get::<serde_json::Value>(row, index)?.map(Value::Json),
        "bytea" => get::<Vec<u8>>(row, index)?.map(Value::Bytes),
        "_bool" => array::<bool>(row, index, Value::Bool)?,
        "_int4" => array::<i32>(row, index, |v| Value::Int(v.into()))?,
        "_int8" => array::<i64>(row, index, Value::Int)?,
        "_float8" => array::<f64>(row, index, Value::Float)?,
        "_text" => array::<String>(row, index, Value::Text)?,
        _ => get::<String>(row, index)?.map(|text| Value::Typed {
            text,
            type_name: column.sql_type.clone(),
        }),
    };
    Ok(match value {
        // `ARRAY[]` has no type of its own; keep the catalog type for rendering.
        Some(Value::Array(items)) if items.is_empty() => Value::Typed {
            text: "{}".to_string(),
            type_name: column.sql_type.clone(),
        },
        Some(value) => value,
        None => Value::Null,
    })
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(index).map_err(db_error)
}

fn array<T>(row: &PgRow, index: usize, wrap: impl Fn(T) -> Value) -> Result<Option<Value>>
where
    T: for<'a> sqlx::Decode<'a, sqlx::Postgres>
        + sqlx::Type<sqlx::Postgres>
        + sqlx::postgres::PgHasArrayType,
{
    let items = get::<Vec<Option<T>>>(row, index)?;
    Ok(items.map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map(&wrap).unwrap_or(Value::Null))
                .collect(),
        )
    }))
}
