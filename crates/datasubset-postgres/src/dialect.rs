use datasubset_core::Value;
use datasubset_export::{SqlDialect, quote_string};

/// PostgreSQL literals. Values without a bare literal form carry a cast.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(int) => int.to_string(),
            Value::Float(float) if float.is_finite() => float.to_string(),
            Value::Float(float) => format!("{}::float8", quote_string(&float.to_string())),
            Value::Text(text) => quote_string(text),
            Value::Bytes(bytes) => format!("'\\x{}'::bytea", hex::encode(bytes)),
            Value::Uuid(uuid) => format!("'{uuid}'::uuid"),
            Value::Date(date) => format!("'{date}'::date"),
            Value::Time(time) => format!("'{time}'::time"),
            Value::Timestamp(ts) => format!("'{}'::timestamp", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(ts) => {
                format!("'{}'::timestamptz", ts.format("%Y-%m-%d %H:%M:%S%.f%:z"))
            }
            Value::Json(json) => format!("{}::jsonb", quote_string(&json.to_string())),
            // An empty ARRAY[] cannot be typed; the bare literal takes the column's type.
            Value::Array(items) if items.is_empty() => "'{}'".to_string(),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| self.literal(item)).collect();
                format!("ARRAY[{}]", items.join(", "))
            }
            Value::Typed { text, type_name } => format!("{}::{type_name}", quote_string(text)),
        }
    }
}
