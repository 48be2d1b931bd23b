use datasubset_core::{TableNode, Value};

/// SQL text rendering for one engine.
pub trait SqlDialect: Send + Sync {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn qualified_table(&self, table: &TableNode) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(table.schema()),
            self.quote_identifier(table.name())
        )
    }

    /// SQL literal for `value`.
    fn literal(&self, value: &Value) -> String;
}

/// Single-quoted string literal with embedded quotes doubled.
pub fn quote_string(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// ANSI SQL literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl SqlDialect for GenericDialect {
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(int) => int.to_string(),
            Value::Float(float) if float.is_finite() => float.to_string(),
            Value::Float(float) => quote_string(&float.to_string()),
            Value::Text(text) => quote_string(text),
            Value::Bytes(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
            Value::Uuid(uuid) => quote_string(&uuid.to_string()),
            Value::Date(date) => format!("DATE '{date}'"),
            Value::Time(time) => format!("TIME '{time}'"),
            Value::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(ts) => format!(
                "TIMESTAMP WITH TIME ZONE '{}'",
                ts.format("%Y-%m-%d %H:%M:%S%.f%:z")
            ),
            Value::Json(json) => quote_string(&json.to_string()),
            // An empty ARRAY[] cannot be typed; the bare literal takes the column's type.
            Value::Array(items) if items.is_empty() => "'{}'".to_string(),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| self.literal(item)).collect();
                format!("ARRAY[{}]", items.join(", "))
            }
            Value::Typed { text, .. } => quote_string(text),
        }
    }
}
