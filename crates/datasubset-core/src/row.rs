//! Row and value model shared by row sources and exporters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Engine value decoded from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-finite values serialize as `"NaN"`, `"Infinity"` or `"-Infinity"`.
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    /// Value without a native variant, kept as its engine text form.
    Typed { text: String, type_name: String },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, or the engine type for [`Value::Typed`].
    pub fn kind(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Typed { type_name, .. } => type_name,
        }
    }

    /// Convert a JSON scalar from configuration. Objects stay JSON.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Value::Int(int),
                None => number.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(text) => Value::Text(text.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Json(value.clone()),
        }
    }

    /// Canonical rendering used in row identity keys. Tagged by kind so
    /// `1` and `'1'` differ; `^` and `\` are escaped.
    pub fn key_fragment(&self) -> String {
        match self {
            Value::Null => "n".to_string(),
            Value::Bool(flag) => format!("b:{flag}"),
            Value::Int(int) => format!("i:{int}"),
            Value::Float(float) => format!("f:{float}"),
            Value::Text(text) => format!("s:{}", escape_key(text)),
            Value::Bytes(bytes) => format!("x:{}", hex::encode(bytes)),
            Value::Uuid(uuid) => format!("u:{uuid}"),
            Value::Date(date) => format!("d:{date}"),
            Value::Time(time) => format!("t:{time}"),
            Value::Timestamp(ts) => format!("ts:{ts}"),
            Value::TimestampTz(ts) => format!("tz:{}", ts.to_rfc3339()),
            Value::Json(json) => format!("j:{}", escape_key(&json.to_string())),
            Value::Array(items) => {
                let mut out = String::from("a");
                for item in items {
                    let fragment = item.key_fragment();
                    out.push_str(&format!(":{}:{fragment}", fragment.len()));
                }
                out
            }
            Value::Typed { text, type_name } => {
                format!("{}:{}", escape_key(type_name), escape_key(text))
            }
        }
    }
}

mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else if value.is_infinite() {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("invalid float: {other}"))),
            },
        }
    }
}

fn escape_key(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('^', "\\^")
}

/// One row as an ordered list of column/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push((column.into(), value));
    }

    /// First value whose column matches `column`, ignoring case.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive() {
        let row: Row = [("Id", Value::Int(1)), ("Name", Value::Text("Alice".into()))]
            .into_iter()
            .collect();

        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("NAME"), Some(&Value::Text("Alice".into())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["Id", "Name"]);
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let values = vec![
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(1.25),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(
            json,
            r#"[{"type":"float","value":"Infinity"},{"type":"float","value":"-Infinity"},{"type":"float","value":1.25}]"#
        );
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);

        let nan: Value = serde_json::from_str(r#"{"type":"float","value":"NaN"}"#).unwrap();
        assert!(matches!(nan, Value::Float(value) if value.is_nan()));
        assert!(serde_json::from_str::<Value>(r#"{"type":"float","value":"big"}"#).is_err());
    }

    #[test]
    fn key_fragments_are_type_tagged() {
        assert_ne!(
            Value::Int(1).key_fragment(),
            Value::Text("1".into()).key_fragment()
        );
        assert_eq!(Value::Null.key_fragment(), "n");
    }

    #[test]
    fn key_fragments_escape_separator() {
        let fragment = Value::Text("a^b".into()).key_fragment();
        assert_eq!(fragment, "s:a\\^b");
        assert_ne!(
            Value::Text("a^".into()).key_fragment(),
            Value::Text("a\\^".into()).key_fragment()
        );
    }

    #[test]
    fn array_fragments_are_unambiguous() {
        let split = Value::Array(vec![Value::Text("a".into()), Value::Text("b".into())]);
        let joined = Value::Array(vec![Value::Text("a:1:s:b".into())]);
        assert_ne!(split.key_fragment(), joined.key_fragment());
    }

    #[test]
    fn json_scalars_convert() {
        assert_eq!(Value::from_json(&serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(&serde_json::json!("x")),
            Value::Text("x".into())
        );
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Null);
        assert!(matches!(
            Value::from_json(&serde_json::json!({"a": 1})),
            Value::Json(_)
        ));
    }

    #[test]
    fn typed_kind_reports_engine_type() {
        let value = Value::Typed {
            text: "12.50".into(),
            type_name: "numeric".into(),
        };
        assert_eq!(value.kind(), "numeric");
        assert_eq!(Value::Int(3).kind(), "int");
    }
}
