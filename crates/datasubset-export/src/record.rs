//! Framed binary export records.
//!
//! A stream is a sequence of frames: a 4-byte big-endian length followed by
//! the JSON encoding of one [`ExportRecord`]. The first record of a run is a
//! [`ExportHeader`]; each table gets a [`TableMetadata`] record before its
//! first row. Column types come from the row source's catalog when it
//! describes the table, otherwise from the first row's values.

use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use datasubset_core::{Error, FORMAT_VERSION, Result, Row, TableNode, Value};
use serde::{Deserialize, Serialize};

use crate::source::ItemGenerator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ExportRecord {
    Header(ExportHeader),
    Table(TableMetadata),
    Row(RowData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportHeader {
    pub version: String,
    pub db_type: String,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_key: u32,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    pub table_key: u32,
    pub values: Vec<Value>,
}

/// Emits header, table metadata and row records.
pub struct RecordExporter {
    db_type: String,
    header_written: bool,
    table_keys: HashMap<String, u32>,
    described: HashMap<String, Vec<ColumnMetadata>>,
}

impl RecordExporter {
    pub fn new(db_type: impl Into<String>) -> Self {
        Self {
            db_type: db_type.into(),
            header_written: false,
            table_keys: HashMap::new(),
            described: HashMap::new(),
        }
    }

    fn columns_for(&self, table: &TableNode, row: &Row) -> Vec<ColumnMetadata> {
        let described = self.described.get(table.key());
        row.iter()
            .map(|(name, value)| {
                let catalog = described.and_then(|columns| {
                    columns
                        .iter()
                        .find(|column| column.name.eq_ignore_ascii_case(name))
                });
                let data_type = match (catalog, value) {
                    (Some(column), _) => column.data_type.clone(),
                    (None, Value::Null) => "unknown".to_string(),
                    (None, value) => value.kind().to_string(),
                };
                ColumnMetadata {
                    name: name.to_string(),
                    data_type,
                }
            })
            .collect()
    }
}

impl ItemGenerator for RecordExporter {
    type Item = ExportRecord;

    fn init_export(&mut self) {
        self.header_written = false;
        self.table_keys.clear();
        self.described.clear();
    }

    fn describe_table(&mut self, table: &TableNode, columns: &[ColumnMetadata]) {
        self.described
            .insert(table.key().to_string(), columns.to_vec());
    }

    fn generate(&mut self, table: &TableNode, row: &Row) -> Result<Vec<ExportRecord>> {
        let mut records = Vec::with_capacity(3);

        if !self.header_written {
            self.header_written = true;
            records.push(ExportRecord::Header(ExportHeader {
                version: FORMAT_VERSION.to_string(),
                db_type: self.db_type.clone(),
                exported_at: Utc::now(),
            }));
        }

        let table_key = match self.table_keys.get(table.key()) {
            Some(key) => *key,
            None => {
                let key = u32::try_from(self.table_keys.len()).map_err(|_| {
                    Error::Unsupported("more than u32::MAX tables in one export".to_string())
                })?;
                self.table_keys.insert(table.key().to_string(), key);
                records.push(ExportRecord::Table(TableMetadata {
                    table_key: key,
                    schema: table.schema().to_string(),
                    table: table.name().to_string(),
                    columns: self.columns_for(table, row),
                }));
                key
            }
        };

        records.push(ExportRecord::Row(RowData {
            table_key,
            values: row.values().cloned().collect(),
        }));
        Ok(records)
    }
}

/// Length-prefixed JSON frame for one record.
pub fn encode_frame(record: &ExportRecord) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(record)?;
    let length = u32::try_from(body.len())
        .map_err(|_| Error::Unsupported("record larger than 4 GiB".to_string()))?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn write_frame<W: Write>(writer: &mut W, record: &ExportRecord) -> Result<()> {
    writer.write_all(&encode_frame(record)?)?;
    Ok(())
}

/// Split a buffer of frames back into records.
pub fn decode_frames(mut bytes: &[u8]) -> Result<Vec<ExportRecord>> {
    let mut records = Vec::new();
    while !bytes.is_empty() {
        let Some((length, rest)) = bytes.split_first_chunk::<4>() else {
            return Err(Error::DataIntegrity("truncated frame length".to_string()));
        };
        let length = u32::from_be_bytes(*length) as usize;
        if rest.len() < length {
            return Err(Error::DataIntegrity(format!(
                "frame declares {length} bytes but only {} remain",
                rest.len()
            )));
        }
        let (body, tail) = rest.split_at(length);
        records.push(serde_json::from_slice(body)?);
        bytes = tail;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, name: &str) -> Row {
        [("id", Value::Int(id)), ("name", Value::Text(name.into()))]
            .into_iter()
            .collect()
    }

    #[test]
    fn header_and_table_metadata_precede_first_row() {
        let mut exporter = RecordExporter::new("postgres");
        let users = TableNode::new("public", "users");
        let teams = TableNode::new("public", "teams");

        let first = exporter.generate(&users, &row(1, "a")).unwrap();
        assert_eq!(first.len(), 3);
        assert!(matches!(
            &first[0],
            ExportRecord::Header(h) if h.db_type == "postgres" && h.version == FORMAT_VERSION
        ));
        let ExportRecord::Table(meta) = &first[1] else {
            panic!("expected table metadata");
        };
        assert_eq!(meta.table_key, 0);
        assert_eq!(meta.columns[1].name, "name");
        assert_eq!(meta.columns[1].data_type, "text");

        let second = exporter.generate(&users, &row(2, "b")).unwrap();
        assert_eq!(
            second,
            vec![ExportRecord::Row(RowData {
                table_key: 0,
                values: vec![Value::Int(2), Value::Text("b".into())],
            })]
        );

        let third = exporter.generate(&teams, &row(1, "t")).unwrap();
        assert_eq!(third.len(), 2);
        assert!(matches!(&third[0], ExportRecord::Table(meta) if meta.table_key == 1));
    }

    #[test]
    fn described_columns_override_value_kinds() {
        let mut exporter = RecordExporter::new("postgres");
        let users = TableNode::new("public", "users");
        exporter.describe_table(
            &users,
            &[
                ColumnMetadata {
                    name: "ID".into(),
                    data_type: "bigint".into(),
                },
                ColumnMetadata {
                    name: "name".into(),
                    data_type: "character varying(40)".into(),
                },
            ],
        );

        let nameless: Row = [("id", Value::Int(1)), ("name", Value::Null)]
            .into_iter()
            .collect();
        let records = exporter.generate(&users, &nameless).unwrap();
        let ExportRecord::Table(meta) = &records[1] else {
            panic!("expected table metadata");
        };
        let types: Vec<_> = meta.columns.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(types, ["bigint", "character varying(40)"]);
    }

    #[test]
    fn undescribed_null_columns_are_unknown() {
        let mut exporter = RecordExporter::new("postgres");
        let teams = TableNode::new("public", "teams");
        let row: Row = [("id", Value::Int(1)), ("motto", Value::Null)]
            .into_iter()
            .collect();

        let records = exporter.generate(&teams, &row).unwrap();
        let ExportRecord::Table(meta) = &records[1] else {
            panic!("expected table metadata");
        };
        assert_eq!(meta.columns[0].data_type, "int");
        assert_eq!(meta.columns[1].data_type, "unknown");
    }

    #[test]
    fn init_export_restarts_header_and_keys() {
        let mut exporter = RecordExporter::new("postgres");
        let users = TableNode::new("public", "users");
        exporter.generate(&users, &row(1, "a")).unwrap();

        exporter.init_export();
        let again = exporter.generate(&users, &row(1, "a")).unwrap();
        assert_eq!(again.len(), 3);
    }

    #[test]
    fn frames_carry_big_endian_length() {
        let record = ExportRecord::Row(RowData {
            table_key: 3,
            values: vec![Value::Null],
        });
        let frame = encode_frame(&record).unwrap();
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(length, frame.len() - 4);

        let mut stream = Vec::new();
        write_frame(&mut stream, &record).unwrap();
        write_frame(&mut stream, &record).unwrap();
        assert_eq!(decode_frames(&stream).unwrap(), vec![record.clone(), record]);
    }

    #[test]
    fn non_finite_floats_round_trip_through_frames() {
        let record = ExportRecord::Row(RowData {
            table_key: 0,
            values: vec![
                Value::Float(f64::NAN),
                Value::Float(f64::INFINITY),
                Value::Float(f64::NEG_INFINITY),
                Value::Float(0.5),
            ],
        });
        let decoded = decode_frames(&encode_frame(&record).unwrap()).unwrap();

        let [ExportRecord::Row(row)] = decoded.as_slice() else {
            panic!("expected one row record");
        };
        assert!(matches!(row.values[0], Value::Float(value) if value.is_nan()));
        assert_eq!(
            row.values[1..],
            [
                Value::Float(f64::INFINITY),
                Value::Float(f64::NEG_INFINITY),
                Value::Float(0.5)
            ]
        );
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let record = ExportRecord::Row(RowData {
            table_key: 0,
            values: Vec::new(),
        });
        let frame = encode_frame(&record).unwrap();
        assert!(matches!(
            decode_frames(&frame[..frame.len() - 1]),
            Err(Error::DataIntegrity(_))
        ));
        assert!(matches!(decode_frames(&frame[..2]), Err(Error::DataIntegrity(_))));
    }
}
