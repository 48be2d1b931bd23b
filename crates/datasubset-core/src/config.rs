//! Export configuration file model.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::ColumnBinding;

fn default_schema() -> String {
    "public".to_string()
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Top-level export configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    /// Export roots, processed in order.
    #[serde(default)]
    pub tables_to_export: Vec<TableExportConfig>,
    /// Per-table relations not backed by foreign keys.
    #[serde(default)]
    pub model_config: Vec<TableConfiguration>,
    /// Tables excluded from discovery and relation building.
    #[serde(default)]
    pub table_ignore_config: Vec<TableToIgnore>,
    /// Schemas to discover. Defaults to the schemas of `tablesToExport`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<String>,
    /// Connection URL; a command-line value takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl ExportConfig {
    /// Load a config file. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn table_export_config(&self, schema: &str, table: &str) -> Option<&TableExportConfig> {
        self.tables_to_export
            .iter()
            .find(|config| config.matches(schema, table))
    }

    pub fn model_config(&self, schema: &str, table: &str) -> Option<&TableConfiguration> {
        self.model_config
            .iter()
            .find(|config| config.matches(schema, table))
    }

    /// Schemas handed to discovery: the explicit list, or the distinct
    /// schemas of the export roots in first-seen order.
    pub fn discovery_schemas(&self) -> Vec<String> {
        if !self.schemas.is_empty() {
            return self.schemas.clone();
        }
        let mut seen = BTreeSet::new();
        self.tables_to_export
            .iter()
            .filter(|config| seen.insert(config.schema.to_lowercase()))
            .map(|config| config.schema.clone())
            .collect()
    }

    /// Every validation problem, prefixed by the entity it belongs to.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for config in &self.tables_to_export {
            for error in config.validate() {
                errors.push(format!("Table Export Config: {error}"));
            }
        }
        for config in &self.model_config {
            for error in config.validate() {
                errors.push(format!("Model Config ({}): {error}", config.full_name()));
            }
        }
        for ignore in &self.table_ignore_config {
            for error in ignore.validate() {
                errors.push(format!("Table Ignore Config: {error}"));
            }
        }
        errors
    }

    /// [`ExportConfig::validate`] folded into a single error.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors.join("; ")))
        }
    }
}

/// One export root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableExportConfig {
    pub schema: String,
    pub table_name: String,
    /// Predicate appended to the root selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Explicit primary key values, combined with `whereClause` by AND.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_value: Option<Vec<PrimaryKeyValue>>,
}

impl TableExportConfig {
    pub fn new(schema: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn with_primary_key_value(
        mut self,
        column_name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.primary_key_value
            .get_or_insert_with(Vec::new)
            .push(PrimaryKeyValue {
                column_name: column_name.into(),
                value: value.into(),
            });
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.table_name.eq_ignore_ascii_case(table)
    }

    /// Non-blank where clause.
    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause
            .as_deref()
            .filter(|clause| !is_blank(clause))
    }

    pub fn primary_key_values(&self) -> &[PrimaryKeyValue] {
        self.primary_key_value.as_deref().unwrap_or(&[])
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if is_blank(&self.schema) {
            errors.push("Schema name is required".to_string());
        }
        if is_blank(&self.table_name) {
            errors.push("Table name is required".to_string());
        }
        for (index, value) in self.primary_key_values().iter().enumerate() {
            if is_blank(&value.column_name) {
                errors.push(format!("Primary key value {}: column name is required", index + 1));
            }
            if value.value.is_null() {
                errors.push(format!(
                    "Primary key value {}: value for {} must not be null",
                    index + 1,
                    value.column_name
                ));
            }
        }
        errors
    }
}

impl fmt::Display for TableExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if let Some(clause) = self.where_clause() {
            write!(f, " WHERE {clause}")?;
        }
        Ok(())
    }
}

/// Column/value pair selecting a root row by primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKeyValue {
    pub column_name: String,
    pub value: serde_json::Value,
}

/// Relations declared for one table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableConfiguration {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table_name: String,
    #[serde(default)]
    pub implicit_relations: Vec<ImplicitRelation>,
}

impl TableConfiguration {
    pub fn new(schema: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table_name: table_name.into(),
            implicit_relations: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.table_name.eq_ignore_ascii_case(table)
    }

    /// Add `relation` unless an equivalent one is already declared.
    pub fn add_implicit_relation(&mut self, relation: ImplicitRelation) -> bool {
        if self.contains_relation(&relation) {
            return false;
        }
        self.implicit_relations.push(relation);
        true
    }

    /// Remove the first relation equal to `relation`.
    pub fn remove_implicit_relation(&mut self, relation: &ImplicitRelation) -> bool {
        match self
            .implicit_relations
            .iter()
            .position(|existing| existing == relation)
        {
            Some(index) => {
                self.implicit_relations.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains_relation(&self, relation: &ImplicitRelation) -> bool {
        self.implicit_relations
            .iter()
            .any(|existing| existing.is_equivalent(relation))
    }

    /// Relations that bind `source_column` (case-insensitive).
    pub fn relations_by_source_column(&self, source_column: &str) -> Vec<&ImplicitRelation> {
        self.implicit_relations
            .iter()
            .filter(|relation| {
                relation
                    .column_bindings
                    .iter()
                    .any(|binding| binding.source_column.eq_ignore_ascii_case(source_column))
            })
            .collect()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if is_blank(&self.schema) {
            errors.push("Schema name is required.".to_string());
        }
        if is_blank(&self.table_name) {
            errors.push("Table name is required.".to_string());
        }
        for (index, relation) in self.implicit_relations.iter().enumerate() {
            for error in relation.validate() {
                errors.push(format!("Implicit relation {}: {error}", index + 1));
            }
        }
        errors
    }
}

impl fmt::Display for TableConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.implicit_relations.len() {
            0 => write!(f, "{} (no relations)", self.full_name()),
            count => write!(f, "{} ({count} relations)", self.full_name()),
        }
    }
}

/// Relation from the configured table to `targetSchema.targetTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitRelation {
    pub target_schema: String,
    pub target_table: String,
    #[serde(default)]
    pub column_bindings: Vec<ColumnBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
}

impl ImplicitRelation {
    pub fn new(
        target_schema: impl Into<String>,
        target_table: impl Into<String>,
        column_bindings: Vec<ColumnBinding>,
    ) -> Self {
        Self {
            target_schema: target_schema.into(),
            target_table: target_table.into(),
            column_bindings,
            where_clause: None,
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn target_full_name(&self) -> String {
        format!("{}.{}", self.target_schema, self.target_table)
    }

    /// Same target, where clause and bindings, ignoring case and binding order.
    pub fn is_equivalent(&self, other: &ImplicitRelation) -> bool {
        let same_where = match (&self.where_clause, &other.where_clause) {
            (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
            (None, None) => true,
            _ => false,
        };
        self.target_schema.eq_ignore_ascii_case(&other.target_schema)
            && self.target_table.eq_ignore_ascii_case(&other.target_table)
            && same_where
            && self.column_bindings.len() == other.column_bindings.len()
            && self.column_bindings.iter().all(|left| {
                other.column_bindings.iter().any(|right| {
                    left.source_column.eq_ignore_ascii_case(&right.source_column)
                        && left.target_column.eq_ignore_ascii_case(&right.target_column)
                })
            })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.column_bindings.is_empty() {
            errors.push("At least one column binding must be configured.".to_string());
        }
        if is_blank(&self.target_schema) {
            errors.push("Target schema is required.".to_string());
        }
        if is_blank(&self.target_table) {
            errors.push("Target table is required.".to_string());
        }
        errors
    }
}

/// Table excluded from the graph entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableToIgnore {
    pub schema: String,
    pub table_name: String,
}

impl TableToIgnore {
    pub fn new(schema: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table_name: table_name.into(),
        }
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.table_name.eq_ignore_ascii_case(table)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if is_blank(&self.schema) {
            errors.push("Schema name is required".to_string());
        }
        if is_blank(&self.table_name) {
            errors.push("Table name is required".to_string());
        }
        errors
    }
}

impl fmt::Display for TableToIgnore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table_name)
    }
}

/// Whether any entry of `ignored` matches `schema.table`.
pub fn is_ignored(ignored: &[TableToIgnore], schema: &str, table: &str) -> bool {
    ignored.iter().any(|entry| entry.matches(schema, table))
}
