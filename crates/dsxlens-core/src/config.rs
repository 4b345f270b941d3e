//! Configuration schema (dsxlens.toml)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::diagnostic::EventSeverity;

/// Target database dialect for generated DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// Microsoft SQL Server
    Mssql,

    /// Vertica
    Vertica,

    /// PostgreSQL
    Postgres,

    /// Generic ANSI SQL
    Ansi,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self::Mssql
    }
}

/// How unqualified table references answer schema-qualified lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMatchPolicy {
    /// Unqualified references match a table in any schema (more false positives)
    Recall,

    /// Only references with the exact schema match
    Precision,
}

impl Default for SchemaMatchPolicy {
    fn default() -> Self {
        Self::Recall
    }
}

/// Property names that carry physical references
///
/// All names are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub table_properties: Vec<String>,
    pub schema_properties: Vec<String>,
    pub column_properties: Vec<String>,

    /// Properties that mark a record as a column definition when it also has a `Name`
    pub type_properties: Vec<String>,
    pub length_properties: Vec<String>,
    pub scale_properties: Vec<String>,
    pub nullable_properties: Vec<String>,
    pub key_properties: Vec<String>,

    /// Properties holding the expression a column is derived from
    pub derivation_properties: Vec<String>,

    /// Properties holding free-form SQL text
    pub sql_properties: Vec<String>,
    pub connection_properties: Vec<String>,

    /// Properties that state source/target/lookup usage directly
    pub usage_properties: Vec<String>,

    /// Properties holding a stage or link type name (e.g. `CCustomOutput`)
    pub stage_type_properties: Vec<String>,
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            table_properties: names(&["TableName", "table", "TargetTable", "SourceTable"]),
            schema_properties: names(&["SchemaName", "schema", "Owner"]),
            column_properties: names(&["ColumnName", "column"]),
            type_properties: names(&["SqlType", "type"]),
            length_properties: names(&["Precision", "Length", "length"]),
            scale_properties: names(&["Scale"]),
            nullable_properties: names(&["Nullable"]),
            key_properties: names(&["KeyPosition", "key"]),
            derivation_properties: names(&["Derivation", "ParsedDerivation"]),
            sql_properties: names(&[
                "SelectStatement",
                "SQL",
                "UserSQL",
                "InsertStatement",
                "UpdateStatement",
                "DeleteStatement",
                "BeforeSQL",
                "AfterSQL",
            ]),
            connection_properties: names(&["ConnectionString", "DSN", "DatabaseName", "DataSource", "ServerName"]),
            usage_properties: names(&["Context", "usage"]),
            stage_type_properties: names(&["StageType", "OLEType"]),
        }
    }
}

fn contains_name(list: &[String], name: &str) -> bool {
    list.iter().any(|n| n.eq_ignore_ascii_case(name))
}

impl Vocabulary {
    pub fn is_table_property(&self, name: &str) -> bool {
        contains_name(&self.table_properties, name)
    }

    pub fn is_schema_property(&self, name: &str) -> bool {
        contains_name(&self.schema_properties, name)
    }

    pub fn is_column_property(&self, name: &str) -> bool {
        contains_name(&self.column_properties, name)
    }

    pub fn is_type_property(&self, name: &str) -> bool {
        contains_name(&self.type_properties, name)
    }

    pub fn is_length_property(&self, name: &str) -> bool {
        contains_name(&self.length_properties, name)
    }

    pub fn is_scale_property(&self, name: &str) -> bool {
        contains_name(&self.scale_properties, name)
    }

    pub fn is_nullable_property(&self, name: &str) -> bool {
        contains_name(&self.nullable_properties, name)
    }

    pub fn is_key_property(&self, name: &str) -> bool {
        contains_name(&self.key_properties, name)
    }

    pub fn is_derivation_property(&self, name: &str) -> bool {
        contains_name(&self.derivation_properties, name)
    }

    pub fn is_sql_property(&self, name: &str) -> bool {
        contains_name(&self.sql_properties, name)
    }

    pub fn is_connection_property(&self, name: &str) -> bool {
        contains_name(&self.connection_properties, name)
    }

    pub fn is_usage_property(&self, name: &str) -> bool {
        contains_name(&self.usage_properties, name)
    }

    pub fn is_stage_type_property(&self, name: &str) -> bool {
        contains_name(&self.stage_type_properties, name)
    }
}

/// Error classifier settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// SQLSTATE class prefix (two characters) to severity override
    #[serde(default)]
    pub overrides: HashMap<String, EventSeverity>,
}

impl ClassifierConfig {
    /// Get the override for a SQLSTATE class, if any
    pub fn override_for(&self, class: &str) -> Option<EventSeverity> {
        self.overrides
            .iter()
            .find(|(prefix, _)| prefix.eq_ignore_ascii_case(class))
            .map(|(_, severity)| *severity)
    }

    /// Set severity override for a class
    pub fn set_override(&mut self, class: impl Into<String>, severity: EventSeverity) {
        self.overrides.insert(class.into(), severity);
    }
}

fn default_true() -> bool {
    true
}

fn default_backup_suffix() -> String {
    "backup".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// DDL dialect
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Reference-carrying property names
    #[serde(default)]
    pub vocabulary: Vocabulary,

    /// Wildcard-schema matching policy for the dependency index
    #[serde(default)]
    pub schema_match: SchemaMatchPolicy,

    /// Also rewrite table/column names embedded in SQL text properties
    #[serde(default = "default_true")]
    pub rewrite_sql: bool,

    /// Extension appended to a rewritten file's backup (`job.dsx.backup`)
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,

    /// Error classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: DialectConfig::default(),
            vocabulary: Vocabulary::default(),
            schema_match: SchemaMatchPolicy::default(),
            rewrite_sql: true,
            backup_suffix: default_backup_suffix(),
            classifier: ClassifierConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, DialectConfig::Mssql);
        assert_eq!(config.schema_match, SchemaMatchPolicy::Recall);
        assert!(config.rewrite_sql);
    }

    #[test]
    fn vocabulary_is_case_insensitive() {
        let vocab = Vocabulary::default();
        assert!(vocab.is_table_property("TABLENAME"));
        assert!(vocab.is_table_property("table"));
        assert!(vocab.is_schema_property("schemaname"));
        assert!(vocab.is_sql_property("selectstatement"));
        assert!(!vocab.is_table_property("Name"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            dialect = "vertica"
            schema_match = "precision"

            [vocabulary]
            table_properties = ["TableName", "TgtTable"]

            [classifier.overrides]
            "01" = "info"
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect, DialectConfig::Vertica);
        assert_eq!(config.schema_match, SchemaMatchPolicy::Precision);
        assert!(config.vocabulary.is_table_property("tgttable"));
        // Unspecified vocabulary lists keep their defaults
        assert!(config.vocabulary.is_schema_property("SchemaName"));
        assert_eq!(config.classifier.override_for("01"), Some(EventSeverity::Info));
        assert_eq!(config.backup_suffix, "backup");
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.dialect, parsed.dialect);
        assert_eq!(config.vocabulary, parsed.vocabulary);
    }
}
