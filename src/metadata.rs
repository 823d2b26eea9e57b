//! Entity and live-schema metadata model
//!
//! Normalized in-memory representation of declared entities and of the
//! introspected database, shaped so the two sides can be compared directly.
//! Instances are immutable once produced by the analysis phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One declared entity (maps to one table)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    pub name: String,
    pub table_name: String,
    pub schema: String,
    pub namespace: String,
    /// Tag identifying the source assembly/module the declaration came from
    pub source_assembly_tag: String,
    pub properties: Vec<PropertyMetadata>,
    pub composite_indexes: Vec<IndexMetadata>,
    #[serde(default)]
    pub is_ignored: bool,
}

impl EntityMetadata {
    /// `schema.table` key used throughout the graph and diff layers
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }
}

/// One declared property (maps to one column)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMetadata {
    pub name: String,
    pub column_name: String,
    /// Base SQL type without length/precision suffix, e.g. `NVARCHAR`
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    #[serde(default)]
    pub constraints: Vec<SqlConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_type: Option<DefaultType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyMetadata>,
    #[serde(default)]
    pub is_ignored: bool,
}

impl PropertyMetadata {
    /// Normalized type string: base type plus length/precision suffix,
    /// e.g. `NVARCHAR(200)` or `DECIMAL(18,2)`. Used for structural compare.
    pub fn normalized_type(&self) -> String {
        let base = self.data_type.to_uppercase();
        if let Some(len) = self.length {
            if len < 0 {
                format!("{base}(MAX)")
            } else {
                format!("{base}({len})")
            }
        } else if let (Some(p), Some(s)) = (self.precision, self.scale) {
            format!("{base}({p},{s})")
        } else {
            base
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&SqlConstraint::PrimaryKey)
    }

    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&SqlConstraint::Unique)
    }
}

/// Column-level constraint kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlConstraint {
    PrimaryKey,
    Unique,
    NotNull,
    Identity,
}

/// Declared default value kinds, rendered to SQL expressions by the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultType {
    NewGuid,
    UtcNow,
    Zero,
    EmptyString,
    Literal(String),
}

impl DefaultType {
    /// SQL expression for this default
    pub fn to_sql(&self) -> String {
        match self {
            DefaultType::NewGuid => "NEWID()".to_string(),
            DefaultType::UtcNow => "GETUTCDATE()".to_string(),
            DefaultType::Zero => "0".to_string(),
            DefaultType::EmptyString => "''".to_string(),
            DefaultType::Literal(v) => v.clone(),
        }
    }
}

/// Single-column index declaration attached to a property
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub index_type: IndexType,
    /// Group identifier when several properties share one index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Clustered,
    NonClustered,
    Unique,
}

/// Foreign key declaration. The reference must resolve to an entity in the
/// same analysis batch or the dependency edge is dropped with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyMetadata {
    pub referenced_entity: String,
    pub referenced_column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Composite index definition; columns ordered by their explicit `order`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub name: String,
    pub index_type: IndexType,
    pub columns: Vec<IndexColumnMetadata>,
}

impl IndexMetadata {
    pub fn is_unique(&self) -> bool {
        self.index_type == IndexType::Unique
    }

    /// Column names in declared order
    pub fn ordered_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&IndexColumnMetadata> = self.columns.iter().collect();
        cols.sort_by_key(|c| c.order);
        cols.iter().map(|c| c.column_name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexColumnMetadata {
    pub column_name: String,
    pub order: i32,
}

// =============================================================================
// LIVE SCHEMA SHAPES — read-only snapshot per run, never mutated
// =============================================================================

/// Introspected column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseColumnMetadata {
    pub schema: String,
    pub table: String,
    pub column_name: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    pub is_nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl DatabaseColumnMetadata {
    /// Normalized type string, parallel to [`PropertyMetadata::normalized_type`]
    pub fn normalized_type(&self) -> String {
        let base = self.data_type.to_uppercase();
        match base.as_str() {
            "NVARCHAR" | "VARCHAR" | "NCHAR" | "CHAR" | "VARBINARY" | "BINARY" => {
                match self.max_length {
                    Some(len) if len < 0 => format!("{base}(MAX)"),
                    Some(len) => format!("{base}({len})"),
                    None => base,
                }
            }
            "DECIMAL" | "NUMERIC" => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("{base}({p},{s})"),
                _ => base,
            },
            _ => base,
        }
    }
}

/// Introspected constraint (primary key, unique, default, foreign key)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConstraintMetadata {
    pub name: String,
    pub constraint_type: String,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

/// Introspected index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseIndexMetadata {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// Script file discovered under a phase directory.
///
/// Lifecycle: discovered -> enhanced (original content retained) -> either
/// executed and deleted on production success, or left untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlScriptFile {
    pub file_name: String,
    pub file_path: String,
    pub phase: u8,
    pub order: u32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_content: Option<String>,
    /// Truncated content digest used for provenance, not security
    pub hash: String,
    pub last_modified: DateTime<Utc>,
    pub is_new: bool,
    pub is_modified: bool,
    pub requires_warning: bool,
}

impl SqlScriptFile {
    /// Enhanced content when present, raw content otherwise
    pub fn effective_content(&self) -> &str {
        self.enhanced_content.as_deref().unwrap_or(&self.content)
    }
}

/// Script deleted from its phase directory after a successful production run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedScript {
    pub file_name: String,
    pub original_path: String,
    pub phase: u8,
    pub hash: String,
    pub consumed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(data_type: &str, length: Option<i32>) -> PropertyMetadata {
        PropertyMetadata {
            name: "Name".to_string(),
            column_name: "Name".to_string(),
            data_type: data_type.to_string(),
            is_nullable: true,
            length,
            precision: None,
            scale: None,
            constraints: vec![],
            default_type: None,
            index: None,
            foreign_key: None,
            is_ignored: false,
        }
    }

    #[test]
    fn test_normalized_type_with_length() {
        assert_eq!(prop("nvarchar", Some(200)).normalized_type(), "NVARCHAR(200)");
        assert_eq!(prop("nvarchar", Some(-1)).normalized_type(), "NVARCHAR(MAX)");
        assert_eq!(prop("int", None).normalized_type(), "INT");
    }

    #[test]
    fn test_normalized_type_decimal() {
        let mut p = prop("decimal", None);
        p.precision = Some(18);
        p.scale = Some(2);
        assert_eq!(p.normalized_type(), "DECIMAL(18,2)");
    }

    #[test]
    fn test_live_normalized_type_skips_length_for_int() {
        let col = DatabaseColumnMetadata {
            schema: "dbo".to_string(),
            table: "T".to_string(),
            column_name: "Id".to_string(),
            data_type: "int".to_string(),
            max_length: Some(4),
            precision: None,
            scale: None,
            is_nullable: false,
            default_value: None,
        };
        assert_eq!(col.normalized_type(), "INT");
    }

    #[test]
    fn test_index_ordered_columns() {
        let idx = IndexMetadata {
            name: "IX_T_A_B".to_string(),
            index_type: IndexType::Unique,
            columns: vec![
                IndexColumnMetadata {
                    column_name: "B".to_string(),
                    order: 2,
                },
                IndexColumnMetadata {
                    column_name: "A".to_string(),
                    order: 1,
                },
            ],
        };
        assert_eq!(idx.ordered_columns(), vec!["A", "B"]);
        assert!(idx.is_unique());
    }
}
