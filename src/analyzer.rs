//! Live database schema analysis
//!
//! Read-only introspection of the target database into the same normalized
//! shape as the entity model, plus the structural column compare primitive
//! used by delta generation. Comparison is purely type-driven; row data is
//! never inspected.

use crate::client::{SqlClient, SqlRow};
use crate::error::SqlClientError;
use crate::metadata::{
    DatabaseColumnMetadata, DatabaseConstraintMetadata, DatabaseIndexMetadata, PropertyMetadata,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Query timeout for introspection reads
const INTROSPECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Snapshot of the live schema, keyed by `schema.table`. Read-only per run.
#[derive(Debug, Clone, Default)]
pub struct LiveSchema {
    pub schemas: BTreeSet<String>,
    pub columns: BTreeMap<String, Vec<DatabaseColumnMetadata>>,
    pub constraints: BTreeMap<String, Vec<DatabaseConstraintMetadata>>,
    pub indexes: BTreeMap<String, Vec<DatabaseIndexMetadata>>,
}

impl LiveSchema {
    /// An empty snapshot, representing a bare database
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_table(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    /// Index names present for a table
    pub fn index_names(&self, key: &str) -> BTreeSet<&str> {
        self.indexes
            .get(key)
            .map(|v| v.iter().map(|i| i.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Constraint names present for a table
    pub fn constraint_names(&self, key: &str) -> BTreeSet<&str> {
        self.constraints
            .get(key)
            .map(|v| v.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Default-constraint name for a column, if any
    pub fn default_constraint_name(&self, key: &str, column: &str) -> Option<&str> {
        self.constraints.get(key).and_then(|v| {
            v.iter()
                .find(|c| {
                    c.constraint_type.eq_ignore_ascii_case("DEFAULT")
                        && c.column.as_deref() == Some(column)
                })
                .map(|c| c.name.as_str())
        })
    }
}

/// Introspects the live database through the SQL transport seam
pub struct DatabaseSchemaAnalyzer<'a> {
    client: &'a dyn SqlClient,
    allowed_schemas: Vec<String>,
}

impl<'a> DatabaseSchemaAnalyzer<'a> {
    pub fn new(client: &'a dyn SqlClient, allowed_schemas: Vec<String>) -> Self {
        Self {
            client,
            allowed_schemas,
        }
    }

    fn schema_filter(&self) -> String {
        self.allowed_schemas
            .iter()
            .map(|s| format!("'{}'", s.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Load the complete live snapshot
    pub async fn snapshot(&self) -> Result<LiveSchema, SqlClientError> {
        let columns = self.load_columns().await?;
        let constraints = self.load_constraints().await?;
        let indexes = self.load_indexes().await?;
        let schemas = columns
            .keys()
            .filter_map(|k| k.split('.').next())
            .map(|s| s.to_string())
            .collect();

        let snapshot = LiveSchema {
            schemas,
            columns,
            constraints,
            indexes,
        };
        debug!(
            tables = snapshot.columns.len(),
            indexes = snapshot.indexes.values().map(|v| v.len()).sum::<usize>(),
            "live schema snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Load all columns in the allowed schemas
    pub async fn load_columns(
        &self,
    ) -> Result<BTreeMap<String, Vec<DatabaseColumnMetadata>>, SqlClientError> {
        let sql = format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, \
             CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE, \
             IS_NULLABLE, COLUMN_DEFAULT \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA IN ({}) \
             ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
            self.schema_filter()
        );
        let rows = self.client.query(&sql, INTROSPECT_TIMEOUT).await?;

        let mut map: BTreeMap<String, Vec<DatabaseColumnMetadata>> = BTreeMap::new();
        for row in rows {
            let (Some(schema), Some(table), Some(column)) = (
                field(&row, "TABLE_SCHEMA"),
                field(&row, "TABLE_NAME"),
                field(&row, "COLUMN_NAME"),
            ) else {
                warn!("introspection row missing identifier columns; skipped");
                continue;
            };
            let key = format!("{schema}.{table}");
            map.entry(key).or_default().push(DatabaseColumnMetadata {
                schema,
                table,
                column_name: column,
                data_type: field(&row, "DATA_TYPE").unwrap_or_default(),
                max_length: field(&row, "CHARACTER_MAXIMUM_LENGTH").and_then(|v| v.parse().ok()),
                precision: field(&row, "NUMERIC_PRECISION").and_then(|v| v.parse().ok()),
                scale: field(&row, "NUMERIC_SCALE").and_then(|v| v.parse().ok()),
                is_nullable: field(&row, "IS_NULLABLE").as_deref() == Some("YES"),
                default_value: field(&row, "COLUMN_DEFAULT"),
            });
        }
        Ok(map)
    }

    /// Load all constraints (primary key, unique, foreign key, default)
    pub async fn load_constraints(
        &self,
    ) -> Result<BTreeMap<String, Vec<DatabaseConstraintMetadata>>, SqlClientError> {
        let sql = format!(
            "SELECT tc.CONSTRAINT_NAME, tc.CONSTRAINT_TYPE, tc.TABLE_SCHEMA, \
             tc.TABLE_NAME, kcu.COLUMN_NAME \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
               ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
              AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
             WHERE tc.TABLE_SCHEMA IN ({}) \
             UNION ALL \
             SELECT dc.name, 'DEFAULT', s.name, t.name, c.name \
             FROM sys.default_constraints dc \
             JOIN sys.tables t ON dc.parent_object_id = t.object_id \
             JOIN sys.schemas s ON t.schema_id = s.schema_id \
             JOIN sys.columns c ON dc.parent_object_id = c.object_id \
              AND dc.parent_column_id = c.column_id \
             WHERE s.name IN ({})",
            self.schema_filter(),
            self.schema_filter()
        );
        let rows = self.client.query(&sql, INTROSPECT_TIMEOUT).await?;

        let mut map: BTreeMap<String, Vec<DatabaseConstraintMetadata>> = BTreeMap::new();
        for row in rows {
            let (Some(name), Some(schema), Some(table)) = (
                first_field(&row, &["CONSTRAINT_NAME", "name"]),
                first_field(&row, &["TABLE_SCHEMA"]),
                first_field(&row, &["TABLE_NAME"]),
            ) else {
                continue;
            };
            let key = format!("{schema}.{table}");
            map.entry(key).or_default().push(DatabaseConstraintMetadata {
                name,
                constraint_type: field(&row, "CONSTRAINT_TYPE").unwrap_or_default(),
                schema,
                table,
                column: field(&row, "COLUMN_NAME"),
            });
        }
        Ok(map)
    }

    /// Load all indexes
    pub async fn load_indexes(
        &self,
    ) -> Result<BTreeMap<String, Vec<DatabaseIndexMetadata>>, SqlClientError> {
        let sql = format!(
            "SELECT i.name AS INDEX_NAME, s.name AS TABLE_SCHEMA, t.name AS TABLE_NAME, \
             c.name AS COLUMN_NAME, i.is_unique AS IS_UNIQUE, ic.key_ordinal AS KEY_ORDINAL \
             FROM sys.indexes i \
             JOIN sys.tables t ON i.object_id = t.object_id \
             JOIN sys.schemas s ON t.schema_id = s.schema_id \
             JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
             JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
             WHERE s.name IN ({}) AND i.name IS NOT NULL \
             ORDER BY s.name, t.name, i.name, ic.key_ordinal",
            self.schema_filter()
        );
        let rows = self.client.query(&sql, INTROSPECT_TIMEOUT).await?;

        let mut map: BTreeMap<String, Vec<DatabaseIndexMetadata>> = BTreeMap::new();
        for row in rows {
            let (Some(name), Some(schema), Some(table), Some(column)) = (
                field(&row, "INDEX_NAME"),
                field(&row, "TABLE_SCHEMA"),
                field(&row, "TABLE_NAME"),
                field(&row, "COLUMN_NAME"),
            ) else {
                continue;
            };
            let key = format!("{schema}.{table}");
            let is_unique = matches!(
                field(&row, "IS_UNIQUE").as_deref(),
                Some("1") | Some("true") | Some("True")
            );
            let entry = map.entry(key).or_default();
            if let Some(existing) = entry.iter_mut().find(|i| i.name == name) {
                existing.columns.push(column);
            } else {
                entry.push(DatabaseIndexMetadata {
                    name,
                    schema,
                    table,
                    columns: vec![column],
                    is_unique,
                });
            }
        }
        Ok(map)
    }

    /// Compare one live column against its declared property, producing DDL
    /// fragments for each detected mismatch: data type (via normalized type
    /// string), nullability, and default value.
    pub fn compare_column(
        live: &DatabaseColumnMetadata,
        prop: &PropertyMetadata,
        live_default_constraint: Option<&str>,
    ) -> Vec<String> {
        let mut fragments = Vec::new();
        let table = format!("[{}].[{}]", live.schema, live.table);
        let nullability = if prop.is_nullable { "NULL" } else { "NOT NULL" };

        let type_mismatch = live.normalized_type() != prop.normalized_type();
        let null_mismatch = live.is_nullable != prop.is_nullable;

        if type_mismatch || null_mismatch {
            fragments.push(format!(
                "ALTER TABLE {table} ALTER COLUMN [{}] {} {nullability};",
                prop.column_name,
                prop.normalized_type()
            ));
        }

        let live_has_default = live.default_value.is_some();
        let entity_default = prop.default_type.as_ref();
        match (live_has_default, entity_default) {
            (false, Some(default)) => {
                fragments.push(format!(
                    "ALTER TABLE {table} ADD CONSTRAINT [DF_{}_{}] DEFAULT {} FOR [{}];",
                    live.table,
                    prop.column_name,
                    default.to_sql(),
                    prop.column_name
                ));
            }
            (true, None) => {
                if let Some(name) = live_default_constraint {
                    fragments.push(format!("ALTER TABLE {table} DROP CONSTRAINT [{name}];"));
                } else {
                    // Constraint name not resolvable from the snapshot; skip
                    // rather than emit an undroppable statement
                    warn!(
                        column = %prop.column_name,
                        "live default present without resolvable constraint name; drop skipped"
                    );
                }
            }
            _ => {}
        }

        fragments
    }
}

fn field(row: &SqlRow, name: &str) -> Option<String> {
    row.get(name).cloned().flatten()
}

fn first_field(row: &SqlRow, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| field(row, n))
}
