//! Delta DDL generation
//!
//! Renders entity metadata into T-SQL and computes the minimal statement set
//! bringing the live schema into conformance. Index and foreign key checks
//! are purely presence-based on name: a renamed-but-otherwise-identical
//! object is treated as add-new, never as a rename.

use crate::analyzer::{DatabaseSchemaAnalyzer, LiveSchema};
use crate::metadata::{EntityMetadata, IndexType, PropertyMetadata, SqlConstraint};
use std::collections::BTreeSet;

/// Entity-to-DDL renderer plus the per-phase delta algorithm
pub struct SchemaGenerator;

impl SchemaGenerator {
    // =========================================================================
    // RENDERING
    // =========================================================================

    pub fn create_schema_sql(schema: &str) -> String {
        format!("CREATE SCHEMA [{schema}];")
    }

    /// Full CREATE TABLE with column definitions, identity and defaults.
    /// Primary keys, indexes and foreign keys are deferred to their phases.
    pub fn create_table_sql(entity: &EntityMetadata) -> String {
        let columns: Vec<String> = entity
            .properties
            .iter()
            .filter(|p| !p.is_ignored)
            .map(|p| {
                let mut def = format!("    [{}] {}", p.column_name, p.normalized_type());
                if p.constraints.contains(&SqlConstraint::Identity) {
                    def.push_str(" IDENTITY(1,1)");
                }
                if p.is_nullable {
                    def.push_str(" NULL");
                } else {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = &p.default_type {
                    def.push_str(&format!(
                        " CONSTRAINT [DF_{}_{}] DEFAULT {}",
                        entity.table_name,
                        p.column_name,
                        default.to_sql()
                    ));
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE [{}].[{}] (\n{}\n);",
            entity.schema,
            entity.table_name,
            columns.join(",\n")
        )
    }

    /// Missing column on an existing table
    pub fn add_column_sql(entity: &EntityMetadata, prop: &PropertyMetadata) -> String {
        let mut sql = format!(
            "ALTER TABLE [{}].[{}] ADD [{}] {}",
            entity.schema,
            entity.table_name,
            prop.column_name,
            prop.normalized_type()
        );
        if prop.is_nullable {
            sql.push_str(" NULL");
        } else {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &prop.default_type {
            sql.push_str(&format!(
                " CONSTRAINT [DF_{}_{}] DEFAULT {}",
                entity.table_name,
                prop.column_name,
                default.to_sql()
            ));
        }
        sql.push(';');
        sql
    }

    pub fn primary_key_name(entity: &EntityMetadata) -> String {
        format!("PK_{}", entity.table_name)
    }

    /// Clustered primary key constraint, if the entity declares one
    pub fn primary_key_sql(entity: &EntityMetadata) -> Option<String> {
        let pk_columns: Vec<String> = entity
            .properties
            .iter()
            .filter(|p| !p.is_ignored && p.is_primary_key())
            .map(|p| format!("[{}]", p.column_name))
            .collect();
        if pk_columns.is_empty() {
            return None;
        }
        Some(format!(
            "ALTER TABLE [{}].[{}] ADD CONSTRAINT [{}] PRIMARY KEY CLUSTERED ({});",
            entity.schema,
            entity.table_name,
            Self::primary_key_name(entity),
            pk_columns.join(", ")
        ))
    }

    pub fn unique_index_name(entity: &EntityMetadata, prop: &PropertyMetadata) -> String {
        format!("UX_{}_{}", entity.table_name, prop.column_name)
    }

    /// Unique indexes for properties carrying a Unique constraint (primary
    /// key columns excluded; the PK already enforces uniqueness)
    pub fn unique_index_sqls(entity: &EntityMetadata) -> Vec<(String, String)> {
        entity
            .properties
            .iter()
            .filter(|p| !p.is_ignored && p.is_unique() && !p.is_primary_key())
            .map(|p| {
                let name = Self::unique_index_name(entity, p);
                let sql = format!(
                    "CREATE UNIQUE NONCLUSTERED INDEX [{name}] ON [{}].[{}] ([{}]);",
                    entity.schema, entity.table_name, p.column_name
                );
                (name, sql)
            })
            .collect()
    }

    pub fn foreign_key_name(entity: &EntityMetadata, prop: &PropertyMetadata) -> String {
        prop.foreign_key
            .as_ref()
            .and_then(|fk| fk.name.clone())
            .unwrap_or_else(|| format!("FK_{}_{}", entity.table_name, prop.column_name))
    }

    /// Foreign key constraints declared on the entity, as (name, sql) pairs
    pub fn foreign_key_sqls(
        entity: &EntityMetadata,
        resolve_table: impl Fn(&str) -> Option<(String, String)>,
    ) -> Vec<(String, String)> {
        entity
            .properties
            .iter()
            .filter(|p| !p.is_ignored)
            .filter_map(|p| {
                let fk = p.foreign_key.as_ref()?;
                let (ref_schema, ref_table) = resolve_table(&fk.referenced_entity)?;
                let name = Self::foreign_key_name(entity, p);
                let sql = format!(
                    "ALTER TABLE [{}].[{}] ADD CONSTRAINT [{name}] FOREIGN KEY ([{}]) \
                     REFERENCES [{ref_schema}].[{ref_table}] ([{}]) ON DELETE {} ON UPDATE {};",
                    entity.schema,
                    entity.table_name,
                    p.column_name,
                    fk.referenced_column,
                    fk.on_delete.to_sql(),
                    fk.on_update.to_sql()
                );
                Some((name, sql))
            })
            .collect()
    }

    pub fn single_index_name(entity: &EntityMetadata, prop: &PropertyMetadata) -> String {
        prop.index
            .as_ref()
            .and_then(|i| i.name.clone())
            .unwrap_or_else(|| format!("IX_{}_{}", entity.table_name, prop.column_name))
    }

    /// Non-clustered single-column indexes, as (name, sql) pairs
    pub fn nonclustered_index_sqls(entity: &EntityMetadata) -> Vec<(String, String)> {
        entity
            .properties
            .iter()
            .filter(|p| !p.is_ignored)
            .filter_map(|p| {
                let spec = p.index.as_ref()?;
                if spec.index_type != IndexType::NonClustered || spec.group.is_some() {
                    return None;
                }
                let name = Self::single_index_name(entity, p);
                let sql = format!(
                    "CREATE NONCLUSTERED INDEX [{name}] ON [{}].[{}] ([{}]);",
                    entity.schema, entity.table_name, p.column_name
                );
                Some((name, sql))
            })
            .collect()
    }

    /// Composite indexes, columns in declared order, as (name, sql) pairs
    pub fn composite_index_sqls(entity: &EntityMetadata) -> Vec<(String, String)> {
        entity
            .composite_indexes
            .iter()
            .map(|idx| {
                let cols: Vec<String> = idx
                    .ordered_columns()
                    .iter()
                    .map(|c| format!("[{c}]"))
                    .collect();
                let unique = if idx.is_unique() { "UNIQUE " } else { "" };
                let sql = format!(
                    "CREATE {unique}NONCLUSTERED INDEX [{}] ON [{}].[{}] ({});",
                    idx.name,
                    entity.schema,
                    entity.table_name,
                    cols.join(", ")
                );
                (idx.name.clone(), sql)
            })
            .collect()
    }

    // =========================================================================
    // DELTA ALGORITHM
    // =========================================================================

    /// Generate the delta statements for one phase. `entities` must already
    /// be in topological order; table creation within phase 1 follows it.
    pub fn generate_phase_statements(
        phase: u8,
        entities: &[&EntityMetadata],
        live: &LiveSchema,
    ) -> Vec<String> {
        match phase {
            1 => Self::phase_tables(entities, live),
            2 => Self::phase_primary_keys(entities, live),
            3 => Self::phase_unique_indexes(entities, live),
            5 => Self::phase_foreign_keys(entities, live),
            6 => Self::phase_nonclustered_indexes(entities, live),
            7 => Self::phase_composite_indexes(entities, live),
            _ => Vec::new(),
        }
    }

    fn phase_tables(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        let mut statements = Vec::new();

        // Schemas first, each emitted once
        let mut created: BTreeSet<&str> = BTreeSet::new();
        for entity in entities {
            if !live.has_schema(&entity.schema) && created.insert(entity.schema.as_str()) {
                statements.push(Self::create_schema_sql(&entity.schema));
            }
        }

        for entity in entities {
            let key = entity.full_name();
            if !live.has_table(&key) {
                // New table: full CREATE, no partial diffing
                statements.push(Self::create_table_sql(entity));
                continue;
            }

            let live_columns = live.columns.get(&key).cloned().unwrap_or_default();
            for prop in entity.properties.iter().filter(|p| !p.is_ignored) {
                match live_columns
                    .iter()
                    .find(|c| c.column_name == prop.column_name)
                {
                    None => statements.push(Self::add_column_sql(entity, prop)),
                    Some(live_col) => {
                        let default_name =
                            live.default_constraint_name(&key, &prop.column_name);
                        statements.extend(DatabaseSchemaAnalyzer::compare_column(
                            live_col,
                            prop,
                            default_name,
                        ));
                    }
                }
            }
        }
        statements
    }

    fn phase_primary_keys(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        entities
            .iter()
            .filter_map(|entity| {
                let key = entity.full_name();
                let name = Self::primary_key_name(entity);
                if live.constraint_names(&key).contains(name.as_str()) {
                    return None;
                }
                Self::primary_key_sql(entity)
            })
            .collect()
    }

    fn phase_unique_indexes(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        Self::missing_by_name(entities, live, Self::unique_index_sqls)
    }

    fn phase_foreign_keys(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        // FK targets resolve within the same batch; unresolved references
        // were already dropped (with a warning) at graph build
        let resolve = |name: &str,
                       batch: &[&EntityMetadata]|
         -> Option<(String, String)> {
            batch
                .iter()
                .find(|e| e.full_name() == name || e.name == name)
                .map(|e| (e.schema.clone(), e.table_name.clone()))
        };

        let mut statements = Vec::new();
        for entity in entities {
            let key = entity.full_name();
            let existing = live.constraint_names(&key);
            for (name, sql) in
                Self::foreign_key_sqls(entity, |target| resolve(target, entities))
            {
                if !existing.contains(name.as_str()) {
                    statements.push(sql);
                }
            }
        }
        statements
    }

    fn phase_nonclustered_indexes(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        Self::missing_by_name(entities, live, Self::nonclustered_index_sqls)
    }

    fn phase_composite_indexes(entities: &[&EntityMetadata], live: &LiveSchema) -> Vec<String> {
        Self::missing_by_name(entities, live, Self::composite_index_sqls)
    }

    fn missing_by_name(
        entities: &[&EntityMetadata],
        live: &LiveSchema,
        render: impl Fn(&EntityMetadata) -> Vec<(String, String)>,
    ) -> Vec<String> {
        let mut statements = Vec::new();
        for entity in entities {
            let key = entity.full_name();
            let existing = live.index_names(&key);
            for (name, sql) in render(entity) {
                if !existing.contains(name.as_str()) {
                    statements.push(sql);
                }
            }
        }
        statements
    }
}
