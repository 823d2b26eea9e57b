//! Production risk validation
//!
//! Classifies every generated statement as safe, warning or blocking via
//! ordered pattern sets, then enriches warning-level findings with live
//! table-size estimates. A `Blocked` result is data for the caller to
//! interpret, never an error.

use crate::client::{query_scalar_i64, SqlClient};
use crate::error::DeployResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const ROWCOUNT_TIMEOUT: Duration = Duration::from_secs(300);

/// Base per-statement execution estimate
const BASE_SECONDS_PER_STATEMENT: f64 = 10.0;

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Overall validation verdict, a strict function of issue severities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallResult {
    Safe,
    Warnings,
    Blocked,
}

/// One validation finding against one statement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub statement: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
}

/// Aggregate validation report for a statement batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub total_statements: usize,
    pub safe_statements: usize,
    pub warning_statements: usize,
    pub error_statements: usize,
    pub estimated_duration_seconds: f64,
    pub estimated_space_impact_mb: u64,
    pub overall_result: OverallResult,
}

struct PatternRule {
    pattern: Regex,
    category: &'static str,
    description: &'static str,
    recommendation: &'static str,
}

fn rule(
    pattern: &str,
    category: &'static str,
    description: &'static str,
    recommendation: &'static str,
) -> PatternRule {
    PatternRule {
        pattern: Regex::new(pattern).expect("valid regex"),
        category,
        description,
        recommendation,
    }
}

/// Data-loss operations; any match blocks production deployment
static BLOCKING_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule(
            r"\bDROP\s+TABLE\b",
            "Data Loss",
            "Statement drops a table; all rows are permanently lost",
            "Back up the table and archive required data before dropping",
        ),
        rule(
            r"\bDROP\s+COLUMN\b",
            "Data Loss",
            "Statement drops a column; its data is permanently lost",
            "Back up the column data before dropping",
        ),
        rule(
            r"\bDROP\s+DATABASE\b",
            "Data Loss",
            "Statement drops an entire database",
            "Database drops are never part of a routine deployment",
        ),
        rule(
            r"\bTRUNCATE\s+TABLE\b",
            "Data Loss",
            "Statement truncates a table; all rows are removed without logging",
            "Use a scoped DELETE with a WHERE clause instead",
        ),
        rule(
            r"\bDELETE\s+FROM\s+[\w\[\]\.]+\s*;?\s*$",
            "Data Loss",
            "Unscoped DELETE removes every row in the table",
            "Add a WHERE clause or use explicit reference-data replacement",
        ),
    ]
});

/// Operations that are safe-but-costly; each carries its own recommendation
static WARNING_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule(
            r"\bALTER\s+COLUMN\b",
            "Column Alteration",
            "Column alteration can rewrite the table and hold a schema lock",
            "Run during a maintenance window; verify existing data fits the new definition",
        ),
        rule(
            r"\bCREATE\s+(UNIQUE\s+)?(CLUSTERED\s+|NONCLUSTERED\s+)?INDEX\b",
            "Index Creation",
            "Index creation scans the table and consumes additional space",
            "Build large indexes off-peak; monitor transaction log growth",
        ),
        rule(
            r"\bADD\s+CONSTRAINT\b",
            "Constraint Addition",
            "Constraint addition validates existing rows and can fail mid-deployment",
            "Verify existing data satisfies the constraint before deploying",
        ),
    ]
});

static NORMALIZE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// ALTER TABLE ... ADD <column> ... NOT NULL; whether a DEFAULT is present is
/// checked separately since the regex engine has no lookahead
static ADD_NOT_NULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bALTER\s+TABLE\s+[\w\[\]\.]+\s+ADD\s+\[?(\w+)\]?[^;]*\bNOT\s+NULL")
        .expect("valid regex")
});

/// Best-effort table-name extraction patterns, tried in order
static TABLE_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:ALTER|CREATE|DROP|TRUNCATE)\s+TABLE\s+([\w\[\]\.]+)").expect("valid regex"),
        Regex::new(r"\bON\s+([\w\[\]\.]+)\s*\(").expect("valid regex"),
        Regex::new(r"\bDELETE\s+FROM\s+([\w\[\]\.]+)").expect("valid regex"),
    ]
});

static COLUMN_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:ALTER|DROP)\s+COLUMN\s+\[?(\w+)\]?").expect("valid regex")
});

/// Classifies statements and enriches findings with live size estimates
pub struct ProductionValidator;

impl ProductionValidator {
    /// Validate a statement batch against the live database
    pub async fn validate(
        statements: &[String],
        client: &dyn SqlClient,
    ) -> DeployResult<ValidationReport> {
        let mut issues = Vec::new();
        let mut safe = 0usize;
        let mut warning = 0usize;
        let mut error = 0usize;
        let mut duration = statements.len() as f64 * BASE_SECONDS_PER_STATEMENT;
        let mut space_mb = 0u64;

        for statement in statements {
            let found = Self::classify(statement);
            let has_error = found.iter().any(|i| i.severity == Severity::Error);
            let has_warning = found.iter().any(|i| i.severity == Severity::Warning);
            if has_error {
                error += 1;
            } else if has_warning {
                warning += 1;
            } else {
                safe += 1;
            }

            for mut issue in found {
                if issue.severity == Severity::Warning {
                    if let Some(table) = issue.table_name.clone() {
                        match Self::table_row_count(client, &table).await {
                            Some(rows) => {
                                if rows > 1_000_000 {
                                    duration += 300.0;
                                } else if rows > 100_000 {
                                    duration += 60.0;
                                }
                                issue
                                    .description
                                    .push_str(&format!(" (table has ~{rows} rows)"));
                                if issue.category == "Index Creation" {
                                    space_mb += ((rows / 50_000).max(1)) as u64;
                                }
                            }
                            None => {
                                // Enrichment is best-effort; unresolvable
                                // tables simply go unenriched
                                debug!(table = %table, "row count unavailable; enrichment skipped");
                            }
                        }
                    }
                }
                issues.push(issue);
            }
        }

        let overall_result = if error > 0 {
            OverallResult::Blocked
        } else if warning > 0 {
            OverallResult::Warnings
        } else {
            OverallResult::Safe
        };

        if overall_result == OverallResult::Blocked {
            warn!(errors = error, "production validation blocked the batch");
        }

        Ok(ValidationReport {
            issues,
            total_statements: statements.len(),
            safe_statements: safe,
            warning_statements: warning,
            error_statements: error,
            estimated_duration_seconds: duration,
            estimated_space_impact_mb: space_mb,
            overall_result,
        })
    }

    /// Classify one statement. At most one issue per severity tier; a
    /// statement matching nothing gets exactly one informational issue.
    pub fn classify(statement: &str) -> Vec<ValidationIssue> {
        let normalized = NORMALIZE_WS
            .replace_all(statement, " ")
            .trim()
            .to_uppercase();
        let table_name = Self::extract_table_name(&normalized);
        let column_name = COLUMN_NAME_PATTERN
            .captures(&normalized)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let mut issues = Vec::new();

        if let Some(rule) = BLOCKING_RULES.iter().find(|r| r.pattern.is_match(&normalized)) {
            issues.push(Self::issue(
                Severity::Error,
                rule,
                statement,
                &table_name,
                &column_name,
            ));
        }
        if let Some(rule) = WARNING_RULES.iter().find(|r| r.pattern.is_match(&normalized)) {
            issues.push(Self::issue(
                Severity::Warning,
                rule,
                statement,
                &table_name,
                &column_name,
            ));
        } else if let Some(column) = Self::not_null_add_without_default(&normalized) {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                category: "Column Addition".to_string(),
                description: "Adding a NOT NULL column without a default fails on tables with existing rows".to_string(),
                statement: statement.to_string(),
                recommendation: "Provide a DEFAULT, or add the column as nullable and backfill"
                    .to_string(),
                table_name: table_name.clone(),
                column_name: Some(column),
            });
        }
        if issues.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Info,
                category: "Safe".to_string(),
                description: "No risky pattern matched".to_string(),
                statement: statement.to_string(),
                recommendation: String::new(),
                table_name,
                column_name,
            });
        }
        issues
    }

    fn issue(
        severity: Severity,
        rule: &PatternRule,
        statement: &str,
        table_name: &Option<String>,
        column_name: &Option<String>,
    ) -> ValidationIssue {
        ValidationIssue {
            severity,
            category: rule.category.to_string(),
            description: rule.description.to_string(),
            statement: statement.to_string(),
            recommendation: rule.recommendation.to_string(),
            table_name: table_name.clone(),
            column_name: column_name.clone(),
        }
    }

    /// NOT NULL column addition with no inline default; `ADD CONSTRAINT` and
    /// defaulted additions are excluded
    fn not_null_add_without_default(normalized: &str) -> Option<String> {
        let captures = ADD_NOT_NULL.captures(normalized)?;
        let column = captures.get(1)?.as_str();
        if column == "CONSTRAINT" || normalized.contains("DEFAULT") {
            return None;
        }
        Some(column.to_string())
    }

    /// Best-effort extraction; empty result means enrichment is skipped
    fn extract_table_name(normalized: &str) -> Option<String> {
        TABLE_NAME_PATTERNS
            .iter()
            .find_map(|p| p.captures(normalized))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace(['[', ']'], ""))
    }

    /// Live row-count estimate; failures degrade to None, never abort
    async fn table_row_count(client: &dyn SqlClient, table: &str) -> Option<i64> {
        let (schema, name) = match table.split_once('.') {
            Some((s, t)) => (s.to_string(), t.to_string()),
            None => ("dbo".to_string(), table.to_string()),
        };
        let sql = format!(
            "SELECT SUM(p.rows) FROM sys.partitions p \
             JOIN sys.tables t ON p.object_id = t.object_id \
             JOIN sys.schemas s ON t.schema_id = s.schema_id \
             WHERE s.name = N'{schema}' AND t.name = N'{name}' AND p.index_id IN (0, 1)"
        );
        match query_scalar_i64(client, &sql, ROWCOUNT_TIMEOUT).await {
            Ok(count) => count,
            Err(e) => {
                debug!(table = %table, error = %e, "row count query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fakes::{row, FakeSqlClient};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_drop_table_blocks_batch() {
        let client = FakeSqlClient::new();
        let statements = vec![
            "CREATE TABLE [Core].[User] ([Id] INT NOT NULL);".to_string(),
            "DROP TABLE [Core].[Legacy];".to_string(),
        ];
        let report = ProductionValidator::validate(&statements, &client)
            .await
            .unwrap();
        assert_eq!(report.overall_result, OverallResult::Blocked);
        assert_eq!(report.error_statements, 1);
        assert_eq!(report.safe_statements, 1);
        let blocking = report
            .issues
            .iter()
            .find(|i| i.severity == Severity::Error)
            .unwrap();
        assert_eq!(blocking.table_name.as_deref(), Some("CORE.LEGACY"));
    }

    #[tokio::test]
    async fn test_drop_column_blocks_regardless_of_other_statements() {
        let client = FakeSqlClient::new();
        let statements = vec![
            "ALTER TABLE [Core].[User] DROP COLUMN [LegacyFlag];".to_string(),
            "CREATE SCHEMA [Audit];".to_string(),
        ];
        let report = ProductionValidator::validate(&statements, &client)
            .await
            .unwrap();
        assert_eq!(report.overall_result, OverallResult::Blocked);
        let issue = &report.issues[0];
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.column_name.as_deref(), Some("LEGACYFLAG"));
    }

    #[tokio::test]
    async fn test_safe_only_batch_is_safe() {
        let client = FakeSqlClient::new();
        let statements = vec![
            "CREATE SCHEMA [Core];".to_string(),
            "CREATE TABLE [Core].[User] ([Id] INT NOT NULL);".to_string(),
        ];
        let report = ProductionValidator::validate(&statements, &client)
            .await
            .unwrap();
        assert_eq!(report.overall_result, OverallResult::Safe);
        assert_eq!(report.safe_statements, 2);
        // Unmatched statements still get exactly one informational issue each
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.severity == Severity::Info));
    }

    #[tokio::test]
    async fn test_warning_enrichment_escalates_duration_and_space() {
        let client = FakeSqlClient::new().with_query(
            "sys.partitions",
            vec![row(&[("rows", Some("2000000"))])],
        );
        let statements =
            vec!["CREATE NONCLUSTERED INDEX [IX_User_Email] ON [Core].[User] ([Email]);".to_string()];
        let report = ProductionValidator::validate(&statements, &client)
            .await
            .unwrap();
        assert_eq!(report.overall_result, OverallResult::Warnings);
        // base 10s + 5 min escalation
        assert_eq!(report.estimated_duration_seconds, 10.0 + 300.0);
        assert_eq!(report.estimated_space_impact_mb, 40);
        assert!(report.issues[0].description.contains("~2000000 rows"));
    }

    #[tokio::test]
    async fn test_enrichment_skipped_when_table_unresolvable() {
        let client = FakeSqlClient::new();
        let statements = vec!["ALTER TABLE [Core].[User] ALTER COLUMN [Email] NVARCHAR(500) NULL;"
            .to_string()];
        let report = ProductionValidator::validate(&statements, &client)
            .await
            .unwrap();
        // Row count query returns no rows -> enrichment silently skipped
        assert_eq!(report.overall_result, OverallResult::Warnings);
        assert_eq!(report.estimated_duration_seconds, 10.0);
    }

    #[test]
    fn test_at_most_one_issue_per_severity() {
        // Both DROP TABLE (blocking) and ADD CONSTRAINT (warning) present
        let issues = ProductionValidator::classify(
            "ALTER TABLE [A].[B] ADD CONSTRAINT [X] FOREIGN KEY ([C]) REFERENCES [A].[D] ([Id]); DROP TABLE [A].[Old];",
        );
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
    }

    #[test]
    fn test_not_null_add_without_default_warns() {
        let issues = ProductionValidator::classify(
            "ALTER TABLE [Core].[User] ADD [Status] INT NOT NULL;",
        );
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].category, "Column Addition");
        assert_eq!(issues[0].column_name.as_deref(), Some("STATUS"));

        // A defaulted addition is safe
        let defaulted = ProductionValidator::classify(
            "ALTER TABLE [Core].[User] ADD [Status] INT NOT NULL CONSTRAINT [DF_User_Status] DEFAULT 0;",
        );
        assert!(defaulted.iter().all(|i| i.severity == Severity::Info));
        // So is ADD CONSTRAINT-free nullable addition
        let nullable =
            ProductionValidator::classify("ALTER TABLE [Core].[User] ADD [Note] NVARCHAR(100) NULL;");
        assert!(nullable.iter().all(|i| i.severity == Severity::Info));
    }

    #[test]
    fn test_truncate_and_unscoped_delete_block() {
        assert_eq!(
            ProductionValidator::classify("TRUNCATE TABLE [Core].[User];")[0].severity,
            Severity::Error
        );
        assert_eq!(
            ProductionValidator::classify("DELETE FROM [Core].[User];")[0].severity,
            Severity::Error
        );
        // Scoped delete is not blocking
        let scoped = ProductionValidator::classify("DELETE FROM [Core].[User] WHERE Id = 4;");
        assert!(scoped.iter().all(|i| i.severity != Severity::Error));
    }
}
