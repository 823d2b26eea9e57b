//! SQL statement execution, backup and restore
//!
//! Sequential batch execution with a critical/non-critical error split, plus
//! the database-copy backup flow and the single-user rename dance used to
//! restore from a backup copy.

use crate::client::{query_scalar_i64, SqlClient};
use crate::error::{ExecutorError, SqlClientError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-statement DDL timeout
pub const DDL_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for administrative operations (rename, drop, single-user)
pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(600);
/// Timeout for issuing the database copy itself
pub const COPY_TIMEOUT: Duration = Duration::from_secs(3600);

const COPY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const COPY_POLL_CEILING_MINUTES: u64 = 60;

/// Provider error codes that abort a batch immediately: the connection or
/// target database itself is unusable, so continuing is pointless
const CRITICAL_CODES: [i32; 4] = [4060, 18456, 18461, 911];

/// Provider codes for "database copy limit reached"
const COPY_LIMIT_CODES: [i32; 2] = [45168, 45181];
/// Provider codes for "a copy of this database is already in progress"
const COPY_IN_PROGRESS_CODES: [i32; 1] = [40852];

/// Outcome of one statement within a batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResult {
    pub statement: String,
    pub success: bool,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a full batch run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExecutionResult {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<StatementResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Executes compiled statements and manages backup copies
pub struct SqlExecutor<'a> {
    client: &'a dyn SqlClient,
}

impl<'a> SqlExecutor<'a> {
    pub fn new(client: &'a dyn SqlClient) -> Self {
        Self { client }
    }

    /// Run statements sequentially. Critical provider errors abort the batch;
    /// other failures are logged and the batch continues. A batch where
    /// nothing succeeded is itself a failure.
    pub async fn execute_batch(
        &self,
        statements: &[String],
    ) -> Result<BatchExecutionResult, ExecutorError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(statements.len());
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        info!(batch = %id, statements = statements.len(), "batch execution starting");

        for statement in statements {
            match self.client.execute(statement, DDL_TIMEOUT).await {
                Ok(rows_affected) => {
                    succeeded += 1;
                    results.push(StatementResult {
                        statement: statement.clone(),
                        success: true,
                        rows_affected,
                        error: None,
                    });
                }
                Err(e) => {
                    if e.code.map(|c| CRITICAL_CODES.contains(&c)).unwrap_or(false) {
                        error!(batch = %id, code = ?e.code, "critical error, aborting batch");
                        return Err(ExecutorError::Critical {
                            statement: statement.clone(),
                            source: e,
                        });
                    }
                    warn!(batch = %id, error = %e, "statement failed, continuing");
                    failed += 1;
                    results.push(StatementResult {
                        statement: statement.clone(),
                        success: false,
                        rows_affected: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if succeeded == 0 && !statements.is_empty() {
            return Err(ExecutorError::BatchFailed {
                attempted: statements.len(),
            });
        }

        info!(batch = %id, succeeded, failed, "batch execution complete");
        Ok(BatchExecutionResult {
            id,
            started_at,
            completed_at: Utc::now(),
            results,
            succeeded,
            failed,
        })
    }

    /// Create a timestamped copy of the database and wait for the copy to
    /// come online. Returns the backup database name.
    pub async fn create_backup(&self, database: &str) -> Result<String, ExecutorError> {
        let backup = format!("{database}_backup_{}", Utc::now().format("%Y%m%d%H%M%S"));
        let sql = format!("CREATE DATABASE [{backup}] AS COPY OF [{database}];");
        info!(%database, %backup, "creating backup copy");

        if let Err(e) = self.client.execute(&sql, COPY_TIMEOUT).await {
            return Err(Self::classify_copy_error(e, database, &backup));
        }

        self.wait_for_copy(&backup).await?;
        info!(%backup, "backup copy online");
        Ok(backup)
    }

    /// Provider code first; message match only as a fallback for transports
    /// that drop the code
    fn classify_copy_error(
        e: SqlClientError,
        database: &str,
        backup: &str,
    ) -> ExecutorError {
        if let Some(code) = e.code {
            if COPY_LIMIT_CODES.contains(&code) {
                return ExecutorError::CopyLimitExceeded {
                    backup: backup.to_string(),
                };
            }
            if COPY_IN_PROGRESS_CODES.contains(&code) {
                return ExecutorError::CopyInProgress {
                    database: database.to_string(),
                };
            }
        }
        let message = e.message.to_lowercase();
        if message.contains("copy limit") {
            ExecutorError::CopyLimitExceeded {
                backup: backup.to_string(),
            }
        } else if message.contains("already in progress") || message.contains("copy is in progress")
        {
            ExecutorError::CopyInProgress {
                database: database.to_string(),
            }
        } else {
            ExecutorError::Sql(e)
        }
    }

    /// Poll the catalog until the copy reaches ONLINE, fails, or the ceiling
    /// elapses
    async fn wait_for_copy(&self, backup: &str) -> Result<(), ExecutorError> {
        let max_polls = COPY_POLL_CEILING_MINUTES * 60 / COPY_POLL_INTERVAL.as_secs();
        for _ in 0..max_polls {
            tokio::time::sleep(COPY_POLL_INTERVAL).await;
            let sql = format!(
                "SELECT state_desc FROM sys.databases WHERE name = N'{backup}'"
            );
            let rows = self.client.query(&sql, ADMIN_TIMEOUT).await?;
            let state = rows
                .first()
                .and_then(|r| r.get("state_desc").cloned())
                .flatten();
            match state.as_deref() {
                Some("ONLINE") => return Ok(()),
                Some(s @ ("SUSPECT" | "EMERGENCY")) => {
                    return Err(ExecutorError::CopyFailed {
                        backup: backup.to_string(),
                        reason: format!("copy entered state {s}"),
                    })
                }
                // COPYING, RESTORING or not yet visible in the catalog
                other => debug!(%backup, state = ?other, "copy still in progress"),
            }
        }
        Err(ExecutorError::CopyTimeout {
            backup: backup.to_string(),
            minutes: COPY_POLL_CEILING_MINUTES,
        })
    }

    /// Replace the live database with a backup copy: quarantine the live
    /// database under a timestamped name, promote the backup, then drop the
    /// quarantined original. Each rename runs inside single-user mode.
    pub async fn restore_from_backup(
        &self,
        database: &str,
        backup: &str,
    ) -> Result<(), ExecutorError> {
        if !self.backup_exists(backup).await {
            return Err(ExecutorError::BackupMissing(backup.to_string()));
        }

        let quarantine = format!("{database}_old_{}", Utc::now().format("%Y%m%d%H%M%S"));
        info!(%database, %backup, %quarantine, "restoring from backup");

        self.rename_database(database, &quarantine).await?;
        self.rename_database(backup, database).await?;

        self.client
            .execute(&format!("DROP DATABASE [{quarantine}];"), ADMIN_TIMEOUT)
            .await?;
        info!(%database, "restore complete");
        Ok(())
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<(), ExecutorError> {
        self.client
            .execute(
                &format!("ALTER DATABASE [{from}] SET SINGLE_USER WITH ROLLBACK IMMEDIATE;"),
                ADMIN_TIMEOUT,
            )
            .await?;
        self.client
            .execute(
                &format!("ALTER DATABASE [{from}] MODIFY NAME = [{to}];"),
                ADMIN_TIMEOUT,
            )
            .await?;
        self.client
            .execute(
                &format!("ALTER DATABASE [{to}] SET MULTI_USER;"),
                ADMIN_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// Catalog probe; degrades to `false` on query failure
    pub async fn database_exists(&self, database: &str) -> bool {
        let sql = format!("SELECT COUNT(*) FROM sys.databases WHERE name = N'{database}'");
        matches!(
            query_scalar_i64(self.client, &sql, ADMIN_TIMEOUT).await,
            Ok(Some(n)) if n > 0
        )
    }

    pub async fn backup_exists(&self, backup: &str) -> bool {
        self.database_exists(backup).await
    }

    /// Catalog probe; degrades to `false` on query failure
    pub async fn table_exists(&self, schema: &str, table: &str) -> bool {
        let sql = format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = N'{schema}' AND TABLE_NAME = N'{table}'"
        );
        matches!(
            query_scalar_i64(self.client, &sql, ADMIN_TIMEOUT).await,
            Ok(Some(n)) if n > 0
        )
    }
}
