//! Error handling module
//!
//! Provides unified error types for the deployment planner. Validation
//! outcomes (`OverallResult::Blocked`) are data, not errors — only conditions
//! that stop a run from producing a result live here.

use thiserror::Error;

/// Top-level error type for the crate
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("SQL client error: {0}")]
    Sql(#[from] SqlClientError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Graph construction and ordering errors. Always fatal; the offending
/// path or key list is carried so operators can act without digging logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Entity '{entity}' declares duplicate column '{column}'")]
    DuplicateColumn { entity: String, column: String },

    #[error("Dangling dependency keys: {}", keys.join(", "))]
    DanglingDependencies { keys: Vec<String> },

    #[error("Entity '{0}' references itself")]
    SelfReference(String),
}

/// Error surfaced by the external SQL transport. The provider error code is
/// retained because the executor's critical/non-critical split and the
/// backup-copy handling both key off it.
#[derive(Error, Debug, Clone)]
#[error("{message}{}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
pub struct SqlClientError {
    pub code: Option<i32>,
    pub message: String,
}

impl SqlClientError {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Execution and backup/restore errors. Provider-specific copy conditions
/// get their own variants since the caller's retry policy differs by cause.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Critical SQL error while executing '{statement}': {source}")]
    Critical {
        statement: String,
        source: SqlClientError,
    },

    #[error("All {attempted} statements in the batch failed")]
    BatchFailed { attempted: usize },

    #[error("Database copy limit exceeded while creating backup '{backup}'")]
    CopyLimitExceeded { backup: String },

    #[error("A copy of database '{database}' is already in progress")]
    CopyInProgress { database: String },

    #[error("Backup copy '{backup}' did not complete within {minutes} minutes")]
    CopyTimeout { backup: String, minutes: u64 },

    #[error("Backup copy '{backup}' failed: {reason}")]
    CopyFailed { backup: String, reason: String },

    #[error("Backup '{0}' does not exist")]
    BackupMissing(String),

    #[error("SQL client error: {0}")]
    Sql(#[from] SqlClientError),
}

/// Git consumption errors. Push failures are environment-sensitive: inside a
/// recognized CI environment the commit stays local and the failure is
/// downgraded to a warning before ever becoming this error.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("git push failed outside CI: {stderr}")]
    PushFailed { stderr: String },

    #[error("I/O error during script consumption: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used across the crate
pub type DeployResult<T> = Result<T, DeployError>;
