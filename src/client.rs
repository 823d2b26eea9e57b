//! External collaborator boundaries
//!
//! The raw SQL transport and the git executable are out of scope; this module
//! defines the two seams the planner programs against. Production wiring
//! supplies real implementations, tests supply in-memory fakes.

use crate::error::SqlClientError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// One result row as a stringly snapshot, keyed by column name. NULLs map to
/// `None`; everything else to its textual representation.
pub type SqlRow = HashMap<String, Option<String>>;

/// Connect/execute/query primitives expected from the SQL transport layer
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Execute a non-query statement; returns rows affected
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<u64, SqlClientError>;

    /// Run a query and return the full result set
    async fn query(&self, sql: &str, timeout: Duration) -> Result<Vec<SqlRow>, SqlClientError>;
}

/// Helper: first column of the first row as an i64, if any
pub async fn query_scalar_i64(
    client: &dyn SqlClient,
    sql: &str,
    timeout: Duration,
) -> Result<Option<i64>, SqlClientError> {
    let rows = client.query(sql, timeout).await?;
    Ok(rows
        .first()
        .and_then(|r| r.values().next().cloned())
        .flatten()
        .and_then(|v| v.parse().ok()))
}

/// Output of one git invocation
#[derive(Debug, Clone)]
pub struct GitCommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitCommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Synchronous seam over the external git executable
pub trait GitClient: Send + Sync {
    /// Run `git <args>` in the repository working directory
    fn run(&self, args: &[&str]) -> std::io::Result<GitCommandOutput>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Scripted SQL client: responses are matched by substring of the SQL
    /// text, in registration order. Unmatched queries return no rows and
    /// unmatched executes succeed.
    pub struct FakeSqlClient {
        pub executed: Mutex<Vec<String>>,
        query_responses: Vec<(String, Vec<SqlRow>)>,
        execute_errors: Vec<(String, SqlClientError)>,
    }

    impl FakeSqlClient {
        pub fn new() -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
                query_responses: Vec::new(),
                execute_errors: Vec::new(),
            }
        }

        pub fn with_query(mut self, needle: &str, rows: Vec<SqlRow>) -> Self {
            self.query_responses.push((needle.to_string(), rows));
            self
        }

        pub fn with_execute_error(mut self, needle: &str, error: SqlClientError) -> Self {
            self.execute_errors.push((needle.to_string(), error));
            self
        }

        pub fn executed_statements(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    pub fn row(pairs: &[(&str, Option<&str>)]) -> SqlRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    #[async_trait]
    impl SqlClient for FakeSqlClient {
        async fn execute(&self, sql: &str, _timeout: Duration) -> Result<u64, SqlClientError> {
            for (needle, err) in &self.execute_errors {
                if sql.contains(needle.as_str()) {
                    return Err(err.clone());
                }
            }
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(0)
        }

        async fn query(&self, sql: &str, _timeout: Duration) -> Result<Vec<SqlRow>, SqlClientError> {
            for (needle, rows) in &self.query_responses {
                if sql.contains(needle.as_str()) {
                    return Ok(rows.clone());
                }
            }
            Ok(Vec::new())
        }
    }

    /// Scripted git client recording every invocation
    pub struct FakeGitClient {
        pub calls: Mutex<Vec<Vec<String>>>,
        failures: Vec<(String, GitCommandOutput)>,
    }

    impl FakeGitClient {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures: Vec::new(),
            }
        }

        /// Fail any invocation whose first argument matches `subcommand`
        pub fn failing(mut self, subcommand: &str, exit_code: i32, stderr: &str) -> Self {
            self.failures.push((
                subcommand.to_string(),
                GitCommandOutput {
                    exit_code,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            ));
            self
        }

        pub fn recorded(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GitClient for FakeGitClient {
        fn run(&self, args: &[&str]) -> std::io::Result<GitCommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            if let Some(first) = args.first() {
                for (sub, out) in &self.failures {
                    if sub == first {
                        return Ok(out.clone());
                    }
                }
            }
            let stdout = match args.first().copied() {
                Some("branch") => "main\n".to_string(),
                Some("rev-parse") => "0123456789abcdef0123456789abcdef01234567\n".to_string(),
                Some("status") => String::new(),
                _ => String::new(),
            };
            Ok(GitCommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            })
        }
    }
}
