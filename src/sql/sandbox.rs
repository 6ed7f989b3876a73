//! Sandboxed execution of generated SQL.
//!
//! [`SqlExecutor::execute`] never returns an error: guard rejections, database
//! errors and timeouts all come back as [`ExecutionOutcome::Failed`] carrying
//! the error text verbatim, which the debug step feeds back to the model.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;

use super::database::{json_rows_sql, Database};
use super::guard::{executable_body, validate_read_only_sql};

/// Result of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows {
        rows: Vec<serde_json::Value>,
        truncated: bool,
    },
    Failed(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Rows { .. })
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> ExecutionOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    /// Maximum rows returned; more rows set the truncation flag.
    pub row_cap: usize,
    pub statement_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            row_cap: 500,
            statement_timeout: Duration::from_secs(15),
        }
    }
}

/// Executes statements inside a read-only Postgres transaction.
pub struct PgSandbox {
    db: Database,
    limits: SandboxLimits,
}

impl PgSandbox {
    pub fn new(db: Database, limits: SandboxLimits) -> Self {
        Self { db, limits }
    }

    async fn run_read_only(&self, sql: &str) -> Result<Vec<serde_json::Value>, sqlx::Error> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.limits.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        // One extra row tells us whether the cap truncated the result
        let wrapped = json_rows_sql(sql, Some(self.limits.row_cap + 1));
        let rows = sqlx::query(&wrapped).fetch_all(&mut *tx).await?;

        let values = rows
            .iter()
            .map(|row| row.try_get::<serde_json::Value, _>(0))
            .collect::<Result<Vec<_>, _>>()?;

        tx.rollback().await?;
        Ok(values)
    }
}

#[async_trait]
impl SqlExecutor for PgSandbox {
    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        if let Err(violation) = validate_read_only_sql(sql) {
            tracing::warn!("[sandbox] Rejected statement: {}", violation);
            return ExecutionOutcome::Failed(violation.to_string());
        }

        let body = executable_body(sql);
        tracing::debug!("[sandbox] Executing: {}", body);

        // Outer deadline covers pool acquisition as well as the statement
        let deadline = self.limits.statement_timeout + Duration::from_secs(5);
        let result = match tokio::time::timeout(deadline, self.run_read_only(&body)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("[sandbox] Statement exceeded {:?}", deadline);
                return ExecutionOutcome::Failed(format!(
                    "statement timed out after {:?}",
                    deadline
                ));
            }
        };

        match result {
            Ok(mut rows) => {
                let truncated = rows.len() > self.limits.row_cap;
                if truncated {
                    rows.truncate(self.limits.row_cap);
                    tracing::info!("[sandbox] Result truncated to {} rows", self.limits.row_cap);
                }
                tracing::debug!("[sandbox] Returned {} rows", rows.len());
                ExecutionOutcome::Rows { rows, truncated }
            }
            Err(e) => {
                tracing::info!("[sandbox] Execution failed: {}", e);
                ExecutionOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Executor used when no database is configured; every statement fails.
pub struct NoDatabase;

#[async_trait]
impl SqlExecutor for NoDatabase {
    async fn execute(&self, _sql: &str) -> ExecutionOutcome {
        ExecutionOutcome::Failed(
            "no database configured; set database.url or DATABASE_URL".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_sandbox() -> PgSandbox {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        PgSandbox::new(
            Database::from_pool(pool),
            SandboxLimits {
                row_cap: 10,
                statement_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_mutation_rejected_before_database() {
        let sandbox = lazy_sandbox();
        let outcome = sandbox.execute("DROP TABLE main.strava_activities").await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failed("Mutating SQL keyword `drop` is not allowed".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_database_becomes_data() {
        let sandbox = lazy_sandbox();
        let outcome = sandbox.execute("SELECT 1").await;
        match outcome {
            ExecutionOutcome::Failed(message) => assert!(!message.is_empty()),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
