//! Postgres access shared by the known-good store and the sandbox.
//!
//! Rows come back as JSON objects (`row_to_json`) so callers never need a
//! Rust type per query shape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use crate::error::{KudosError, Result};

/// A positional parameter for a parameterized statement (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    NullText,
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Vector(Vec<f32>),
    Json(serde_json::Value),
}

impl SqlParam {
    fn bind<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::NullText => query.bind(Option::<String>::None),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Timestamp(v) => query.bind(*v),
            SqlParam::Vector(v) => query.bind(pgvector::Vector::from(v.clone())),
            SqlParam::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/kudos".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        tracing::info!("Connecting to database: {}", mask_database_url(&config.url));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to connect to database: {}", e);
                e
            })?;

        tracing::info!(
            "Database pool ready (max {} connections)",
            config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// First row of `sql` as a JSON object, if any.
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<serde_json::Value>> {
        let wrapped = json_rows_sql(sql, None);
        let mut query = sqlx::query(&wrapped);
        for param in params {
            query = param.bind(query);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.map(|r| r.try_get::<serde_json::Value, _>(0))
            .transpose()
            .map_err(KudosError::from)
    }

    /// All rows of `sql` as JSON objects, in statement order.
    pub async fn fetch_all(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<serde_json::Value>> {
        let wrapped = json_rows_sql(sql, None);
        let mut query = sqlx::query(&wrapped);
        for param in params {
            query = param.bind(query);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<serde_json::Value, _>(0).map_err(KudosError::from))
            .collect()
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = param.bind(query);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// `INSERT ... ON CONFLICT (conflict_columns) DO UPDATE` every other column.
    pub async fn upsert_on_conflict(
        &self,
        table: &str,
        row: &[(&str, SqlParam)],
        conflict_columns: &[&str],
    ) -> Result<u64> {
        let columns: Vec<&str> = row.iter().map(|(c, _)| *c).collect();
        let sql = build_upsert_sql(table, &columns, conflict_columns)?;
        let params: Vec<SqlParam> = row.iter().map(|(_, p)| p.clone()).collect();
        self.execute(&sql, &params).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Wrap a statement so each row is returned as one JSON column.
///
/// The wrapper is a bare subquery scan plus an optional `LIMIT`: it adds no
/// join, aggregate or sort of its own, so Postgres emits rows in the order
/// the inner `ORDER BY` produced them. SQL does not formally promise that
/// order survives a subquery, so any change here must keep the outer query a
/// plain scan.
pub(crate) fn json_rows_sql(sql: &str, limit: Option<usize>) -> String {
    let body = sql.trim().trim_end_matches(';');
    match limit {
        Some(limit) => format!("SELECT row_to_json(t) FROM ({body}) AS t LIMIT {limit}"),
        None => format!("SELECT row_to_json(t) FROM ({body}) AS t"),
    }
}

pub fn build_upsert_sql(
    table: &str,
    columns: &[&str],
    conflict_columns: &[&str],
) -> Result<String> {
    validate_identifier(table)?;
    if columns.is_empty() || conflict_columns.is_empty() {
        return Err(KudosError::InvalidIdentifier(
            "upsert needs at least one column and one conflict column".to_string(),
        ));
    }
    for column in columns.iter().chain(conflict_columns) {
        validate_identifier(column)?;
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !conflict_columns.contains(c))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    Ok(format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
        columns.join(", "),
        placeholders.join(", "),
        conflict_columns.join(", "),
    ))
}

/// Accept `name` or `schema.name` made of `[A-Za-z0-9_]`, not starting with a digit.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let parts: Vec<&str> = identifier.split('.').collect();
    let valid = parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(KudosError::InvalidIdentifier(identifier.to_string()))
    }
}

/// Hide the password in a connection URL for logging.
pub fn mask_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
