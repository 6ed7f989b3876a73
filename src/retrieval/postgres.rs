use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{KnownGoodQuery, KnownGoodStore, SimilarQuery};
use crate::error::{KudosError, Result};
use crate::sql::database::{validate_identifier, Database, SqlParam};

pub const DEFAULT_TABLE: &str = "main.known_good_queries";

/// Known-good queries in a pgvector table.
pub struct PgKnownGoodStore {
    db: Database,
    table: String,
    dimension: usize,
}

impl PgKnownGoodStore {
    pub fn new(db: Database, table: impl Into<String>, dimension: usize) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self {
            db,
            table,
            dimension,
        })
    }

    /// Create the extension, schema and table when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.db
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await?;

        if let Some((schema, _)) = self.table.split_once('.') {
            self.db
                .execute(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"), &[])
                .await?;
        }

        self.db
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        user_question TEXT PRIMARY KEY,
                        user_question_embedding VECTOR({}) NOT NULL,
                        query TEXT,
                        query_type TEXT NOT NULL DEFAULT 'sql',
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )",
                    self.table, self.dimension
                ),
                &[],
            )
            .await?;

        tracing::info!("[retrieval] Known-good table ready: {}", self.table);
        Ok(())
    }

    fn search_sql(&self) -> String {
        format!(
            "SELECT user_question, query, \
             1 - (user_question_embedding <=> $1::vector) AS cosine_similarity, updated_at \
             FROM {} WHERE query IS NOT NULL \
             ORDER BY cosine_similarity DESC, updated_at DESC LIMIT $2",
            self.table
        )
    }
}

#[async_trait]
impl KnownGoodStore for PgKnownGoodStore {
    async fn upsert(&self, entry: KnownGoodQuery) -> Result<()> {
        if entry.embedding.len() != self.dimension {
            return Err(KudosError::Embedding(format!(
                "embedding has {} dimensions, table expects {}",
                entry.embedding.len(),
                self.dimension
            )));
        }

        let mut row = vec![
            ("user_question", SqlParam::Text(entry.question_text.clone())),
            ("user_question_embedding", SqlParam::Vector(entry.embedding)),
            ("query_type", SqlParam::Text(entry.query_type)),
            ("updated_at", SqlParam::Timestamp(entry.updated_at)),
        ];
        // Leaving the column out keeps the stored SQL on conflict
        if let Some(sql) = entry.sql_text {
            row.push(("query", SqlParam::Text(sql)));
        }

        self.db
            .upsert_on_conflict(&self.table, &row, &["user_question"])
            .await?;
        tracing::debug!("[retrieval] Upserted known-good query: {}", entry.question_text);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarQuery>> {
        let rows = self
            .db
            .fetch_all(
                &self.search_sql(),
                &[
                    SqlParam::Vector(embedding.to_vec()),
                    SqlParam::Int(limit as i64),
                ],
            )
            .await?;

        rows.iter().map(parse_hit).collect()
    }

    async fn count(&self) -> Result<usize> {
        let row = self
            .db
            .fetch_one(&format!("SELECT count(*) AS n FROM {}", self.table), &[])
            .await?;
        Ok(row
            .and_then(|r| r.get("n").and_then(|n| n.as_u64()))
            .unwrap_or(0) as usize)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

fn parse_hit(row: &serde_json::Value) -> Result<SimilarQuery> {
    let field = |name: &str| {
        row.get(name)
            .ok_or_else(|| KudosError::Internal(format!("known-good row missing '{name}'")))
    };

    let question_text = field("user_question")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let sql_text = field("query")?.as_str().unwrap_or_default().to_string();
    let cosine_similarity = field("cosine_similarity")?.as_f64().unwrap_or(0.0);
    let updated_at = field("updated_at")?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| KudosError::Internal("known-good row has invalid updated_at".into()))?;

    Ok(SimilarQuery {
        question_text,
        sql_text,
        cosine_similarity,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_store() -> PgKnownGoodStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        PgKnownGoodStore::new(Database::from_pool(pool), DEFAULT_TABLE, 3).unwrap()
    }

    #[tokio::test]
    async fn test_search_sql_orders_by_similarity_then_recency() {
        let sql = lazy_store().search_sql();
        assert!(sql.contains("FROM main.known_good_queries WHERE query IS NOT NULL"));
        assert!(sql.contains("ORDER BY cosine_similarity DESC, updated_at DESC LIMIT $2"));
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let err = lazy_store()
            .upsert(KnownGoodQuery::new("q", vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, KudosError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        assert!(PgKnownGoodStore::new(Database::from_pool(pool), "x; drop", 3).is_err());
    }

    #[test]
    fn test_parse_hit() {
        let row = serde_json::json!({
            "user_question": "What is my longest run?",
            "query": "SELECT max(distance) FROM main.strava_activities",
            "cosine_similarity": 0.93,
            "updated_at": "2024-05-01T10:00:00.123456+08:00"
        });
        let hit = parse_hit(&row).unwrap();
        assert_eq!(hit.question_text, "What is my longest run?");
        assert!((hit.cosine_similarity - 0.93).abs() < 1e-9);
        assert_eq!(hit.updated_at.to_rfc3339(), "2024-05-01T02:00:00.123456+00:00");
    }
}
