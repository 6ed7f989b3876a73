//! Known-good query store: validated question/SQL pairs used to prime SQL
//! synthesis with similar examples.
//!
//! Backends:
//! - [`postgres::PgKnownGoodStore`]: pgvector table, `ON CONFLICT` upsert
//! - [`lance::LanceKnownGoodStore`]: embedded LanceDB table
//! - [`memory::MemoryKnownGoodStore`]: in-process, for tests and no-database mode
//!
//! Every backend ranks by exact cosine similarity, excludes entries without
//! SQL, and breaks ties by the most recent `updated_at`.

pub mod lance;
pub mod memory;
pub mod postgres;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use lance::LanceKnownGoodStore;
pub use memory::MemoryKnownGoodStore;
pub use postgres::PgKnownGoodStore;

/// Default number of similar queries returned.
pub const DEFAULT_TOP_K: usize = 3;

/// Query type tag stored with every entry.
pub const QUERY_TYPE_SQL: &str = "sql";

/// A stored question with its embedding and (optionally) validated SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownGoodQuery {
    pub question_text: String,
    pub embedding: Vec<f32>,
    pub sql_text: Option<String>,
    pub query_type: String,
    pub updated_at: DateTime<Utc>,
}

impl KnownGoodQuery {
    pub fn new(question_text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            question_text: question_text.into(),
            embedding,
            sql_text: None,
            query_type: QUERY_TYPE_SQL.to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql_text = Some(sql.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarQuery {
    pub question_text: String,
    pub sql_text: String,
    pub cosine_similarity: f64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait KnownGoodStore: Send + Sync {
    /// Insert or overwrite the entry keyed by `question_text`.
    ///
    /// The embedding, query type and timestamp are always replaced; an entry
    /// without SQL keeps the SQL already on record.
    async fn upsert(&self, entry: KnownGoodQuery) -> Result<()>;

    /// Up to `limit` entries with SQL, most similar first.
    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarQuery>>;

    async fn count(&self) -> Result<usize>;

    fn backend(&self) -> &'static str;
}

/// Cosine similarity; `None` when the lengths differ or a vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Score, filter and order candidates the way every backend must.
pub fn rank_candidates<'a>(
    query: &[f32],
    candidates: impl IntoIterator<Item = &'a KnownGoodQuery>,
    limit: usize,
) -> Vec<SimilarQuery> {
    let mut hits: Vec<SimilarQuery> = candidates
        .into_iter()
        .filter_map(|entry| {
            let sql_text = entry.sql_text.clone()?;
            let cosine_similarity = cosine_similarity(query, &entry.embedding)?;
            Some(SimilarQuery {
                question_text: entry.question_text.clone(),
                sql_text,
                cosine_similarity,
                updated_at: entry.updated_at,
            })
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(limit);
    hits
}

/// Descending similarity, then most recent first.
pub(crate) fn compare_hits(a: &SimilarQuery, b: &SimilarQuery) -> Ordering {
    b.cosine_similarity
        .total_cmp(&a.cosine_similarity)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}

/// Render hits as the few-shot block given to SQL synthesis.
pub fn format_known_good(hits: &[SimilarQuery]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "User question: {}\nQuery: {}\nCosine similarity: {}\n\n",
                hit.question_text, hit.sql_text, hit.cosine_similarity
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_similarity() {
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);

        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-9);

        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_rank_breaks_ties_by_recency() {
        let now = Utc::now();
        let older = KnownGoodQuery::new("older", vec![1.0, 0.0])
            .with_sql("SELECT 1")
            .with_updated_at(now - Duration::hours(1));
        let newer = KnownGoodQuery::new("newer", vec![2.0, 0.0])
            .with_sql("SELECT 2")
            .with_updated_at(now);

        let hits = rank_candidates(&[1.0, 0.0], [&older, &newer], 3);
        assert_eq!(hits[0].question_text, "newer");
        assert_eq!(hits[1].question_text, "older");
    }

    #[test]
    fn test_rank_skips_entries_without_sql() {
        let without = KnownGoodQuery::new("no sql", vec![1.0, 0.0]);
        let with = KnownGoodQuery::new("with sql", vec![0.5, 0.5]).with_sql("SELECT 1");

        let hits = rank_candidates(&[1.0, 0.0], [&without, &with], 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].question_text, "with sql");
    }

    #[test]
    fn test_format_known_good() {
        let hits = vec![SimilarQuery {
            question_text: "What is my latest run?".into(),
            sql_text: "SELECT 1".into(),
            cosine_similarity: 0.5,
            updated_at: Utc::now(),
        }];
        assert_eq!(
            format_known_good(&hits),
            "User question: What is my latest run?\nQuery: SELECT 1\nCosine similarity: 0.5\n\n"
        );
        assert_eq!(format_known_good(&[]), "");
    }

    proptest! {
        #[test]
        fn prop_rank_respects_limit_and_order(
            vectors in proptest::collection::vec(
                (proptest::collection::vec(-1.0f32..1.0, 4), any::<bool>()),
                0..12,
            ),
            query in proptest::collection::vec(-1.0f32..1.0, 4),
        ) {
            let entries: Vec<KnownGoodQuery> = vectors
                .into_iter()
                .enumerate()
                .map(|(i, (v, has_sql))| {
                    let entry = KnownGoodQuery::new(format!("q{i}"), v);
                    if has_sql { entry.with_sql(format!("SELECT {i}")) } else { entry }
                })
                .collect();

            let hits = rank_candidates(&query, &entries, DEFAULT_TOP_K);
            prop_assert!(hits.len() <= DEFAULT_TOP_K);
            for pair in hits.windows(2) {
                prop_assert!(pair[0].cosine_similarity >= pair[1].cosine_similarity);
            }
            for hit in &hits {
                let source = entries.iter().find(|e| e.question_text == hit.question_text).unwrap();
                prop_assert!(source.sql_text.is_some());
            }
        }
    }
}
