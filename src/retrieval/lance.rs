//! Embedded LanceDB backend for known-good queries.
//!
//! Upsert is delete-then-add keyed by question text. Search scans the table
//! and scores candidates with exact cosine similarity so ordering and
//! tie-breaking match the other backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    types::Float32Type, Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array,
    RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};

use super::{rank_candidates, KnownGoodQuery, KnownGoodStore, SimilarQuery};
use crate::error::{KudosError, Result};

const TABLE_NAME: &str = "known_good_queries";

/// LanceDB defaults to 10 rows per query
const QUERY_LIMIT: usize = 1_000_000;

pub struct LanceKnownGoodStore {
    table: Table,
    schema: SchemaRef,
    dimension: usize,
    data_dir: PathBuf,
}

impl LanceKnownGoodStore {
    /// Open (or create) the store under `data_dir`.
    pub async fn open(data_dir: &Path, dimension: usize) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_path = data_dir.join("known_good.lance");
        let uri = db_path.to_string_lossy().to_string();
        let connection = lancedb::connect(&uri).execute().await?;

        let schema = Self::schema(dimension)?;
        let table = Self::ensure_table(&connection, schema.clone()).await?;

        tracing::info!("[retrieval] LanceDB known-good store at {:?}", db_path);
        Ok(Self {
            table,
            schema,
            dimension,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn schema(dimension: usize) -> Result<SchemaRef> {
        let list_size = i32::try_from(dimension)
            .map_err(|_| KudosError::Embedding(format!("dimension {dimension} too large")))?;

        Ok(Arc::new(Schema::new(vec![
            Field::new("question_text", DataType::Utf8, false),
            Field::new("sql_text", DataType::Utf8, true),
            Field::new("query_type", DataType::Utf8, false),
            Field::new("updated_at_ms", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    list_size,
                ),
                false,
            ),
        ])))
    }

    async fn ensure_table(connection: &Connection, schema: SchemaRef) -> Result<Table> {
        if let Ok(table) = connection.open_table(TABLE_NAME).execute().await {
            return Ok(table);
        }

        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), schema);
        let table = connection
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await?;
        Ok(table)
    }

    async fn load_all(&self, filter: Option<String>) -> Result<Vec<KnownGoodQuery>> {
        self.table.checkout_latest().await?;

        let mut query = self.table.query().limit(QUERY_LIMIT);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }
        let batches = query.execute().await?.try_collect::<Vec<_>>().await?;

        let mut entries = Vec::new();
        for batch in &batches {
            entries.extend(record_batch_to_entries(batch)?);
        }
        Ok(entries)
    }

    fn entry_to_batch(&self, entry: &KnownGoodQuery) -> Result<RecordBatch> {
        let embeddings = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vec![Some(entry.embedding.iter().copied().map(Some).collect::<Vec<_>>())],
            self.dimension as i32,
        );

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![entry.question_text.clone()])) as ArrayRef,
                Arc::new(StringArray::from(vec![entry.sql_text.clone()])) as ArrayRef,
                Arc::new(StringArray::from(vec![entry.query_type.clone()])) as ArrayRef,
                Arc::new(Int64Array::from(vec![entry.updated_at.timestamp_millis()])) as ArrayRef,
                Arc::new(embeddings) as ArrayRef,
            ],
        )?;
        Ok(batch)
    }
}

fn question_filter(question_text: &str) -> String {
    format!("question_text = '{}'", question_text.replace('\'', "''"))
}

#[async_trait]
impl KnownGoodStore for LanceKnownGoodStore {
    async fn upsert(&self, mut entry: KnownGoodQuery) -> Result<()> {
        if entry.embedding.len() != self.dimension {
            return Err(KudosError::Embedding(format!(
                "embedding has {} dimensions, store expects {}",
                entry.embedding.len(),
                self.dimension
            )));
        }

        let filter = question_filter(&entry.question_text);
        if entry.sql_text.is_none() {
            entry.sql_text = self
                .load_all(Some(filter.clone()))
                .await?
                .into_iter()
                .max_by_key(|e| e.updated_at)
                .and_then(|e| e.sql_text);
        }

        let batch = self.entry_to_batch(&entry)?;
        self.table.delete(&filter).await?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), self.schema.clone());
        self.table.add(Box::new(batches)).execute().await?;

        tracing::debug!("[retrieval] Upserted known-good query: {}", entry.question_text);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarQuery>> {
        let entries = self
            .load_all(Some("sql_text IS NOT NULL".to_string()))
            .await?;

        // Concurrent upserts of one question can briefly leave two rows
        let mut latest: HashMap<String, KnownGoodQuery> = HashMap::new();
        for entry in entries {
            match latest.get(&entry.question_text) {
                Some(existing) if existing.updated_at >= entry.updated_at => {}
                _ => {
                    latest.insert(entry.question_text.clone(), entry);
                }
            }
        }

        Ok(rank_candidates(embedding, latest.values(), limit))
    }

    async fn count(&self) -> Result<usize> {
        self.table.checkout_latest().await?;
        Ok(self.table.count_rows(None).await?)
    }

    fn backend(&self) -> &'static str {
        "lance"
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| KudosError::Internal(format!("{name} column is not StringArray")))
}

fn record_batch_to_entries(batch: &RecordBatch) -> Result<Vec<KnownGoodQuery>> {
    let questions = string_column(batch, "question_text")?;
    let sqls = string_column(batch, "sql_text")?;
    let query_types = string_column(batch, "query_type")?;
    let timestamps = batch
        .column_by_name("updated_at_ms")
        .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| KudosError::Internal("updated_at_ms column is not Int64Array".into()))?;
    let embeddings = batch
        .column_by_name("embedding")
        .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| KudosError::Internal("embedding column is not FixedSizeListArray".into()))?;

    let mut entries = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = embeddings.value(i);
        let embedding = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|arr| arr.values().to_vec())
            .unwrap_or_default();

        let updated_at = Utc
            .timestamp_millis_opt(timestamps.value(i))
            .single()
            .unwrap_or_else(Utc::now);

        entries.push(KnownGoodQuery {
            question_text: questions.value(i).to_string(),
            embedding,
            sql_text: (!sqls.is_null(i)).then(|| sqls.value(i).to_string()),
            query_type: query_types.value(i).to_string(),
            updated_at,
        });
    }
    Ok(entries)
}
