use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{rank_candidates, KnownGoodQuery, KnownGoodStore, SimilarQuery};
use crate::error::Result;

/// Process-local store keyed by question text.
#[derive(Default)]
pub struct MemoryKnownGoodStore {
    entries: RwLock<HashMap<String, KnownGoodQuery>>,
}

impl MemoryKnownGoodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, question_text: &str) -> Option<KnownGoodQuery> {
        self.entries.read().get(question_text).cloned()
    }
}

#[async_trait]
impl KnownGoodStore for MemoryKnownGoodStore {
    async fn upsert(&self, mut entry: KnownGoodQuery) -> Result<()> {
        let mut entries = self.entries.write();
        if entry.sql_text.is_none() {
            entry.sql_text = entries
                .get(&entry.question_text)
                .and_then(|existing| existing.sql_text.clone());
        }
        entries.insert(entry.question_text.clone(), entry);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarQuery>> {
        let entries = self.entries.read();
        Ok(rank_candidates(embedding, entries.values(), limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
