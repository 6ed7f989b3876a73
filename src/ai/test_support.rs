//! Scripted collaborators for driving agents and the turn engine in tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::embeddings::EmbeddingService;
use super::llm_client::CompletionService;
use crate::retrieval::{KnownGoodQuery, KnownGoodStore, MemoryKnownGoodStore, SimilarQuery};
use crate::sql::sandbox::{ExecutionOutcome, SqlExecutor};

enum Reply {
    Text(String),
    Fail(String),
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
    calls: usize,
}

/// Completion service answering by the first rule whose needle occurs in the
/// system or user prompt. A rule with several replies hands them out in
/// order and repeats the last one.
#[derive(Default)]
pub struct ScriptedCompletion {
    rules: Mutex<Vec<Rule>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, reply: &str) -> Self {
        self.push(needle, vec![Reply::Text(reply.to_string())])
    }

    pub fn on_sequence(self, needle: &str, replies: &[&str]) -> Self {
        let replies = replies.iter().map(|r| Reply::Text(r.to_string())).collect();
        self.push(needle, replies)
    }

    pub fn failing(self, needle: &str, error: &str) -> Self {
        self.push(needle, vec![Reply::Fail(error.to_string())])
    }

    fn push(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
            calls: 0,
        });
        self
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Number of calls answered by the rule registered with `needle`.
    pub fn calls_for(&self, needle: &str) -> usize {
        self.rules
            .lock()
            .iter()
            .filter(|r| r.needle == needle)
            .map(|r| r.calls)
            .sum()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());

        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| system.contains(&r.needle) || prompt.contains(&r.needle))
            .ok_or_else(|| anyhow::anyhow!("no scripted reply for prompt: {prompt}"))?;

        rule.calls += 1;
        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            None
        };
        let reply = reply.as_ref().or_else(|| rule.replies.front());

        match reply {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail(error)) => Err(anyhow::anyhow!(error.clone())),
            None => Err(anyhow::anyhow!("rule '{}' has no replies", rule.needle)),
        }
    }

    fn description(&self) -> String {
        "scripted".to_string()
    }
}

/// Deterministic bag-of-words embedding: equal texts embed identically.
pub struct HashEmbedding {
    dimension: usize,
    calls: Mutex<usize>,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        *self.calls.lock() += 1;
        let mut vector = vec![0.0f32; self.dimension];
        vector[0] = 1.0;
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-memory store that counts searches and upserts.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryKnownGoodStore,
    searches: Mutex<usize>,
    upserts: Mutex<usize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn searches(&self) -> usize {
        *self.searches.lock()
    }

    pub fn upserts(&self) -> usize {
        *self.upserts.lock()
    }
}

#[async_trait]
impl KnownGoodStore for CountingStore {
    async fn upsert(&self, entry: KnownGoodQuery) -> crate::error::Result<()> {
        *self.upserts.lock() += 1;
        self.inner.upsert(entry).await
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> crate::error::Result<Vec<SimilarQuery>> {
        *self.searches.lock() += 1;
        self.inner.search(embedding, limit).await
    }

    async fn count(&self) -> crate::error::Result<usize> {
        self.inner.count().await
    }

    fn backend(&self) -> &'static str {
        "counting"
    }
}

/// Executor replaying scripted outcomes; the last one repeats.
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(rows: Vec<serde_json::Value>) -> Self {
        Self::new(vec![ExecutionOutcome::Rows {
            rows,
            truncated: false,
        }])
    }

    pub fn always_failing(error: &str) -> Self {
        Self::new(vec![ExecutionOutcome::Failed(error.to_string())])
    }

    /// Statements received, in call order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        self.executed.lock().push(sql.to_string());
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            if let Some(outcome) = outcomes.pop_front() {
                return outcome;
            }
        }
        outcomes
            .front()
            .cloned()
            .unwrap_or_else(|| ExecutionOutcome::Failed("no scripted outcome".to_string()))
    }
}
