//! Stateless agents, one per specialized step of a turn.
//!
//! Agents take explicit inputs and return typed outputs. Raw model output
//! passes through [`normalize_output`](crate::ai::normalize::normalize_output)
//! before it is interpreted. No session data lives in an agent.

pub mod build_sql;
pub mod debug_sql;
pub mod general;
pub mod response_sql;
pub mod retrieval;
pub mod router;
pub mod visualization;

use std::sync::Arc;

use thiserror::Error;

use crate::ai::embeddings::EmbeddingService;
use crate::ai::llm_client::CompletionService;
use crate::retrieval::KnownGoodStore;
use crate::sql::schema_context::SchemaContext;

pub use build_sql::BuildSqlAgent;
pub use debug_sql::DebugSqlAgent;
pub use general::GeneralAgent;
pub use response_sql::{ResponseSqlAgent, SQL_FAILURE_MESSAGE};
pub use retrieval::RetrievalAgent;
pub use router::RouterAgent;
pub use visualization::VisualizationAgent;

/// Failure of an agent call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Classifier output outside {DATABASE, GENERAL}.
    #[error("Invalid question type: {0:?}")]
    Classification(String),

    /// External service failed after retries.
    #[error("{service} service error: {message}")]
    Service {
        service: &'static str,
        message: String,
    },
}

impl AgentError {
    pub(crate) fn completion(err: anyhow::Error) -> Self {
        AgentError::Service {
            service: "completion",
            message: format!("{err:#}"),
        }
    }
}

/// Every agent used by a turn, shared across sessions.
#[derive(Clone)]
pub struct AgentSet {
    pub router: Arc<RouterAgent>,
    pub general: Arc<GeneralAgent>,
    pub retrieval: Arc<RetrievalAgent>,
    pub build_sql: Arc<BuildSqlAgent>,
    pub debug_sql: Arc<DebugSqlAgent>,
    pub response_sql: Arc<ResponseSqlAgent>,
    pub visualization: Arc<VisualizationAgent>,
}

impl AgentSet {
    /// Wire every agent to one completion service and one known-good store.
    pub fn new(
        llm: Arc<dyn CompletionService>,
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn KnownGoodStore>,
        schema: Arc<SchemaContext>,
        top_k: usize,
    ) -> Self {
        let business_rules = schema.business_rules.clone();
        Self {
            router: Arc::new(RouterAgent::new(llm.clone())),
            general: Arc::new(GeneralAgent::new(llm.clone())),
            retrieval: Arc::new(RetrievalAgent::new(embedder, store, top_k)),
            build_sql: Arc::new(BuildSqlAgent::new(llm.clone(), schema)),
            debug_sql: Arc::new(DebugSqlAgent::new(llm.clone())),
            response_sql: Arc::new(ResponseSqlAgent::new(llm.clone(), business_rules)),
            visualization: Arc::new(VisualizationAgent::new(llm)),
        }
    }
}
