use std::sync::Arc;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts::{self, BuildSqlContext};
use crate::sql::schema_context::SchemaContext;

/// Synthesizes SQL for a database question.
pub struct BuildSqlAgent {
    llm: Arc<dyn CompletionService>,
    schema: Arc<SchemaContext>,
}

impl BuildSqlAgent {
    pub fn new(llm: Arc<dyn CompletionService>, schema: Arc<SchemaContext>) -> Self {
        Self { llm, schema }
    }

    /// Fence-stripped SQL bound to `scope_id`.
    pub async fn synthesize(
        &self,
        question: &str,
        scope_id: &str,
        retrieved_context: &str,
    ) -> Result<String, AgentError> {
        let (system, user) = prompts::build_sql(&BuildSqlContext {
            question,
            scope_id,
            retrieved_context,
            schema: &self.schema,
        });

        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(normalize_output(&raw))
    }
}
