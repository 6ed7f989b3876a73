use std::sync::Arc;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts;

/// Rewrites SQL that failed to execute, given the executor's error text.
pub struct DebugSqlAgent {
    llm: Arc<dyn CompletionService>,
}

impl DebugSqlAgent {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn debug(
        &self,
        question: &str,
        failing_sql: &str,
        error_message: &str,
    ) -> Result<String, AgentError> {
        let (system, user) = prompts::debug_sql(question, failing_sql, error_message);
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(normalize_output(&raw))
    }
}
