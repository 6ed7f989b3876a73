use std::sync::Arc;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts;

/// Answers questions that need no data access.
pub struct GeneralAgent {
    llm: Arc<dyn CompletionService>,
}

impl GeneralAgent {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn answer(&self, question: &str) -> Result<String, AgentError> {
        let (system, user) = prompts::answer_general(question);
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(normalize_output(&raw))
    }
}
