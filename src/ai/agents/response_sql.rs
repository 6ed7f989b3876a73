use std::sync::Arc;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts;
use crate::ai::workflow::state::ExecuteSqlResult;

/// Reply when the query could not be executed even after debugging.
pub const SQL_FAILURE_MESSAGE: &str = "Sorry, I couldn't run a query to answer that question, \
even after trying to fix it. Try rephrasing the question or asking about a specific activity type.";

/// Summarizes a query result in natural language.
pub struct ResponseSqlAgent {
    llm: Arc<dyn CompletionService>,
    business_rules: String,
}

impl ResponseSqlAgent {
    pub fn new(llm: Arc<dyn CompletionService>, business_rules: impl Into<String>) -> Self {
        Self {
            llm,
            business_rules: business_rules.into(),
        }
    }

    /// Summarize `result`. A failed execution gets [`SQL_FAILURE_MESSAGE`] without a model call.
    pub async fn summarize(
        &self,
        question: &str,
        success: bool,
        result: &ExecuteSqlResult,
        sql: &str,
    ) -> Result<String, AgentError> {
        if !success {
            return Ok(SQL_FAILURE_MESSAGE.to_string());
        }

        let (system, user) = prompts::summarize_sql_result(
            question,
            &result.to_prompt_text(),
            sql,
            &self.business_rules,
        );
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(normalize_output(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::test_support::ScriptedCompletion;

    #[tokio::test]
    async fn test_failure_needs_no_model_call() {
        let llm = Arc::new(ScriptedCompletion::new());
        let agent = ResponseSqlAgent::new(llm.clone(), "km");

        let text = agent
            .summarize("q", false, &ExecuteSqlResult::placeholder("error"), "SELECT 1")
            .await
            .unwrap();

        assert_eq!(text, SQL_FAILURE_MESSAGE);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_summarizes_rows() {
        let llm = Arc::new(ScriptedCompletion::new().on("Answer:", " Your longest run was 21.1 km. "));
        let agent = ResponseSqlAgent::new(llm.clone(), "Give the results in km");
        let rows = ExecuteSqlResult::Rows {
            rows: vec![serde_json::json!({"max": 21100.0})],
            truncated: false,
        };

        let text = agent
            .summarize("What is my longest run?", true, &rows, "SELECT max(distance)")
            .await
            .unwrap();

        assert_eq!(text, "Your longest run was 21.1 km.");
        assert!(llm.prompts()[0].contains("21100.0"));
    }
}
