use std::sync::Arc;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts;
use crate::ai::workflow::state::QuestionType;

/// Classifies a question as needing the user's data or not.
pub struct RouterAgent {
    llm: Arc<dyn CompletionService>,
}

impl RouterAgent {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, question: &str) -> Result<QuestionType, AgentError> {
        let (system, user) = prompts::classify(question);
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        parse_question_type(&raw)
    }
}

/// Exact label match after normalization; anything else is an error.
pub fn parse_question_type(raw: &str) -> Result<QuestionType, AgentError> {
    match normalize_output(raw).as_str() {
        "DATABASE" => Ok(QuestionType::Database),
        "GENERAL" => Ok(QuestionType::General),
        other => Err(AgentError::Classification(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_labels_with_whitespace() {
        assert_eq!(parse_question_type("DATABASE").unwrap(), QuestionType::Database);
        assert_eq!(parse_question_type("GENERAL\n").unwrap(), QuestionType::General);
        assert_eq!(parse_question_type("```\nGENERAL\n```").unwrap(), QuestionType::General);
    }

    #[test]
    fn test_rejects_anything_else() {
        for raw in ["database", "MAYBE", "DATABASE.", "GENERAL DATABASE", ""] {
            assert!(matches!(
                parse_question_type(raw),
                Err(AgentError::Classification(_))
            ));
        }
    }
}
