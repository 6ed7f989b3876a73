//! Inbound surface of the assistant: one question in, one response out.
//!
//! [`TurnService::run_turn`] never fails. When the engine reports an error the
//! response carries a safe fallback text plus a machine-readable code, and the
//! raw error is logged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::agents::{AgentError, AgentSet, RetrievalAgent};
use super::workflow::models::{NodeId, TransitionPolicy};
use super::workflow::state::{
    ChartKind, ChatMessage, ConversationState, ExecuteSqlResult, QuestionType, StatePatch,
};
use super::workflow::checkpoint::CheckpointLimits;
use super::workflow::{TurnEngine, TurnError, TurnGraph};
use crate::retrieval::SimilarQuery;
use crate::sql::sandbox::SqlExecutor;

/// Returned when a turn fails for a reason the caller cannot fix.
pub const FALLBACK_RESPONSE: &str =
    "Sorry, something went wrong while answering your question. Please try again in a moment.";

/// Returned when the question could not be routed.
pub const CLASSIFICATION_FALLBACK: &str =
    "Sorry, I couldn't tell whether that question is about your activities. Could you rephrase it?";

/// Returned while a previous question of the same session is still running.
pub const BUSY_RESPONSE: &str =
    "I'm still working on your previous question. Please wait for it to finish.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub question: String,
    pub scope_id: String,
    pub session_id: String,
}

impl TurnRequest {
    pub fn new(
        question: impl Into<String>,
        scope_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            scope_id: scope_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Machine-readable description of a failed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response_text: String,
    pub question_type: Option<QuestionType>,
    pub retrieved_context: String,
    pub sql_query: String,
    pub execute_sql_status: bool,
    pub execute_sql_result: ExecuteSqlResult,
    pub debug_counter: u32,
    pub visualization_kind: Option<ChartKind>,
    pub visualization_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TurnFailure>,
}

impl TurnResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn failed(err: &TurnError) -> Self {
        let response_text = match err {
            TurnError::Classification { .. } => CLASSIFICATION_FALLBACK,
            TurnError::SessionBusy(_) => BUSY_RESPONSE,
            TurnError::Service { .. } | TurnError::Engine(_) => FALLBACK_RESPONSE,
        };
        Self {
            response_text: response_text.to_string(),
            error: Some(TurnFailure {
                code: err.code().to_string(),
                node: err.node(),
            }),
            ..Self::default()
        }
    }
}

impl From<ConversationState> for TurnResponse {
    fn from(state: ConversationState) -> Self {
        Self {
            response_text: state.response_text,
            question_type: state.question_type,
            retrieved_context: state.retrieved_context,
            sql_query: state.sql_query,
            execute_sql_status: state.execute_sql_status,
            execute_sql_result: state.execute_sql_result,
            debug_counter: state.debug_counter,
            visualization_kind: state.visualization_kind,
            visualization_code: state.visualization_code,
            error: None,
        }
    }
}

/// Owns the turn engine and the known-good store shared by all sessions.
pub struct TurnService {
    engine: TurnEngine,
    retrieval: Arc<RetrievalAgent>,
    auto_promote: bool,
}

impl TurnService {
    pub fn new(
        agents: AgentSet,
        executor: Arc<dyn SqlExecutor>,
        policy: TransitionPolicy,
        auto_promote: bool,
    ) -> Self {
        Self::with_checkpoint_limits(
            agents,
            executor,
            policy,
            auto_promote,
            CheckpointLimits::default(),
        )
    }

    pub fn with_checkpoint_limits(
        agents: AgentSet,
        executor: Arc<dyn SqlExecutor>,
        policy: TransitionPolicy,
        auto_promote: bool,
        limits: CheckpointLimits,
    ) -> Self {
        let graph = TurnGraph::build(&agents, executor, policy);
        Self {
            engine: TurnEngine::with_limits(&graph, limits),
            retrieval: agents.retrieval,
            auto_promote,
        }
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub async fn run_turn(&self, request: TurnRequest) -> TurnResponse {
        let initial = StatePatch::new()
            .with_message(ChatMessage::user(request.question.clone()))
            .with_scope_id(request.scope_id.clone());

        match self.engine.execute(initial, &request.session_id).await {
            Ok(state) => {
                if self.auto_promote {
                    self.promote(&state);
                }
                state.into()
            }
            Err(e) => {
                tracing::error!(
                    session_id = %request.session_id,
                    code = e.code(),
                    "[turn] Turn failed: {}",
                    e
                );
                TurnResponse::failed(&e)
            }
        }
    }

    /// Record a successful database turn as a known-good query in the background.
    fn promote(&self, state: &ConversationState) {
        if state.question_type != Some(QuestionType::Database) || !state.execute_sql_status {
            return;
        }

        let retrieval = self.retrieval.clone();
        let question = state.user_question.clone();
        let sql = state.sql_query.clone();
        tokio::spawn(async move {
            match retrieval.store_known_good_with_sql(&question, &sql).await {
                Ok(()) => tracing::debug!("[retrieval] Promoted {:?} to known-good", question),
                Err(e) => tracing::warn!("[retrieval] Could not promote {:?}: {}", question, e),
            }
        });
    }

    /// Upsert a known-good question, optionally with its SQL.
    pub async fn store_known_good(&self, question: &str, sql: Option<&str>) -> Result<(), AgentError> {
        match sql {
            Some(sql) => self.retrieval.store_known_good_with_sql(question, sql).await,
            None => self.retrieval.store_known_good(question).await,
        }
    }

    pub async fn search_known_good(&self, question: &str) -> Result<Vec<SimilarQuery>, AgentError> {
        self.retrieval.retrieve_similar(question).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ai::test_support::{HashEmbedding, ScriptedCompletion, ScriptedExecutor};
    use crate::retrieval::{KnownGoodStore, MemoryKnownGoodStore};
    use crate::sql::schema_context::SchemaContext;

    const SCOPED_SQL: &str =
        "SELECT max(distance) FROM main.strava_activities WHERE hashed_strava_id = 'abc123'";

    fn service(
        llm: ScriptedCompletion,
        executor: ScriptedExecutor,
        auto_promote: bool,
    ) -> (TurnService, Arc<MemoryKnownGoodStore>) {
        let store = Arc::new(MemoryKnownGoodStore::new());
        let agents = AgentSet::new(
            Arc::new(llm),
            Arc::new(HashEmbedding::new(16)),
            store.clone(),
            Arc::new(SchemaContext::default()),
            3,
        );
        let service = TurnService::new(
            agents,
            Arc::new(executor),
            TransitionPolicy::default(),
            auto_promote,
        );
        (service, store)
    }

    fn database_llm() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .on("Category:", "DATABASE")
            .on("SQL:", SCOPED_SQL)
            .on("Answer:", "Your longest run was 21.1 km.")
            .on("chart_type", r#"{"chart_type": ""}"#)
    }

    #[tokio::test]
    async fn test_database_turn_response() {
        let (service, _) = service(
            database_llm(),
            ScriptedExecutor::succeeding(vec![serde_json::json!({"max": 21100.0})]),
            false,
        );

        let response = service
            .run_turn(TurnRequest::new("What is my longest run?", "abc123", "s1"))
            .await;

        assert!(!response.is_error());
        assert_eq!(response.question_type, Some(QuestionType::Database));
        assert!(response.sql_query.contains("abc123"));
        assert!(response.execute_sql_status);
        assert!(!response.response_text.is_empty());
        assert_eq!(response.execute_sql_result.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_turn_returns_fallback() {
        let (service, _) = service(
            ScriptedCompletion::new().failing("Category:", "upstream 503"),
            ScriptedExecutor::succeeding(vec![]),
            false,
        );

        let response = service
            .run_turn(TurnRequest::new("What is my longest run?", "abc123", "s1"))
            .await;

        assert_eq!(response.response_text, FALLBACK_RESPONSE);
        let error = response.error.unwrap();
        assert_eq!(error.code, "service_error");
        assert_eq!(error.node, Some(NodeId::Router));
        assert!(!response.response_text.contains("503"));
    }

    #[tokio::test]
    async fn test_classification_failure_code() {
        let (service, _) = service(
            ScriptedCompletion::new().on("Category:", "WEATHER"),
            ScriptedExecutor::succeeding(vec![]),
            false,
        );

        let response = service.run_turn(TurnRequest::new("hm", "abc123", "s1")).await;

        assert_eq!(response.response_text, CLASSIFICATION_FALLBACK);
        assert_eq!(response.error.unwrap().code, "classification_error");
    }

    #[tokio::test]
    async fn test_successful_turn_is_promoted() {
        let (service, store) = service(
            database_llm(),
            ScriptedExecutor::succeeding(vec![serde_json::json!({"max": 21100.0})]),
            true,
        );

        service
            .run_turn(TurnRequest::new("What is my longest run?", "abc123", "s1"))
            .await;

        let mut promoted = None;
        for _ in 0..50 {
            promoted = store.get("What is my longest run?");
            if promoted.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(promoted.unwrap().sql_text.as_deref(), Some(SCOPED_SQL));
    }

    #[tokio::test]
    async fn test_failed_query_is_not_promoted() {
        let (service, store) = service(
            database_llm().on("Corrected SQL:", SCOPED_SQL),
            ScriptedExecutor::always_failing("relation does not exist"),
            true,
        );

        let response = service
            .run_turn(TurnRequest::new("What is my longest run?", "abc123", "s1"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!response.execute_sql_status);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_known_good_round_trip() {
        let (service, _) = service(ScriptedCompletion::new(), ScriptedExecutor::succeeding(vec![]), false);

        service
            .store_known_good("How far did I ride in May?", Some("SELECT 1"))
            .await
            .unwrap();
        let hits = service.search_known_good("How far did I ride in May?").await.unwrap();

        assert_eq!(hits[0].sql_text, "SELECT 1");
    }
}
