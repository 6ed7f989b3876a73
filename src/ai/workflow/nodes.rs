//! One [`Node`] per step of a turn. Each node wraps a single agent call and
//! translates its result into a [`StatePatch`].

use std::sync::Arc;

use async_trait::async_trait;

use super::models::{Node, NodeError, NodeId};
use super::state::{ChatMessage, ConversationState, ExecuteSqlResult, StatePatch};
use crate::ai::agents::{
    BuildSqlAgent, DebugSqlAgent, GeneralAgent, ResponseSqlAgent, RetrievalAgent, RouterAgent,
    VisualizationAgent,
};
use crate::sql::guard::ensure_scoped;
use crate::sql::sandbox::{ExecutionOutcome, SqlExecutor};

pub struct RouterNode {
    agent: Arc<RouterAgent>,
}

impl RouterNode {
    pub fn new(agent: Arc<RouterAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for RouterNode {
    fn id(&self) -> NodeId {
        NodeId::Router
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let question = state
            .latest_user_message()
            .ok_or(NodeError::MissingInput("user message"))?
            .to_string();

        let question_type = self.agent.classify(&question).await?;
        tracing::info!("[turn] Classified question as {}", question_type);

        Ok(StatePatch::new()
            .with_user_question(question)
            .with_question_type(question_type))
    }
}

pub struct RespondGeneralNode {
    agent: Arc<GeneralAgent>,
}

impl RespondGeneralNode {
    pub fn new(agent: Arc<GeneralAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for RespondGeneralNode {
    fn id(&self) -> NodeId {
        NodeId::RespondGeneral
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let answer = self.agent.answer(&state.user_question).await?;
        Ok(StatePatch::new()
            .with_message(ChatMessage::assistant(answer.clone()))
            .with_response_text(answer)
            .with_visualization(None, ""))
    }
}

pub struct RetrieveNode {
    agent: Arc<RetrievalAgent>,
}

impl RetrieveNode {
    pub fn new(agent: Arc<RetrievalAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for RetrieveNode {
    fn id(&self) -> NodeId {
        NodeId::Retrieve
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let context = self.agent.retrieve_context(&state.user_question).await?;
        Ok(StatePatch::new().with_retrieved_context(context))
    }
}

pub struct BuildSqlNode {
    agent: Arc<BuildSqlAgent>,
}

impl BuildSqlNode {
    pub fn new(agent: Arc<BuildSqlAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for BuildSqlNode {
    fn id(&self) -> NodeId {
        NodeId::BuildSql
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let sql = self
            .agent
            .synthesize(
                &state.user_question,
                &state.scope_id,
                &state.retrieved_context,
            )
            .await?;
        tracing::debug!("[turn] Synthesized SQL: {}", sql);
        Ok(StatePatch::new().with_sql_query(sql))
    }
}

/// Runs the current SQL. Statements that read a table without mentioning the
/// turn's scope fail here without reaching the database.
pub struct ExecuteSqlNode {
    executor: Arc<dyn SqlExecutor>,
}

impl ExecuteSqlNode {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Node for ExecuteSqlNode {
    fn id(&self) -> NodeId {
        NodeId::ExecuteSql
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let outcome = match ensure_scoped(&state.sql_query, &state.scope_id) {
            Ok(()) => self.executor.execute(&state.sql_query).await,
            Err(violation) => ExecutionOutcome::Failed(violation.to_string()),
        };

        let patch = match outcome {
            ExecutionOutcome::Rows { rows, truncated } => {
                tracing::info!("[turn] Query returned {} rows", rows.len());
                StatePatch::new().with_execution(
                    true,
                    ExecuteSqlResult::Rows { rows, truncated },
                    Some(String::new()),
                )
            }
            ExecutionOutcome::Failed(error) => {
                tracing::warn!("[turn] Query failed: {}", error);
                StatePatch::new().with_execution(
                    false,
                    ExecuteSqlResult::placeholder(format!("Query failed: {error}")),
                    Some(error),
                )
            }
        };
        Ok(patch)
    }
}

pub struct DebugSqlNode {
    agent: Arc<DebugSqlAgent>,
}

impl DebugSqlNode {
    pub fn new(agent: Arc<DebugSqlAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for DebugSqlNode {
    fn id(&self) -> NodeId {
        NodeId::DebugSql
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let fixed = self
            .agent
            .debug(
                &state.user_question,
                &state.sql_query,
                &state.execute_sql_error,
            )
            .await?;
        tracing::info!(
            "[turn] Repair attempt {} produced: {}",
            state.debug_counter + 1,
            fixed
        );
        Ok(StatePatch::new().with_sql_query(fixed).bump_debug_counter())
    }
}

pub struct RespondSqlNode {
    agent: Arc<ResponseSqlAgent>,
}

impl RespondSqlNode {
    pub fn new(agent: Arc<ResponseSqlAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for RespondSqlNode {
    fn id(&self) -> NodeId {
        NodeId::RespondSql
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let text = self
            .agent
            .summarize(
                &state.user_question,
                state.execute_sql_status,
                &state.execute_sql_result,
                &state.sql_query,
            )
            .await?;
        Ok(StatePatch::new()
            .with_message(ChatMessage::assistant(text.clone()))
            .with_response_text(text))
    }
}

pub struct VisualizeNode {
    agent: Arc<VisualizationAgent>,
}

impl VisualizeNode {
    pub fn new(agent: Arc<VisualizationAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for VisualizeNode {
    fn id(&self) -> NodeId {
        NodeId::Visualize
    }

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        if !state.execute_sql_status {
            return Ok(StatePatch::new().with_visualization(None, ""));
        }

        let Some(kind) = self
            .agent
            .choose(&state.user_question, &state.sql_query)
            .await?
        else {
            return Ok(StatePatch::new().with_visualization(None, ""));
        };

        let code = self
            .agent
            .generate(
                &state.user_question,
                &state.sql_query,
                &state.execute_sql_result,
                kind,
            )
            .await?;
        Ok(StatePatch::new().with_visualization(Some(kind), code))
    }
}
