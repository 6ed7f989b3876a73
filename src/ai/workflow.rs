//! Turn engine built on graph-flow.
//!
//! Each turn is a walk over a fixed graph of [`Node`]s. Nodes read the
//! [`ConversationState`] stored in the graph-flow session context, return a
//! patch, and the [`TransitionPolicy`] picks the successor. Sessions are
//! checkpointed in a [`SessionStorage`] so the message log survives between
//! turns of the same session id.

pub mod checkpoint;
pub mod models;
pub mod nodes;
pub mod state;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use graph_flow::{
    Context, ExecutionStatus, FlowRunner, Graph, GraphBuilder, GraphError, NextAction, Session,
    SessionStorage, Task, TaskResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;

use self::checkpoint::{CheckpointLimits, CheckpointStorage};
use self::models::{Node, NodeError, NodeId, TransitionPolicy, EDGES};
use self::nodes::{
    BuildSqlNode, DebugSqlNode, ExecuteSqlNode, RespondGeneralNode, RespondSqlNode, RetrieveNode,
    RouterNode, VisualizeNode,
};
use self::state::{ConversationState, StatePatch};
use super::agents::{AgentError, AgentSet};
use crate::sql::sandbox::SqlExecutor;

/// Session storage used when none is supplied.
pub type WorkflowStorage = CheckpointStorage;

/// Context key holding the serialized [`ConversationState`].
pub const STATE_KEY: &str = "conversation_state";
const FAILURE_KEY: &str = "turn_failure";

/// Upper bound on node executions per turn.
const MAX_STEPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FailureKind {
    Classification,
    Service,
    Input,
    Routing,
}

/// Recorded in the session context when a node stops the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeFailure {
    node: NodeId,
    kind: FailureKind,
    message: String,
}

impl NodeFailure {
    fn from_node_error(node: NodeId, err: &NodeError) -> Self {
        let kind = match err {
            NodeError::Agent(AgentError::Classification(_)) => FailureKind::Classification,
            NodeError::Agent(AgentError::Service { .. }) => FailureKind::Service,
            NodeError::MissingInput(_) => FailureKind::Input,
        };
        Self {
            node,
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.node, self.message)
    }
}

/// Why a turn ended without a response.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Could not classify the question: {message}")]
    Classification { node: NodeId, message: String },

    #[error("{node} failed: {message}")]
    Service { node: NodeId, message: String },

    #[error("Session {0} already has a turn in progress")]
    SessionBusy(String),

    #[error("Workflow error: {0}")]
    Engine(String),
}

impl TurnError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Classification { .. } => "classification_error",
            TurnError::Service { .. } => "service_error",
            TurnError::SessionBusy(_) => "session_busy",
            TurnError::Engine(_) => "engine_error",
        }
    }

    /// Node that failed, if the failure came from one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            TurnError::Classification { node, .. } | TurnError::Service { node, .. } => Some(*node),
            _ => None,
        }
    }
}

impl From<NodeFailure> for TurnError {
    fn from(failure: NodeFailure) -> Self {
        match failure.kind {
            FailureKind::Classification => TurnError::Classification {
                node: failure.node,
                message: failure.message,
            },
            FailureKind::Service => TurnError::Service {
                node: failure.node,
                message: failure.message,
            },
            FailureKind::Input | FailureKind::Routing => TurnError::Engine(failure.to_string()),
        }
    }
}

fn engine_error(err: GraphError) -> TurnError {
    TurnError::Engine(err.to_string())
}

/// Adapts a [`Node`] to a graph-flow task.
struct NodeTask {
    node: Arc<dyn Node>,
    policy: TransitionPolicy,
}

impl NodeTask {
    async fn fail(&self, context: &Context, failure: NodeFailure) -> TaskResult {
        tracing::warn!("[turn] {}", failure);
        let message = failure.to_string();
        context.set(FAILURE_KEY, failure).await;
        TaskResult::new(Some(message), NextAction::End)
    }
}

#[async_trait]
impl Task for NodeTask {
    fn id(&self) -> &str {
        self.node.id().as_str()
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let id = self.node.id();
        let mut state: ConversationState = context.get(STATE_KEY).await.ok_or_else(|| {
            GraphError::TaskExecutionFailed(format!("{id} ran without conversation state"))
        })?;

        let patch = match self.node.run(&state).await {
            Ok(patch) => patch,
            Err(e) => return Ok(self.fail(&context, NodeFailure::from_node_error(id, &e)).await),
        };
        state.apply(patch);

        let next = match self.policy.next(id, &state) {
            Ok(next) => next,
            Err(e) => {
                let failure = NodeFailure {
                    node: id,
                    kind: FailureKind::Routing,
                    message: e.to_string(),
                };
                return Ok(self.fail(&context, failure).await);
            }
        };
        tracing::debug!("[turn] {} -> {}", id, next);

        let response = (next == NodeId::End).then(|| state.response_text.clone());
        context.set(STATE_KEY, state).await;

        let action = match next {
            NodeId::End => NextAction::End,
            other => NextAction::GoTo(other.as_str().to_string()),
        };
        Ok(TaskResult::new(response, action))
    }
}

/// The compiled turn graph.
#[derive(Clone)]
pub struct TurnGraph {
    graph: Arc<Graph>,
}

impl TurnGraph {
    /// Register one task per node. Branches are resolved by the policy, so
    /// only the unconditional edges are declared to graph-flow.
    pub fn build(
        agents: &AgentSet,
        executor: Arc<dyn SqlExecutor>,
        policy: TransitionPolicy,
    ) -> Self {
        let nodes: Vec<Arc<dyn Node>> = vec![
            Arc::new(RouterNode::new(agents.router.clone())),
            Arc::new(RespondGeneralNode::new(agents.general.clone())),
            Arc::new(RetrieveNode::new(agents.retrieval.clone())),
            Arc::new(BuildSqlNode::new(agents.build_sql.clone())),
            Arc::new(ExecuteSqlNode::new(executor)),
            Arc::new(DebugSqlNode::new(agents.debug_sql.clone())),
            Arc::new(RespondSqlNode::new(agents.response_sql.clone())),
            Arc::new(VisualizeNode::new(agents.visualization.clone())),
        ];

        let mut builder = GraphBuilder::new("kudos_turn");
        for node in nodes {
            builder = builder.add_task(Arc::new(NodeTask { node, policy }));
        }
        for (from, to, label) in EDGES {
            if label.is_none() && *to != NodeId::End {
                builder = builder.add_edge(from.as_str(), to.as_str());
            }
        }

        Self {
            graph: Arc::new(builder.build()),
        }
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.graph.clone()
    }

    /// Mermaid flowchart of the node graph.
    pub fn to_mermaid() -> String {
        let mut out = String::from("graph TD\n");
        out.push_str(&format!("    __start__ --> {}\n", NodeId::Router));
        for (from, to, label) in EDGES {
            let to = match to {
                NodeId::End => "__end__".to_string(),
                other => other.to_string(),
            };
            match label {
                Some(label) => out.push_str(&format!("    {from} -->|{label}| {to}\n")),
                None => out.push_str(&format!("    {from} --> {to}\n")),
            }
        }
        out
    }
}

/// Removes the session from the in-flight set when dropped.
struct InFlight<'a> {
    sessions: &'a DashMap<String, ()>,
    session_id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(sessions: &'a DashMap<String, ()>, session_id: &str) -> Option<Self> {
        match sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    sessions,
                    session_id: session_id.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.sessions.remove(&self.session_id);
    }
}

/// Runs turns over a [`TurnGraph`], one at a time per session id.
pub struct TurnEngine {
    runner: FlowRunner,
    storage: Arc<dyn SessionStorage + Send + Sync>,
    checkpoints: Option<Arc<CheckpointStorage>>,
    in_flight: DashMap<String, ()>,
}

impl TurnEngine {
    pub fn new(graph: &TurnGraph, storage: Arc<dyn SessionStorage + Send + Sync>) -> Self {
        Self {
            runner: FlowRunner::new(graph.graph(), storage.clone()),
            storage,
            checkpoints: None,
            in_flight: DashMap::new(),
        }
    }

    pub fn new_in_memory(graph: &TurnGraph) -> Self {
        Self::with_limits(graph, CheckpointLimits::default())
    }

    /// In-memory checkpoints bounded by idle time and session count.
    pub fn with_limits(graph: &TurnGraph, limits: CheckpointLimits) -> Self {
        let checkpoints = Arc::new(WorkflowStorage::new(limits));
        let storage: Arc<dyn SessionStorage + Send + Sync> = checkpoints.clone();
        Self {
            checkpoints: Some(checkpoints),
            ..Self::new(graph, storage)
        }
    }

    /// Run one turn to completion and return the final state.
    ///
    /// `initial` must carry the user message for this turn. The message log of
    /// a previous turn under the same `session_id` is carried over; every other
    /// field starts fresh.
    pub async fn execute(
        &self,
        initial: StatePatch,
        session_id: &str,
    ) -> Result<ConversationState, TurnError> {
        let _guard = InFlight::acquire(&self.in_flight, session_id)
            .ok_or_else(|| TurnError::SessionBusy(session_id.to_string()))?;

        let span = tracing::info_span!("turn", session_id = %session_id);
        self.run_turn(initial, session_id).instrument(span).await
    }

    async fn run_turn(
        &self,
        initial: StatePatch,
        session_id: &str,
    ) -> Result<ConversationState, TurnError> {
        let history = self
            .snapshot(session_id)
            .await?
            .map(|state| state.messages)
            .unwrap_or_default();

        let mut state = ConversationState::for_new_turn(history);
        state.apply(initial);

        let session = Session::new_from_task(session_id.to_string(), NodeId::Router.as_str());
        session.context.set(STATE_KEY, state).await;
        self.storage.save(session).await.map_err(engine_error)?;

        for _ in 0..MAX_STEPS {
            let result = self.runner.run(session_id).await.map_err(engine_error)?;
            match result.status {
                ExecutionStatus::Paused { .. } => continue,
                ExecutionStatus::Completed => return self.finish(session_id).await,
                ExecutionStatus::WaitingForInput => {
                    return Err(TurnError::Engine("Turn paused waiting for input".to_string()));
                }
                ExecutionStatus::Error(e) => return Err(TurnError::Engine(e)),
            }
        }

        Err(TurnError::Engine(format!(
            "Turn did not finish within {MAX_STEPS} steps"
        )))
    }

    async fn finish(&self, session_id: &str) -> Result<ConversationState, TurnError> {
        let session = self
            .storage
            .get(session_id)
            .await
            .map_err(engine_error)?
            .ok_or_else(|| TurnError::Engine(format!("Session {session_id} vanished")))?;

        if let Some(failure) = session.context.get::<NodeFailure>(FAILURE_KEY).await {
            return Err(failure.into());
        }

        session
            .context
            .get::<ConversationState>(STATE_KEY)
            .await
            .ok_or_else(|| TurnError::Engine("Turn finished without state".to_string()))
    }

    /// Last checkpointed state of a session.
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<ConversationState>, TurnError> {
        let Some(session) = self.storage.get(session_id).await.map_err(engine_error)? else {
            return Ok(None);
        };
        Ok(session.context.get::<ConversationState>(STATE_KEY).await)
    }

    /// Drop a session's checkpoint.
    pub async fn forget(&self, session_id: &str) -> Result<(), TurnError> {
        self.storage.delete(session_id).await.map_err(engine_error)
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.in_flight.contains_key(session_id)
    }

    /// Drop idle checkpoints; a no-op for externally supplied storage.
    pub fn purge_expired(&self) -> usize {
        self.checkpoints
            .as_ref()
            .map_or(0, |checkpoints| checkpoints.purge_expired())
    }
}
