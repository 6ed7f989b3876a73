//! Core types of the turn state machine: node identifiers, the node trait and
//! the exhaustive transition function.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{ConversationState, QuestionType, StatePatch};
use crate::ai::agents::AgentError;

/// Default number of automatic SQL repairs per turn.
pub const DEFAULT_MAX_DEBUG_ATTEMPTS: u32 = 1;

/// Steps of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Router,
    RespondGeneral,
    Retrieve,
    BuildSql,
    ExecuteSql,
    DebugSql,
    RespondSql,
    Visualize,
    End,
}

impl NodeId {
    /// Every executable node (excludes [`NodeId::End`]).
    pub const EXECUTABLE: [NodeId; 8] = [
        NodeId::Router,
        NodeId::RespondGeneral,
        NodeId::Retrieve,
        NodeId::BuildSql,
        NodeId::ExecuteSql,
        NodeId::DebugSql,
        NodeId::RespondSql,
        NodeId::Visualize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Router => "router",
            NodeId::RespondGeneral => "respond_general",
            NodeId::Retrieve => "retrieve",
            NodeId::BuildSql => "build_sql",
            NodeId::ExecuteSql => "execute_sql",
            NodeId::DebugSql => "debug_sql",
            NodeId::RespondSql => "respond_sql",
            NodeId::Visualize => "visualize",
            NodeId::End => "end",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node could not produce a patch.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("missing input: {0}")]
    MissingInput(&'static str),
}

/// Why no successor could be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("router finished without a question type")]
    MissingQuestionType,

    #[error("no transition out of the terminal node")]
    FromTerminal,
}

/// A step of the turn: reads the state, returns a patch.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    async fn run(&self, state: &ConversationState) -> Result<StatePatch, NodeError>;
}

/// Chooses the successor of a node from the state after its patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub max_debug_attempts: u32,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            max_debug_attempts: DEFAULT_MAX_DEBUG_ATTEMPTS,
        }
    }
}

impl TransitionPolicy {
    pub fn new(max_debug_attempts: u32) -> Self {
        Self { max_debug_attempts }
    }

    pub fn next(&self, from: NodeId, state: &ConversationState) -> Result<NodeId, RouteError> {
        let next = match from {
            NodeId::Router => match state.question_type {
                Some(QuestionType::General) => NodeId::RespondGeneral,
                Some(QuestionType::Database) => NodeId::Retrieve,
                None => return Err(RouteError::MissingQuestionType),
            },
            NodeId::RespondGeneral => NodeId::End,
            NodeId::Retrieve => NodeId::BuildSql,
            NodeId::BuildSql => NodeId::ExecuteSql,
            NodeId::ExecuteSql => {
                if state.execute_sql_status || state.debug_counter >= self.max_debug_attempts {
                    NodeId::RespondSql
                } else {
                    NodeId::DebugSql
                }
            }
            NodeId::DebugSql => NodeId::ExecuteSql,
            NodeId::RespondSql => NodeId::Visualize,
            NodeId::Visualize => NodeId::End,
            NodeId::End => return Err(RouteError::FromTerminal),
        };
        Ok(next)
    }
}

/// Static edges of the state machine, with the condition label if any.
pub const EDGES: &[(NodeId, NodeId, Option<&str>)] = &[
    (NodeId::Router, NodeId::RespondGeneral, Some("GENERAL")),
    (NodeId::Router, NodeId::Retrieve, Some("DATABASE")),
    (NodeId::RespondGeneral, NodeId::End, None),
    (NodeId::Retrieve, NodeId::BuildSql, None),
    (NodeId::BuildSql, NodeId::ExecuteSql, None),
    (NodeId::ExecuteSql, NodeId::RespondSql, Some("success or retries spent")),
    (NodeId::ExecuteSql, NodeId::DebugSql, Some("failed")),
    (NodeId::DebugSql, NodeId::ExecuteSql, None),
    (NodeId::RespondSql, NodeId::Visualize, None),
    (NodeId::Visualize, NodeId::End, None),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(f: impl FnOnce(&mut ConversationState)) -> ConversationState {
        let mut state = ConversationState::default();
        f(&mut state);
        state
    }

    #[test]
    fn test_router_branches_on_question_type() {
        let policy = TransitionPolicy::default();
        let general = state_with(|s| s.question_type = Some(QuestionType::General));
        let database = state_with(|s| s.question_type = Some(QuestionType::Database));

        assert_eq!(policy.next(NodeId::Router, &general), Ok(NodeId::RespondGeneral));
        assert_eq!(policy.next(NodeId::Router, &database), Ok(NodeId::Retrieve));
        assert_eq!(
            policy.next(NodeId::Router, &ConversationState::default()),
            Err(RouteError::MissingQuestionType)
        );
    }

    #[test]
    fn test_execute_routes_to_debug_until_budget_spent() {
        let policy = TransitionPolicy::default();
        let failed = state_with(|s| s.execute_sql_status = false);
        let failed_after_debug = state_with(|s| s.debug_counter = 1);
        let succeeded = state_with(|s| s.execute_sql_status = true);

        assert_eq!(policy.next(NodeId::ExecuteSql, &failed), Ok(NodeId::DebugSql));
        assert_eq!(policy.next(NodeId::ExecuteSql, &failed_after_debug), Ok(NodeId::RespondSql));
        assert_eq!(policy.next(NodeId::ExecuteSql, &succeeded), Ok(NodeId::RespondSql));
    }

    #[test]
    fn test_larger_budget_allows_more_repairs() {
        let policy = TransitionPolicy::new(3);
        let failed_twice = state_with(|s| s.debug_counter = 2);
        assert_eq!(policy.next(NodeId::ExecuteSql, &failed_twice), Ok(NodeId::DebugSql));

        let zero = TransitionPolicy::new(0);
        assert_eq!(
            zero.next(NodeId::ExecuteSql, &ConversationState::default()),
            Ok(NodeId::RespondSql)
        );
    }

    #[test]
    fn test_unconditional_edges_and_terminal() {
        let policy = TransitionPolicy::default();
        let state = ConversationState::default();
        assert_eq!(policy.next(NodeId::Retrieve, &state), Ok(NodeId::BuildSql));
        assert_eq!(policy.next(NodeId::BuildSql, &state), Ok(NodeId::ExecuteSql));
        assert_eq!(policy.next(NodeId::DebugSql, &state), Ok(NodeId::ExecuteSql));
        assert_eq!(policy.next(NodeId::RespondSql, &state), Ok(NodeId::Visualize));
        assert_eq!(policy.next(NodeId::Visualize, &state), Ok(NodeId::End));
        assert_eq!(policy.next(NodeId::RespondGeneral, &state), Ok(NodeId::End));
        assert_eq!(policy.next(NodeId::End, &state), Err(RouteError::FromTerminal));
    }

    #[test]
    fn test_every_transition_is_a_declared_edge() {
        let policy = TransitionPolicy::default();
        let samples = [
            state_with(|s| s.question_type = Some(QuestionType::General)),
            state_with(|s| s.question_type = Some(QuestionType::Database)),
            state_with(|s| s.execute_sql_status = true),
            state_with(|s| s.debug_counter = 1),
            ConversationState::default(),
        ];

        for node in NodeId::EXECUTABLE {
            for state in &samples {
                if let Ok(next) = policy.next(node, state) {
                    assert!(
                        EDGES.iter().any(|(from, to, _)| *from == node && *to == next),
                        "{node} -> {next} is not declared"
                    );
                }
            }
        }
    }
}
