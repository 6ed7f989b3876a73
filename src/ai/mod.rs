//! Conversational text-to-SQL assistant: model clients, agents and the turn engine.

pub mod agents;
pub mod embeddings;
pub mod llm_client;
pub mod normalize;
pub mod prompts;
pub mod retry;
pub mod turn_service;
pub mod workflow;

#[cfg(test)]
pub mod test_support;

pub use agents::{AgentError, AgentSet};
pub use turn_service::{TurnRequest, TurnResponse, TurnService};
pub use workflow::{TurnEngine, TurnError, TurnGraph};
