//! kudos: a conversational assistant that answers questions about a user's
//! activity data by generating, sandboxing and explaining SQL.
//!
//! A turn flows through a fixed graph of nodes: the question is classified,
//! general questions are answered directly, and database questions retrieve
//! similar known-good queries, generate scoped SQL, execute it (with bounded
//! repair on failure), explain the rows and optionally suggest a chart.
//!
//! The main entry point is [`ai::TurnService`].

pub mod ai;
#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod retrieval;
pub mod settings;
pub mod sql;

pub use ai::{TurnEngine, TurnError, TurnGraph, TurnRequest, TurnResponse, TurnService};
pub use error::{KudosError, Result};
pub use retrieval::{KnownGoodQuery, KnownGoodStore, SimilarQuery};
pub use settings::{KudosSettings, SettingsManager};
