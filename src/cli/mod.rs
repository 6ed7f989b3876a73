//! Command-line surface for kudos.
//!
//! ```text
//! +-----------+     +--------------+     +-------------+     +-----------+
//! | args.rs   | --> | bootstrap.rs | --> | TurnService | --> | output.rs |
//! | (clap)    |     | (settings,   |     | (one turn)  |     | (print or |
//! |           |     |  logging)    |     |             |     |  JSON)    |
//! +-----------+     +--------------+     +-------------+     +-----------+
//! ```
//!
//! # REPL Mode
//!
//! When no question is provided via `-e` or `-f`, the CLI enters
//! interactive REPL mode. See `repl.rs` for details.

mod args;
mod bootstrap;
mod output;
mod repl;
mod runner;

#[cfg(feature = "server")]
pub mod server;

pub use args::{Args, Command, KnownGoodCommand};
pub use bootstrap::{build_service, initialize, CliContext};
pub use output::{print_hits, print_response};
pub use repl::run_repl;
pub use runner::{execute_batch, execute_once, run_known_good};
