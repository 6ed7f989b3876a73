//! CLI argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// kudos CLI - ask questions about your activity data
#[derive(Parser, Debug, Clone)]
#[command(name = "kudos-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Ask a single question and exit
    #[arg(short = 'e', long, conflicts_with = "file")]
    pub execute: Option<String>,

    /// Ask questions from a file (one per line, `#` for comments) and exit
    #[arg(short = 'f', long, conflicts_with = "execute")]
    pub file: Option<PathBuf>,

    /// Scope id bound into every generated query
    #[arg(short = 's', long, env = "KUDOS_SCOPE_ID")]
    pub scope: Option<String>,

    /// Session id (defaults to a fresh UUID)
    #[arg(long)]
    pub session: Option<String>,

    /// Settings file (default: ~/.kudos/settings.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Override AI provider from settings
    ///
    /// Options: gemini, openai
    #[arg(short = 'p', long)]
    pub provider: Option<String>,

    /// Override model from settings
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// API key (overrides settings and env vars)
    #[arg(long, env = "KUDOS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output responses as JSON lines (for scripting/parsing)
    #[arg(long)]
    pub json: bool,

    /// Only output the answer text
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Serve the HTTP API instead of answering locally
    #[cfg(feature = "server")]
    #[arg(long)]
    pub server: bool,

    /// Port for --server (0 picks a free port)
    #[cfg(feature = "server")]
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Manage the known-good question/SQL store
    #[command(subcommand)]
    KnownGood(KnownGoodCommand),

    /// Print the turn graph as a Mermaid flowchart
    Graph,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum KnownGoodCommand {
    /// Store a question, optionally with its validated SQL
    Add {
        question: String,

        #[arg(long)]
        sql: Option<String>,
    },

    /// Show the stored questions most similar to a question
    Search { question: String },
}

impl Args {
    /// The scope id, or an error explaining how to provide one.
    pub fn require_scope(&self) -> anyhow::Result<&str> {
        self.scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("A scope id is required: pass --scope or set KUDOS_SCOPE_ID"))
    }

    pub fn session_id(&self) -> String {
        self.session
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::parse_from(["kudos-cli"]);
        assert!(args.command.is_none());
        assert!(args.execute.is_none());
        assert!(!args.json);
        assert!(!args.quiet);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_execute_with_scope() {
        let args = Args::parse_from(["kudos-cli", "-e", "What is my longest run?", "--scope", "abc123"]);
        assert_eq!(args.execute.as_deref(), Some("What is my longest run?"));
        assert_eq!(args.require_scope().unwrap(), "abc123");
    }

    #[test]
    fn test_execute_conflicts_with_file() {
        let result = Args::try_parse_from(["kudos-cli", "-e", "hi", "-f", "questions.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_scope_is_rejected() {
        let args = Args::parse_from(["kudos-cli", "--scope", "  "]);
        assert!(args.require_scope().is_err());
    }

    #[test]
    fn test_session_id_defaults_to_uuid() {
        let args = Args::parse_from(["kudos-cli"]);
        assert_eq!(args.session_id().len(), 36);

        let args = Args::parse_from(["kudos-cli", "--session", "s1"]);
        assert_eq!(args.session_id(), "s1");
    }

    #[test]
    fn test_known_good_subcommands() {
        let args = Args::parse_from([
            "kudos-cli",
            "known-good",
            "add",
            "How far did I run?",
            "--sql",
            "SELECT 1",
        ]);
        assert_eq!(
            args.command,
            Some(Command::KnownGood(KnownGoodCommand::Add {
                question: "How far did I run?".to_string(),
                sql: Some("SELECT 1".to_string()),
            }))
        );

        let args = Args::parse_from(["kudos-cli", "known-good", "search", "run"]);
        assert_eq!(
            args.command,
            Some(Command::KnownGood(KnownGoodCommand::Search {
                question: "run".to_string()
            }))
        );
    }

    #[test]
    fn test_args_output_modes() {
        let args = Args::parse_from(["kudos-cli", "--json", "--quiet"]);
        assert!(args.json);
        assert!(args.quiet);
    }
}
