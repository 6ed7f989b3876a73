//! Lightweight REPL for kudos-cli.
//!
//! Used when no question is provided via `-e` or `-f`. Commands:
//! - `/quit`, `/exit`, `/q` - Exit the REPL
//! - `/new` - Start a new conversation (fresh session id)
//!
//! Any other input is asked as a question in the current session.

use std::io::{self, BufRead, Write};

use anyhow::Result;

use super::bootstrap::CliContext;
use super::runner::execute_once;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Quit,
    NewSession,
    /// Unknown slash command (will show help)
    Unknown(String),
    Question(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }

        if trimmed.starts_with('/') {
            match trimmed.to_lowercase().as_str() {
                "/quit" | "/exit" | "/q" => ReplCommand::Quit,
                "/new" => ReplCommand::NewSession,
                _ => ReplCommand::Unknown(trimmed.to_string()),
            }
        } else {
            ReplCommand::Question(trimmed.to_string())
        }
    }
}

/// Run an interactive session until `/quit` or EOF.
pub async fn run_repl(ctx: &mut CliContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    eprintln!("kudos-cli interactive mode (session {})", ctx.session_id);
    eprintln!("Type /new for a new conversation, /quit to exit\n");

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            eprintln!("\nGoodbye!");
            break;
        }

        match ReplCommand::parse(&input) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => {
                eprintln!("Goodbye!");
                break;
            }
            ReplCommand::NewSession => {
                let id = ctx.new_session();
                eprintln!("Started session {}", id);
            }
            ReplCommand::Unknown(cmd) => {
                eprintln!("Unknown command: {}", cmd);
                eprintln!("Available: /new, /quit, /exit, /q");
            }
            ReplCommand::Question(question) => {
                if let Err(e) = execute_once(ctx, &question).await {
                    eprintln!("Error: {}", e);
                }
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quit_aliases_case_insensitive() {
        for input in ["/quit", "/exit", "/q", "/QUIT", "  /Exit  ", "/quit\n"] {
            assert_eq!(ReplCommand::parse(input), ReplCommand::Quit, "{input:?}");
        }
    }

    #[test]
    fn parses_new_session() {
        assert_eq!(ReplCommand::parse("/new"), ReplCommand::NewSession);
        assert_eq!(ReplCommand::parse("/NEW\n"), ReplCommand::NewSession);
    }

    #[test]
    fn parses_unknown_slash_command() {
        assert_eq!(
            ReplCommand::parse("/help"),
            ReplCommand::Unknown("/help".to_string())
        );
    }

    #[test]
    fn parses_question_with_slash_in_middle() {
        assert_eq!(
            ReplCommand::parse("runs in 2024/2025?"),
            ReplCommand::Question("runs in 2024/2025?".to_string())
        );
    }

    #[test]
    fn parses_empty_input() {
        assert_eq!(ReplCommand::parse(""), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("\t\n"), ReplCommand::Empty);
    }

    #[test]
    fn trims_whitespace_from_question() {
        assert_eq!(
            ReplCommand::parse("  longest run?  \n"),
            ReplCommand::Question("longest run?".to_string())
        );
    }
}
