//! CLI execution runner.

use std::path::Path;

use anyhow::{Context, Result};

use crate::ai::TurnRequest;

use super::args::KnownGoodCommand;
use super::bootstrap::CliContext;
use super::output::{print_hits, print_response};

/// Ask one question in the context's current session.
///
/// The response is printed even when the turn failed; the failure is then
/// returned as an error carrying its code.
pub async fn execute_once(ctx: &mut CliContext, question: &str) -> Result<()> {
    let scope = ctx.args.require_scope()?.to_string();
    let request = TurnRequest::new(question, scope, ctx.session_id.clone());

    let response = ctx.service.run_turn(request).await;
    print_response(&response, ctx.args.json, ctx.args.quiet)?;

    match response.error {
        Some(error) => Err(anyhow::anyhow!("Turn failed ({})", error.code)),
        None => Ok(()),
    }
}

/// Ask questions from a file, one per line, in a single session.
///
/// Lines starting with `#` are comments. Execution stops on the first failed turn.
pub async fn execute_batch(ctx: &mut CliContext, file_path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file_path)
        .await
        .with_context(|| format!("Failed to read question file: {}", file_path.display()))?;

    let questions = parse_batch(&content);
    if questions.is_empty() {
        anyhow::bail!("No questions found in file: {}", file_path.display());
    }

    let total = questions.len();
    if !ctx.args.quiet {
        eprintln!(
            "[batch] Asking {} question(s) from {}",
            total,
            file_path.display()
        );
    }

    for (i, question) in questions.iter().enumerate() {
        if !ctx.args.quiet {
            eprintln!("\n[batch] [{}/{}] {}", i + 1, total, truncate(question, 50));
        }

        execute_once(ctx, question).await?;
    }

    if !ctx.args.quiet {
        eprintln!("\n[batch] All {} question(s) answered", total);
    }

    Ok(())
}

/// Run a `known-good` subcommand.
pub async fn run_known_good(ctx: &CliContext, command: &KnownGoodCommand) -> Result<()> {
    match command {
        KnownGoodCommand::Add { question, sql } => {
            ctx.service
                .store_known_good(question, sql.as_deref())
                .await
                .context("Failed to store known-good question")?;
            if !ctx.args.quiet {
                eprintln!("[known-good] Stored: {}", truncate(question, 60));
            }
        }
        KnownGoodCommand::Search { question } => {
            let hits = ctx
                .service
                .search_known_good(question)
                .await
                .context("Failed to search known-good questions")?;
            print_hits(&hits, ctx.args.json)?;
        }
    }
    Ok(())
}

fn parse_batch(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Truncate a string for display
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
