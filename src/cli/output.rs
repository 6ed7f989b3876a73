//! Rendering of turn responses and known-good hits for the terminal.

use std::io::{self, Write};

use anyhow::Result;

use crate::ai::TurnResponse;
use crate::retrieval::SimilarQuery;

/// Print a turn response in the selected output mode.
///
/// The answer goes to stdout; diagnostics (SQL, row counts) go to stderr so
/// they never mix with piped output.
pub fn print_response(response: &TurnResponse, json_mode: bool, quiet_mode: bool) -> Result<()> {
    let mut stdout = io::stdout();

    if json_mode {
        writeln!(stdout, "{}", serde_json::to_string(response)?)?;
        stdout.flush()?;
        return Ok(());
    }

    if !quiet_mode {
        for line in diagnostics(response) {
            eprintln!("{line}");
        }
    }

    writeln!(stdout, "{}", response.response_text)?;
    if !quiet_mode && !response.visualization_code.is_empty() {
        writeln!(stdout, "\n{}", response.visualization_code)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Bracketed status lines describing how the answer was produced.
pub fn diagnostics(response: &TurnResponse) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(error) = &response.error {
        match error.node {
            Some(node) => lines.push(format!("[error] {} at {}", error.code, node)),
            None => lines.push(format!("[error] {}", error.code)),
        }
        return lines;
    }

    if let Some(question_type) = response.question_type {
        lines.push(format!("[route] {question_type}"));
    }

    if !response.sql_query.is_empty() {
        lines.push(format!("[sql] {}", response.sql_query));
        if response.execute_sql_status {
            let rows = response.execute_sql_result.rows().len();
            let suffix = if response.execute_sql_result.is_truncated() {
                " (truncated)"
            } else {
                ""
            };
            lines.push(format!("[rows] {rows}{suffix}"));
        } else {
            lines.push("[rows] query failed".to_string());
        }
        if response.debug_counter > 0 {
            lines.push(format!("[debug] {} repair attempt(s)", response.debug_counter));
        }
    }

    if let Some(kind) = response.visualization_kind {
        lines.push(format!("[chart] {kind}"));
    }

    lines
}

/// Print known-good search hits.
pub fn print_hits(hits: &[SimilarQuery], json_mode: bool) -> Result<()> {
    let mut stdout = io::stdout();

    if json_mode {
        writeln!(stdout, "{}", serde_json::to_string(hits)?)?;
        return Ok(());
    }

    if hits.is_empty() {
        writeln!(stdout, "No similar questions on record.")?;
        return Ok(());
    }

    for hit in hits {
        writeln!(
            stdout,
            "{:.4}  {}\n        {}",
            hit.cosine_similarity, hit.question_text, hit.sql_text
        )?;
    }
    Ok(())
}
