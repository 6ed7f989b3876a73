//! kudos CLI - ask questions about your activity data from the terminal
//!
//! # Usage
//!
//! ```bash
//! # Ask a single question
//! kudos-cli --scope abc123 -e "What is my longest run?"
//!
//! # JSON output for scripting
//! kudos-cli --scope abc123 -e "How many rides this year?" --json | jq .
//!
//! # Questions from a file, one per line
//! kudos-cli --scope abc123 -f questions.txt
//!
//! # Interactive REPL mode (when no -e or -f provided)
//! kudos-cli --scope abc123
//!
//! # Curate known-good questions
//! kudos-cli known-good add "How far did I run last week?" --sql "SELECT ..."
//! kudos-cli known-good search "distance last week"
//!
//! # Print the turn graph
//! kudos-cli graph
//! ```

use anyhow::Result;
use clap::Parser;

use kudos_lib::ai::TurnGraph;
use kudos_lib::cli::{
    execute_batch, execute_once, initialize, run_known_good, run_repl, Args, Command,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The graph shape does not depend on settings or credentials
    if matches!(args.command, Some(Command::Graph)) {
        println!("{}", TurnGraph::to_mermaid());
        return Ok(());
    }

    let mut ctx = initialize(&args).await?;

    #[cfg(feature = "server")]
    if args.server {
        let (addr, shutdown) =
            kudos_lib::cli::server::start_server(args.port, ctx.service.clone()).await?;
        eprintln!("[cli] Serving on http://{}", addr);
        tokio::signal::ctrl_c().await?;
        shutdown.cancel();
        return ctx.shutdown().await;
    }

    let result = match &args.command {
        Some(Command::KnownGood(command)) => run_known_good(&ctx, command).await,
        _ => {
            if let Some(ref question) = args.execute {
                execute_once(&mut ctx, question).await
            } else if let Some(ref file) = args.file {
                execute_batch(&mut ctx, file).await
            } else {
                run_repl(&mut ctx).await
            }
        }
    };

    ctx.shutdown().await?;

    result
}
