use anyhow::Result;
use clap::Parser;
use sibyl_agent::{ResearchAgent, ResearchProgress};
use sibyl_app::wiring;
use sibyl_common::observability::init_logging;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An autonomous agent that researches a topic through AI search mode.
#[derive(Parser, Debug)]
#[command(name = "sibyl", version)]
struct Cli {
    /// The research topic.
    topic: String,

    /// Maximum number of search iterations (defaults to `research.max_iterations`).
    #[arg(short = 'i', long)]
    iterations: Option<usize>,

    /// Enable verbose debug logging.
    #[arg(long)]
    debug: bool,

    /// Configuration file (default: ./sibyl.yaml when present).
    #[arg(long, env = "SIBYL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "a critical error occurred");
            eprintln!("\nA critical error occurred: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = wiring::load_config(cli.config.as_deref())?;
    let log_path = init_logging(wiring::log_config("sibyl", &cfg.logging, cli.debug))?;
    tracing::debug!(path = %log_path.display(), "logging initialised");

    let chat = wiring::build_chat_client(&cfg.llm)?;
    let gateway = wiring::build_gateway(&cfg.search, cli.config.as_deref())?;
    let iterations = cli.iterations.unwrap_or(cfg.research.max_iterations);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", status_line(&event));
        }
    });

    let mut agent = ResearchAgent::new(chat, Arc::new(gateway)).with_progress(tx);
    let report = agent.run(&cli.topic, iterations).await;
    drop(agent);
    let _ = printer.await;
    let report = report?;

    let rule = "=".repeat(80);
    println!("\n\n{rule}");
    println!("{:^80}", "FINAL RESEARCH REPORT");
    println!("{rule}\n");
    println!("{report}");
    println!("\n{rule}");
    Ok(())
}

fn status_line(event: &ResearchProgress) -> String {
    match event {
        ResearchProgress::Iteration { current, max } => {
            format!("\n[STATUS] Research Iteration {current}/{max}...")
        }
        ResearchProgress::Searching { query } => {
            format!("[SEARCHING] AI is searching for: \"{query}\"")
        }
        ResearchProgress::Complete => {
            "[STATUS] Research phase complete. Generating final report...".to_string()
        }
        ResearchProgress::Stopped => {
            "[STATUS] AI provided a response without searching. Generating report from available data..."
                .to_string()
        }
        ResearchProgress::IterationsExhausted => {
            "\n[STATUS] Reached max search iterations. Generating final report...".to_string()
        }
    }
}
