use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use sibyl_app::{history, wiring};
use sibyl_common::observability::init_logging;
use sibyl_drivers::SibylDriver;
use sibyl_web::{AnswerCapture, CompletionDetector, Extractor};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Command {
    /// Ask a question and print the answer.
    Prompt,
    /// Start a new chat session.
    New,
}

/// Control AI search mode from the command line.
#[derive(Parser, Debug)]
#[command(name = "sibyl-search", version)]
struct Cli {
    #[arg(value_enum)]
    command: Command,

    /// The prompt text to send.
    #[arg(allow_hyphen_values = true)]
    text: Option<String>,

    /// Run in a visible browser window.
    #[arg(long)]
    headful: bool,

    /// Save the prompt and response to the history file.
    #[arg(long)]
    save: bool,

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
    if cli.command == Command::Prompt && cli.text.as_deref().is_none_or(str::is_empty) {
        use clap::CommandFactory;
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "the 'prompt' command requires a text argument",
            )
            .exit();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "operation failed; this could be a CAPTCHA, a slow network or a page structure change");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = wiring::load_config(cli.config.as_deref())?;
    init_logging(wiring::log_config("sibyl-search", &cfg.logging, cli.debug))?;

    let options = wiring::driver_options(&cfg.browser, cli.headful);
    if let Some(dir) = &options.profile_dir {
        tracing::info!(path = %dir.display(), "using profile directory");
    }
    let driver = SibylDriver::new(options).await?;

    let capture = AnswerCapture::new(
        driver.page(),
        wiring::capture_settings(&cfg.capture),
        Extractor::new(wiring::extractor_profile(&cfg.capture.extractor)),
        CompletionDetector::new(wiring::completion_options(&cfg.capture)),
    );

    let outcome = execute(&cli, &capture).await;
    if let Err(e) = driver.close().await {
        tracing::warn!(error = %format!("{e:#}"), "failed to close browser session");
    }
    let output = outcome?;
    println!("{output}");

    if cli.save && cli.command == Command::Prompt {
        let prompt = cli.text.as_deref().unwrap_or_default();
        match history::append_exchange(&cfg.browser.history_file, prompt, &output, chrono::Local::now()) {
            Ok(()) => tracing::info!(path = %cfg.browser.history_file.display(), "conversation saved"),
            Err(e) => tracing::error!(error = %e, "could not write to history file"),
        }
    }
    Ok(())
}

async fn execute(cli: &Cli, capture: &AnswerCapture) -> Result<String> {
    match cli.command {
        Command::Prompt => {
            let Some(text) = cli.text.as_deref() else {
                bail!("the 'prompt' command requires a text argument");
            };
            if cli.headful {
                tracing::info!("if a CAPTCHA appears, solve it in the browser window");
            }
            Ok(capture.search(text).await?)
        }
        Command::New => Ok(capture.new_chat().await?),
    }
}
