//! The `search_google` tool: run the capture binary out of process.
//!
//! Every failure becomes a diagnostic string returned as the tool result, so
//! the research loop can hand it to the model instead of aborting.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(180);

/// A search that always yields text.
#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn run_search(&self, query: &str) -> String;
}

/// Runs `program args… <query>` and returns its trimmed stdout.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ProcessGateway {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Arguments placed before the query.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self, query: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(query)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SearchTool for ProcessGateway {
    async fn run_search(&self, query: &str) -> String {
        let program = self.program.display().to_string();
        tracing::info!(target: "gateway", %query, %program, "executing search tool");

        let output = match timeout(self.timeout, self.command(query).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return failure(format!("Error: The search command '{program}' was not found."));
            }
            Ok(Err(e)) => {
                return failure(format!(
                    "Error: Failed to launch the search command '{program}': {e}"
                ));
            }
            Err(_) => {
                return failure(format!(
                    "Error: The search command timed out after {} seconds.",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let reason = match output.status.code() {
                Some(code) => format!("failed with exit code {code}"),
                None => "was terminated by a signal".to_string(),
            };
            return failure(format!(
                "Error: The search command {reason}.\nStderr: {}",
                stderr.trim()
            ));
        }

        tracing::debug!(target: "gateway", stdout = %stdout, "search tool raw stdout");
        if !stderr.trim().is_empty() {
            tracing::warn!(target: "gateway", stderr = %stderr.trim(), "search tool wrote to stderr");
        }
        stdout.trim().to_string()
    }
}

fn failure(message: String) -> String {
    tracing::error!(target: "gateway", "{message}");
    message
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessGateway {
        ProcessGateway::new("sh").with_args(["-c", script, "sh"])
    }

    #[tokio::test]
    async fn query_is_passed_as_last_argument() {
        let out = sh(r#"printf '  result for %s\n' "$1""#)
            .run_search("rust ownership")
            .await;
        assert_eq!(out, "result for rust ownership");
    }

    #[tokio::test]
    async fn stderr_on_success_is_not_part_of_the_result() {
        let out = sh("echo warming up >&2; echo answer").run_search("q").await;
        assert_eq!(out, "answer");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let out = sh("echo 'captcha shown' >&2; exit 3").run_search("q").await;
        assert_eq!(
            out,
            "Error: The search command failed with exit code 3.\nStderr: captcha shown"
        );
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let out = ProcessGateway::new("/nonexistent/sibyl-search")
            .run_search("q")
            .await;
        assert_eq!(
            out,
            "Error: The search command '/nonexistent/sibyl-search' was not found."
        );
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let out = sh("sleep 5")
            .with_timeout(Duration::from_secs(1))
            .run_search("q")
            .await;
        assert_eq!(out, "Error: The search command timed out after 1 seconds.");
    }
}
