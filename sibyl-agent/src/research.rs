//! The research loop: let the model search until it is satisfied, then ask
//! it for a report built from everything it found.

use crate::gateway::SearchTool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sibyl_common::Result;
use sibyl_llm::chat::{Conversation, Reply, ToolCall, ToolDescriptor, Turn};
use sibyl_llm::traits::ChatClient;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Token the model sends once it has gathered enough material.
pub const COMPLETION_SENTINEL: &str = "RESEARCH_COMPLETE";
pub const SEARCH_TOOL_NAME: &str = "search_google";
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const NO_RESEARCH_REPORT: &str = "No research was conducted. Could not generate a report.";
pub const INVALID_ARGUMENTS: &str = "Error: Invalid arguments format.";

const RESEARCHER_PROMPT: &str = "You are an expert research assistant. Your goal is to gather \
comprehensive information about the user's topic. Think step-by-step. First, formulate a search \
query to start. Then, use the `search_google` tool to find information. Analyze the results, and \
decide if you need more information. If so, formulate a new, more specific query to dig deeper or \
explore a new angle. When you are confident you have enough information to write a detailed \
report, respond with the final message 'RESEARCH_COMPLETE' and nothing else.";

const REPORT_PROMPT: &str = "You are a report writing expert. You have been provided with a series \
of research queries and their corresponding results in JSON format. Your task is to synthesize all \
of this information into a single, well-structured report. The report must follow this format \
exactly:\n\n\
1.  **TL;DR:** A brief, concise summary (2-4 sentences) of the most critical findings.\n\
2.  **Detailed Findings:** A comprehensive section that elaborates on the information discovered. \
Use markdown for formatting (e.g., headings, bullet points) to organize the content clearly. \
Synthesize information from different searches where appropriate.";

/// One executed search and what it returned (diagnostics included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchEntry {
    pub query: String,
    pub result: String,
}

/// Arguments of a `search_google` call.
#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

/// Milestones reported while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchProgress {
    Iteration { current: usize, max: usize },
    Searching { query: String },
    /// The model sent the completion sentinel.
    Complete,
    /// The model answered without searching or finishing.
    Stopped,
    IterationsExhausted,
}

/// Why the search phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Sentinel,
    Implicit,
    Exhausted,
}

pub fn search_tool_descriptor() -> ToolDescriptor {
    ToolDescriptor::function(
        SEARCH_TOOL_NAME,
        "Searches Google using its AI mode to find information on a given topic or question.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The specific search query or question."
                }
            },
            "required": ["query"]
        }),
    )
}

pub struct ResearchAgent {
    chat: Arc<dyn ChatClient>,
    search: Arc<dyn SearchTool>,
    tools: Vec<ToolDescriptor>,
    progress: Option<UnboundedSender<ResearchProgress>>,
    conversation: Conversation,
    entries: Vec<ResearchEntry>,
}

impl ResearchAgent {
    pub fn new(chat: Arc<dyn ChatClient>, search: Arc<dyn SearchTool>) -> Self {
        Self {
            chat,
            search,
            tools: vec![search_tool_descriptor()],
            progress: None,
            conversation: Conversation::default(),
            entries: Vec::new(),
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ResearchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Entries gathered by the current or last run.
    pub fn entries(&self) -> &[ResearchEntry] {
        &self.entries
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Research `topic` with at most `max_iterations` model turns, then write
    /// the report. Only chat failures are errors.
    pub async fn run(&mut self, topic: &str, max_iterations: usize) -> Result<String> {
        tracing::info!(target: "research", %topic, max_iterations, model = self.chat.model_name(), "starting research task");

        self.entries.clear();
        self.conversation = Conversation::seeded(
            RESEARCHER_PROMPT,
            format!("Please research the following topic: {topic}"),
        );

        let exit = self.search_phase(max_iterations).await?;
        match exit {
            Exit::Sentinel => {
                tracing::info!(target: "research", "model signalled research is complete");
                self.notify(ResearchProgress::Complete);
            }
            Exit::Implicit => {
                tracing::warn!(target: "research", "model neither searched nor finished; ending research");
                self.notify(ResearchProgress::Stopped);
            }
            Exit::Exhausted => {
                tracing::warn!(target: "research", "reached max iterations");
                self.notify(ResearchProgress::IterationsExhausted);
            }
        }

        self.write_report().await
    }

    async fn search_phase(&mut self, max_iterations: usize) -> Result<Exit> {
        for i in 1..=max_iterations {
            tracing::info!(target: "research", iteration = i, max_iterations, "research iteration");
            self.notify(ResearchProgress::Iteration {
                current: i,
                max: max_iterations,
            });

            let reply = self
                .chat
                .complete(self.conversation.turns(), &self.tools)
                .await?;
            let calls = reply.tool_calls.clone();
            let said_done = reply.content_str().contains(COMPLETION_SENTINEL);
            self.conversation.push(Turn::from(reply));

            if !calls.is_empty() {
                tracing::info!(target: "research", calls = calls.len(), "model requested tool calls");
                for call in &calls {
                    self.execute_tool_call(call).await;
                }
            } else if said_done {
                return Ok(Exit::Sentinel);
            } else {
                return Ok(Exit::Implicit);
            }
        }
        Ok(Exit::Exhausted)
    }

    async fn execute_tool_call(&mut self, call: &ToolCall) {
        let arguments = match call.parse_arguments::<Value>() {
            Ok(arguments) => arguments,
            Err(e) => return self.reject_arguments(call, e),
        };

        if call.name() != SEARCH_TOOL_NAME {
            tracing::error!(target: "research", function = call.name(), "model tried to call an unknown function");
            let result = format!("Error: Unknown tool '{}'.", call.name());
            self.conversation.push(Turn::tool_result(call, result));
            return;
        }

        let args: SearchArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return self.reject_arguments(call, e),
        };

        tracing::info!(target: "research", function = call.name(), query = %args.query, "model wants to call a tool");
        self.notify(ResearchProgress::Searching {
            query: args.query.clone(),
        });

        let result = self.search.run_search(&args.query).await;
        self.entries.push(ResearchEntry {
            query: args.query,
            result: result.clone(),
        });
        self.conversation.push(Turn::tool_result(call, result));
    }

    fn reject_arguments(&mut self, call: &ToolCall, error: serde_json::Error) {
        tracing::error!(
            target: "research",
            error = %error,
            function = call.name(),
            arguments = %call.function.arguments,
            "failed to decode tool arguments"
        );
        self.conversation
            .push(Turn::tool_result(call, INVALID_ARGUMENTS));
    }

    async fn write_report(&self) -> Result<String> {
        if self.entries.is_empty() {
            return Ok(NO_RESEARCH_REPORT.to_string());
        }
        tracing::info!(target: "research", entries = self.entries.len(), "generating final report");

        let findings = serde_json::to_string_pretty(&self.entries)?;
        let turns = [Turn::system(REPORT_PROMPT), Turn::user(findings)];
        let reply: Reply = self.chat.complete(&turns, &[]).await?;

        tracing::info!(target: "research", "final report generated");
        Ok(reply.content.unwrap_or_default())
    }

    fn notify(&self, event: ResearchProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}
