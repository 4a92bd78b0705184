use async_trait::async_trait;
use sibyl_common::Result;

use crate::chat::{Reply, ToolDescriptor, Turn};

/// A chat-completions capability: full history in, one assistant reply out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send `turns` with the given tool descriptors (empty means a tool-free
    /// request) and return the model's reply turn.
    ///
    /// Transport and API failures surface as `SibylError::Llm`.
    async fn complete(&self, turns: &[Turn], tools: &[ToolDescriptor]) -> Result<Reply>;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}
