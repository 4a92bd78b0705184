//! Chat-completions integration for Sibyl.
//!
//! This crate exposes the conversation model ([`chat`]), the provider-agnostic
//! [`traits::ChatClient`] interface, and an OpenAI-compatible implementation
//! that works against hosted endpoints and local gateways alike.
//!
//! # Examples
//! ```no_run
//! use sibyl_llm::chat::Turn;
//! use sibyl_llm::openai::OpenAiChatClient;
//! use sibyl_llm::traits::ChatClient;
//!
//! # #[tokio::main]
//! # async fn main() -> sibyl_common::Result<()> {
//! let client = OpenAiChatClient::new("http://localhost:2048/v1", "123456", "gemini-2.5-pro")?;
//! let reply = client.complete(&[Turn::user("Say OK")], &[]).await?;
//! println!("{}", reply.content_str());
//! # Ok(())
//! # }
//! ```
pub mod chat;
pub mod openai;
pub mod traits;
