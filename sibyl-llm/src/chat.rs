//! Conversation model shared by chat clients and the research agent.
//!
//! Turns serialize directly into the OpenAI chat-completions `messages`
//! shape (`{"role": ..., ...}`), so the history can be sent without a
//! separate wire type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Function name plus the raw, still-unparsed argument payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the argument payload into a typed struct.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(
            default,
            skip_serializing_if = "Vec::is_empty",
            deserialize_with = "null_as_empty"
        )]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Turn::Tool {
            tool_call_id: call.id.clone(),
            name: call.function.name.clone(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::System { .. } => Role::System,
            Turn::User { .. } => Role::User,
            Turn::Assistant { .. } => Role::Assistant,
            Turn::Tool { .. } => Role::Tool,
        }
    }
}

/// The assistant message returned by a single completion request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    /// Text content, empty when the model sent none.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

impl From<Reply> for Turn {
    fn from(reply: Reply) -> Self {
        Turn::Assistant {
            content: reply.content,
            tool_calls: reply.tool_calls,
        }
    }
}

/// Append-only conversation history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a history with a system instruction followed by a user request.
    pub fn seeded(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system), Turn::user(user)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        tracing::trace!(role = %turn.role(), position = self.turns.len(), "conversation.append");
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// A function the model may call, in the chat-completions `tools` shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl ToolDescriptor {
    /// `parameters` is a JSON Schema object describing the arguments.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_turn_carries_call_id() {
        let call = ToolCall::new("call_1", "search_google", r#"{"query":"rust"}"#);
        let turn = Turn::tool_result(&call, "result text");
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            json!({
                "role": "tool",
                "tool_call_id": "call_1",
                "name": "search_google",
                "content": "result text"
            })
        );
    }

    #[test]
    fn assistant_without_calls_omits_the_field() {
        let turn: Turn = Reply::text("RESEARCH_COMPLETE").into();
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            json!({ "role": "assistant", "content": "RESEARCH_COMPLETE" })
        );
    }

    #[test]
    fn reply_tolerates_null_tool_calls_and_missing_type() {
        let reply: Reply = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": null
        }))
        .unwrap();
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.content_str(), "");

        let reply: Reply = serde_json::from_value(json!({
            "content": null,
            "tool_calls": [{ "id": "c", "function": { "name": "f", "arguments": "{}" } }]
        }))
        .unwrap();
        assert_eq!(reply.tool_calls[0].kind, "function");
    }

    #[test]
    fn arguments_parse_into_typed_structs() {
        #[derive(Deserialize)]
        struct Args {
            query: String,
        }
        let call = ToolCall::new("c", "search_google", r#"{"query":"tokio"}"#);
        assert_eq!(call.parse_arguments::<Args>().unwrap().query, "tokio");

        let broken = ToolCall::new("c", "search_google", "{query: tokio");
        assert!(broken.parse_arguments::<Args>().is_err());
    }

    #[test]
    fn conversation_is_seeded_in_order() {
        let mut convo = Conversation::seeded("sys", "topic");
        convo.push(Reply::text("hi").into());
        let roles: Vec<Role> = convo.turns().iter().map(Turn::role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(convo.len(), 3);
        assert_eq!(convo.last().map(Turn::role), Some(Role::Assistant));

        let empty = Conversation::default();
        assert!(empty.is_empty());
        assert!(empty.last().is_none());
    }
}
