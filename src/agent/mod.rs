//! The agent capability: transcript in, one assistant turn out.
//!
//! Any type implementing [`AgentCapability`] can drive page conversion. The
//! crate ships one adapter, [`llm::LlmAgent`], over `edgequake-llm`
//! providers; tests use small in-memory stubs.
//!
//! ## Transcript layout for a page
//!
//! 1. **System** — the conversion prompt (or the caller's override)
//! 2. **System** *(serial mode)* — currently open headings, optionally the
//!    tail of the previous page
//! 3. **User** — `[Page N]`, the text layer, `[IMAGE: id]` placeholders, and
//!    the page screenshot as an image attachment
//! 4. Then alternating **Assistant** turns with tool calls and **Tool**
//!    results, until a content-only assistant turn ends the loop.

pub mod llm;

use crate::error::AgentError;
use crate::page::PageImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One message of a page conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Image attachments (user messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<PageImage>,
    /// Tool calls made in this turn (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether a tool message reports a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<PageImage>) -> Self {
        Self {
            images,
            ..Self::plain(Role::User, content)
        }
    }

    /// Record an assistant turn in the transcript.
    pub fn assistant(turn: &AssistantTurn) -> Self {
        Self {
            tool_calls: turn.tool_calls.clone(),
            ..Self::plain(Role::Assistant, turn.content.clone())
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn tool_error(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(call_id, error)
        }
    }
}

/// A tool as advertised to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// One assistant turn returned by the capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    /// A terminal, content-only turn.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        self.tool_calls.push(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        });
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Generates the next assistant turn for a transcript.
///
/// Implementations own their network policy (timeouts, retries, rate
/// limits). The caller never imposes a per-call timeout and never aborts a
/// call in flight; see [`crate::cancel`].
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(
        &self,
        transcript: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_keeps_tool_calls() {
        let turn = AssistantTurn::default().with_tool_call(
            "call_1",
            "describe_image",
            json!({"image_id": "x"}),
        );
        assert!(turn.has_tool_calls());
        let msg = Message::assistant(&turn);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn tool_error_is_flagged() {
        let msg = Message::tool_error("call_9", "unknown tool 'zap'");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert!(msg.is_error);
    }

    #[test]
    fn message_serialises_compactly() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("images").is_none());
        assert!(json.get("tool_calls").is_none());
    }
}
