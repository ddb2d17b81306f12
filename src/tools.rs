//! Tools the agent may call while converting a page.
//!
//! A tool runs against the page being converted, so it can reach content the
//! transcript only references (embedded images are listed as `[IMAGE: id]`
//! placeholders to keep the first turn small). Failures are returned to the
//! agent as error tool results; they never fail the page by themselves.

use crate::agent::{AgentCapability, Message, ToolCall, ToolDescriptor};
use crate::error::ToolError;
use crate::page::PageContent;
use crate::prompts::DESCRIBE_IMAGE_PROMPT;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// A named operation the agent can request.
#[async_trait]
pub trait PageTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute against `page`. The returned string becomes the tool result.
    async fn call(&self, page: &PageContent, arguments: &Value) -> Result<String, ToolError>;
}

/// The tool catalog offered to every page of a run.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn PageTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A later tool with the same name shadows an earlier one.
    pub fn with_tool(mut self, tool: Arc<dyn PageTool>) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn PageTool>) {
        let name = tool.descriptor().name;
        self.tools.retain(|t| t.descriptor().name != name);
        self.tools.push(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Run one tool call.
    pub async fn execute(&self, page: &PageContent, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.descriptor().name == call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        debug!(page = page.page_index + 1, tool = %call.name, "Executing tool");
        tool.call(page, &call.arguments).await
    }
}

/// Format a structured tool output: strings pass through, anything else is
/// serialised as JSON.
pub fn tool_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `describe_image`: ask a vision sub-agent to describe an embedded image.
pub struct DescribeImageTool {
    describer: Arc<dyn AgentCapability>,
    prompt: String,
}

impl DescribeImageTool {
    pub const NAME: &'static str = "describe_image";

    pub fn new(describer: Arc<dyn AgentCapability>) -> Self {
        Self {
            describer,
            prompt: DESCRIBE_IMAGE_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl PageTool for DescribeImageTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.to_string(),
            description: "Describe an image embedded in the current page. Use the id from an \
                          [IMAGE: id] placeholder. Returns a short textual description suitable \
                          for alt text or a figure caption."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "image_id": {
                        "type": "string",
                        "description": "The id from the [IMAGE: id] placeholder"
                    }
                },
                "required": ["image_id"]
            }),
        }
    }

    async fn call(&self, page: &PageContent, arguments: &Value) -> Result<String, ToolError> {
        let id = arguments
            .get("image_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: Self::NAME.to_string(),
                detail: "missing string field 'image_id'".to_string(),
            })?;

        let embedded = page.image(id).ok_or_else(|| ToolError::Failed {
            tool: Self::NAME.to_string(),
            detail: format!("no image '{}' on page {}", id, page.page_index + 1),
        })?;

        let transcript = vec![
            Message::system(self.prompt.clone()),
            Message::user_with_images("", vec![embedded.image.clone()]),
        ];
        let turn = self
            .describer
            .invoke(&transcript, &[])
            .await
            .map_err(|e| ToolError::Failed {
                tool: Self::NAME.to_string(),
                detail: e.to_string(),
            })?;

        Ok(turn.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AssistantTurn;
    use crate::error::AgentError;
    use crate::page::{EmbeddedImage, PageImage};

    struct FixedDescriber;

    #[async_trait]
    impl AgentCapability for FixedDescriber {
        async fn invoke(
            &self,
            transcript: &[Message],
            tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, AgentError> {
            assert!(tools.is_empty());
            assert_eq!(transcript[1].images.len(), 1);
            Ok(AssistantTurn::content("  A bar chart of revenue.  "))
        }
    }

    fn page_with_image() -> PageContent {
        PageContent::from_text(0, "Figure 1").with_image(EmbeddedImage {
            id: "img1".into(),
            bbox: (0.0, 0.0, 1.0, 1.0),
            image: PageImage::new("AAAA", "image/png"),
        })
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn describe_image_delegates_to_sub_agent() {
        let registry =
            ToolRegistry::new().with_tool(Arc::new(DescribeImageTool::new(Arc::new(FixedDescriber))));
        let out = registry
            .execute(&page_with_image(), &call("describe_image", json!({"image_id": "img1"})))
            .await
            .unwrap();
        assert_eq!(out, "A bar chart of revenue.");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let registry =
            ToolRegistry::new().with_tool(Arc::new(DescribeImageTool::new(Arc::new(FixedDescriber))));
        let page = page_with_image();

        let err = registry.execute(&page, &call("zap", json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));

        let err = registry
            .execute(&page, &call("describe_image", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry
            .execute(&page, &call("describe_image", json!({"image_id": "nope"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no image 'nope'"));
    }

    #[test]
    fn registering_same_name_replaces() {
        let describer: Arc<dyn AgentCapability> = Arc::new(FixedDescriber);
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(DescribeImageTool::new(Arc::clone(&describer))))
            .with_tool(Arc::new(DescribeImageTool::new(describer).with_prompt("short")));
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn tool_output_formats_values() {
        assert_eq!(tool_output(&json!("plain")), "plain");
        assert_eq!(tool_output(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
