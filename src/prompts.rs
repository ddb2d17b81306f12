//! Prompts for agentic page conversion.
//!
//! Every prompt lives here so that changing conversion behaviour means editing
//! exactly one place, and tests can inspect prompts without a live model.
//!
//! Callers can replace the page prompt via
//! [`crate::config::ProcessingConfig::system_prompt`]; the context builders
//! below are always used in serial mode.

use crate::agent::ToolDescriptor;
use crate::heading::HeadingContext;

/// Default system prompt for converting one page to Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert document converter. You receive one page of a PDF: its extracted text layer, placeholders for embedded images, and usually a screenshot of the page. Convert the page to clean, well-structured Markdown.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Preserve ALL text content completely and accurately
   - Maintain the reading order as a human would read the page
   - Prefer the screenshot when the text layer is garbled or out of order

2. STRUCTURE
   - Use # for document or chapter titles, ## for major sections, ### for subsections
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Preserve list nesting with indentation
   - Use **bold** and *italic* to match the visual emphasis

3. TABLES
   - Convert tables to GFM pipe format
   - If a table is too complex for pipe format, use HTML table markup

4. CODE AND FORMULAS
   - Wrap code blocks in triple backticks with a language identifier
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

5. IMAGES
   - Each embedded image is listed as [IMAGE: id]
   - If a tool is available to describe images, use it for figures that carry meaning
   - Render meaningful figures as ![description](id); omit decorative images

6. WHAT TO IGNORE
   - Page numbers
   - Repeated headers/footers that appear on every page
   - Decorative borders and lines

7. OUTPUT FORMAT
   - Output ONLY the Markdown content of this page
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary or explanations"#;

/// System prompt for the image-description sub-agent.
pub const DESCRIBE_IMAGE_PROMPT: &str = "You describe images taken from documents. \
Reply with one or two plain sentences describing what the image shows, suitable as alt text. \
Transcribe any short text visible in the image. Do not add commentary.";

/// Context message listing the headings still open when a page starts.
///
/// Returns `None` when nothing is open.
pub fn heading_context_message(context: &HeadingContext) -> Option<String> {
    if context.is_empty() {
        return None;
    }
    Some(format!(
        "This page continues a document. The following headings are still open, \
         outermost first:\n\n{}\n\n\
         Do not repeat these headings unless the page itself repeats them. \
         Choose heading levels for new sections consistently with this outline.",
        context
    ))
}

/// Tail of the previous page, used for format continuity.
///
/// Only the last `max_chars` characters are kept, cut at a character boundary.
pub fn previous_page_context(prior_page: &str, max_chars: usize) -> Option<String> {
    let prior = prior_page.trim();
    if prior.is_empty() {
        return None;
    }
    let skip = prior.chars().count().saturating_sub(max_chars);
    let tail: String = prior.chars().skip(skip).collect();
    Some(format!(
        "Markdown must maintain consistent formatting with the previous page, which ended:\n\n\"\"\"{}\"\"\"\n\n\
         Continue any numbered lists or running text that began there.",
        tail
    ))
}

/// Instructions that teach a text-only chat model the tool-call protocol.
///
/// Each call is one fenced block tagged `tool_call` holding
/// `{"name": ..., "arguments": {...}}`. A reply without such blocks is the
/// final Markdown for the page.
pub fn tool_protocol_instructions(tools: &[ToolDescriptor]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut out = String::from(
        "TOOLS\n\
         You may call the tools below before answering. To call a tool, reply with one or more \
         blocks of exactly this form and nothing else:\n\n\
         ```tool_call\n{\"name\": \"<tool name>\", \"arguments\": { ... }}\n```\n\n\
         Tool results are returned in the next message. When you are done, reply with the final \
         Markdown only, without any tool_call block.\n\nAvailable tools:\n",
    );
    for tool in tools {
        out.push_str(&format!(
            "\n- {}: {}\n  arguments schema: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading::HeadingEvent;
    use serde_json::json;

    #[test]
    fn heading_context_lists_open_headings() {
        assert!(heading_context_message(&HeadingContext::new()).is_none());

        let mut ctx = HeadingContext::new();
        ctx.apply(&[
            HeadingEvent::Open {
                level: 1,
                title: "Intro".into(),
            },
            HeadingEvent::Open {
                level: 2,
                title: "Scope".into(),
            },
        ]);
        let msg = heading_context_message(&ctx).unwrap();
        assert!(msg.contains("# Intro\n## Scope"));
    }

    #[test]
    fn previous_page_keeps_tail_only() {
        let msg = previous_page_context("héllo world", 5).unwrap();
        assert!(msg.contains("\"\"\"world\"\"\""));
        assert!(previous_page_context("   ", 10).is_none());
    }

    #[test]
    fn tool_protocol_lists_tools() {
        assert!(tool_protocol_instructions(&[]).is_none());
        let tools = vec![ToolDescriptor {
            name: "describe_image".into(),
            description: "Describe an image".into(),
            parameters: json!({"type": "object"}),
        }];
        let text = tool_protocol_instructions(&tools).unwrap();
        assert!(text.contains("```tool_call"));
        assert!(text.contains("- describe_image: Describe an image"));
    }
}
