//! Plain-text rendering of conversations

use strand_core::{Message, Part, ToolInvocation};

const PREVIEW_CHARS: usize = 80;

/// Render a whole conversation, one block per message
pub fn render_conversation(messages: &[Message]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| render_message(i, message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render one message with an index header and one line per part
pub fn render_message(index: usize, message: &Message) -> String {
    let mut out = format!("{}: [{}] {}\n", index, message.role.as_str(), message.id);
    for part in &message.parts {
        out.push_str("  ");
        out.push_str(&render_part(part));
        out.push('\n');
    }
    out
}

fn render_part(part: &Part) -> String {
    match part {
        Part::Text { text, .. } => preview(text),
        Part::Reasoning {
            text, reasoning_id, ..
        } => match reasoning_id {
            Some(id) => format!("(thinking {}) {}", id, preview(text)),
            None => format!("(thinking) {}", preview(text)),
        },
        Part::Tool(tool) => render_tool(tool),
        Part::StepStart => "---".to_string(),
        Part::File { media_type, url, .. } => format!("[file {}] {}", media_type, preview(url)),
        Part::Data { name, .. } => format!("[data {}]", name),
    }
}

fn render_tool(tool: &ToolInvocation) -> String {
    let mut line = format!("[{} {} {}]", tool.tool_name, tool.tool_call_id, tool.state);
    if let Some(error) = &tool.error_text {
        line.push_str(&format!(" error: {}", preview(error)));
    } else if let Some(output) = &tool.output {
        let output = match output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        line.push_str(&format!(" -> {}", preview(&output)));
    }
    line
}

/// First line of the text, truncated
fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > PREVIEW_CHARS {
        let truncated: String = first_line.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else if text.lines().nth(1).is_some() {
        format!("{}...", first_line)
    } else {
        first_line.to_string()
    }
}
