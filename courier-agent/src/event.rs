// ABOUTME: Event types for the agent CLI's line-delimited JSON output stream.
// ABOUTME: Decoded defensively: unknown tags become Other, malformed lines are dropped.

use serde::Deserialize;
use serde_json::Value;

/// One content block inside an agent message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Tool-use, thinking, and any future block kinds we don't render.
    #[serde(other)]
    Other,
}

/// Message payload attached to `message_start` / `message_end` events.
///
/// Every field is optional on the wire; missing fields decode to defaults so
/// a partial payload never fails the whole event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub error_message: Option<String>,
}

impl AgentMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Concatenated text blocks of an assistant message, trimmed.
    /// Empty for non-assistant messages.
    pub fn assistant_text(&self) -> String {
        if !self.is_assistant() {
            return String::new();
        }
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out.trim().to_string()
    }

    /// API-level failure reported inside an otherwise-successful exit
    /// (e.g. quota exhaustion): the agent exits 0 but the message carries
    /// `stopReason: "error"` and an error message.
    pub fn api_error(&self) -> Option<&str> {
        if self.stop_reason.as_deref() == Some("error") {
            self.error_message.as_deref().filter(|m| !m.is_empty())
        } else {
            None
        }
    }
}

/// Events emitted by the agent process on stdout, one JSON object per line.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A message started streaming.
    MessageStart { message: AgentMessage },
    /// A message finished; carries the final content and stop reason.
    MessageEnd { message: AgentMessage },
    /// A tool invocation began executing.
    ToolExecutionStart { tool_name: String, args: Value },
    /// The agent started compacting its context window.
    AutoCompactionStart,
    /// The agent is retrying a failed provider call on its own.
    AutoRetryStart {
        attempt: Option<u32>,
        max_attempts: Option<u32>,
    },
    /// Any event kind we don't model. Kept for telemetry, never an error.
    Other { kind: String, payload: Value },
}

impl AgentEvent {
    /// Decode one stdout line. Returns `None` for blank or malformed lines;
    /// the stream is best-effort telemetry, so bad lines are simply dropped.
    pub fn from_line(line: &str) -> Option<Self> {
        let raw = line.trim();
        if raw.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(raw).ok()?;
        let kind = value.get("type")?.as_str()?.to_string();
        Some(Self::from_value(&kind, &value))
    }

    fn from_value(kind: &str, value: &Value) -> Self {
        match kind {
            "message_start" | "message_end" => {
                let message = value
                    .get("message")
                    .cloned()
                    .and_then(|m| serde_json::from_value(m).ok())
                    .unwrap_or_default();
                if kind == "message_start" {
                    AgentEvent::MessageStart { message }
                } else {
                    AgentEvent::MessageEnd { message }
                }
            }
            "tool_execution_start" => AgentEvent::ToolExecutionStart {
                tool_name: value
                    .get("toolName")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                args: value.get("args").cloned().unwrap_or(Value::Null),
            },
            "auto_compaction_start" => AgentEvent::AutoCompactionStart,
            "auto_retry_start" => AgentEvent::AutoRetryStart {
                attempt: value.get("attempt").and_then(|v| v.as_u64()).map(|v| v as u32),
                max_attempts: value
                    .get("maxAttempts")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32),
            },
            _ => AgentEvent::Other {
                kind: kind.to_string(),
                payload: value.clone(),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
