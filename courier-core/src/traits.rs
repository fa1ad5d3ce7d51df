// ABOUTME: Outbound chat-platform contract and inbound message types.
// ABOUTME: The platform is consumed request/response only; implementations live upstream.

use anyhow::Result;
use async_trait::async_trait;

/// A message received from the chat platform. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-wide, strictly increasing update identifier.
    pub update_id: u64,
    /// Conversation this message belongs to; the unit of serialization.
    pub chat_id: String,
    pub user_id: i64,
    /// Platform message id, used as the reply target for responses.
    pub message_id: i32,
    pub text: String,
    pub timestamp_secs: i64,
    pub sender_name: String,
    /// Whether this is a 1:1 conversation.
    pub is_direct: bool,
    /// Present when the message quotes/replies to another message.
    pub quote: Option<QuotedMessage>,
}

impl InboundMessage {
    pub fn is_quote_reply(&self) -> bool {
        self.quote.is_some()
    }
}

/// The message an inbound message replied to.
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub sender_name: String,
    pub text: String,
}

/// Formatting mode for outbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    /// Markdown, with the implementation falling back to plain text when the
    /// platform rejects the markup.
    #[default]
    Markdown,
    Plain,
}

/// Options for sending a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Message id to reply to, if any.
    pub reply_to: Option<i32>,
    pub mode: TextMode,
    /// Suppress the recipient's notification (used for status messages).
    pub silent: bool,
}

impl SendOptions {
    pub fn reply(message_id: i32) -> Self {
        Self {
            reply_to: Some(message_id),
            ..Default::default()
        }
    }

    pub fn silent_plain() -> Self {
        Self {
            mode: TextMode::Plain,
            silent: true,
            ..Default::default()
        }
    }
}

/// Outcome of an edit. `NotModified` is the platform reporting that the text
/// already matches — benign, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Edited,
    NotModified,
}

/// Request/response contract with the chat platform. Implementations retry
/// transient failures themselves; callers treat any returned error as final.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Send a message, returning its platform message id.
    async fn send_message(&self, chat_id: &str, text: &str, opts: SendOptions) -> Result<i32>;

    /// Replace the text of a previously sent message.
    async fn edit_message(&self, chat_id: &str, message_id: i32, text: &str)
        -> Result<EditOutcome>;

    /// Delete a previously sent message.
    async fn delete_message(&self, chat_id: &str, message_id: i32) -> Result<()>;

    /// Show a typing indicator (auto-expires on the platform side).
    async fn send_typing(&self, chat_id: &str) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
