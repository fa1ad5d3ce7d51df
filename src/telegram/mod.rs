// ABOUTME: Telegram implementation of the relay's outbound chat contract using teloxide.
// ABOUTME: Linear-backoff retries for transient errors, Markdown→plain fallback, chunking.

pub mod poller;

pub use poller::UpdatePoller;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_core::traits::{ChatApi, EditOutcome, SendOptions, TextMode};
use std::future::Future;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, LinkPreviewOptions, MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};

/// Maximum message length for the Telegram Bot API.
const MAX_MESSAGE_LENGTH: usize = 4096;

const SEND_ATTEMPTS: u32 = 3;
const EDIT_ATTEMPTS: u32 = 2;
const TYPING_ATTEMPTS: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Telegram-backed [`ChatApi`].
#[derive(Clone)]
pub struct TelegramApi {
    bot: Bot,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Resolve the bot's identity, confirming the token works.
    pub async fn verify(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .context("failed to call Telegram getMe")?;
        Ok(me.username().to_string())
    }

    async fn send_once(
        &self,
        chat: ChatId,
        text: &str,
        opts: &SendOptions,
        markdown: bool,
    ) -> Result<Message, RequestError> {
        let mut request = self.bot.send_message(chat, text);
        if markdown {
            request = request.parse_mode(ParseMode::Markdown);
        }
        request = request.link_preview_options(disabled_preview());
        if let Some(reply_to) = opts.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }
        if opts.silent {
            request = request.disable_notification(true);
        }
        request.send().await
    }

    async fn send_chunk(
        &self,
        chat: ChatId,
        text: &str,
        opts: &SendOptions,
        markdown: bool,
    ) -> Result<i32> {
        let first = with_retry(SEND_ATTEMPTS, || self.send_once(chat, text, opts, markdown)).await;
        match first {
            Ok(message) => Ok(message.id.0),
            // Unclosed tags and similar markup faults reject the whole
            // message; narrow to plain text instead of failing the send.
            Err(error) if markdown && is_parse_error(&error) => {
                tracing::warn!(error = %error, "markdown rejected, resending as plain text");
                let message = with_retry(SEND_ATTEMPTS, || self.send_once(chat, text, opts, false))
                    .await
                    .context("failed to send message")?;
                Ok(message.id.0)
            }
            Err(error) => Err(error).context("failed to send message"),
        }
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_message(&self, chat_id: &str, text: &str, opts: SendOptions) -> Result<i32> {
        let chat = parse_chat_id(chat_id)?;
        let markdown = opts.mode == TextMode::Markdown;
        if text.trim().is_empty() {
            anyhow::bail!("refusing to send an empty message");
        }

        let mut last_id = 0;
        for chunk in chunk_text(text, MAX_MESSAGE_LENGTH) {
            last_id = self.send_chunk(chat, chunk, &opts, markdown).await?;
        }
        Ok(last_id)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: i32,
        text: &str,
    ) -> Result<EditOutcome> {
        let chat = parse_chat_id(chat_id)?;
        let result = with_retry(EDIT_ATTEMPTS, || {
            let request = self.bot.edit_message_text(chat, MessageId(message_id), text);
            async move { request.send().await.map(|_| ()) }
        })
        .await;
        match result {
            Ok(()) => Ok(EditOutcome::Edited),
            Err(error) if is_not_modified(&error) => Ok(EditOutcome::NotModified),
            Err(error) => Err(error).context("failed to edit message"),
        }
    }

    async fn delete_message(&self, chat_id: &str, message_id: i32) -> Result<()> {
        let chat = parse_chat_id(chat_id)?;
        with_retry(SEND_ATTEMPTS, || {
            let request = self.bot.delete_message(chat, MessageId(message_id));
            async move { request.send().await.map(|_| ()) }
        })
        .await
        .context("failed to delete message")
    }

    async fn send_typing(&self, chat_id: &str) -> Result<()> {
        let chat = parse_chat_id(chat_id)?;
        with_retry(TYPING_ATTEMPTS, || {
            let request = self.bot.send_chat_action(chat, ChatAction::Typing);
            async move { request.send().await.map(|_| ()) }
        })
        .await
        .context("failed to send typing action")
    }
}

fn parse_chat_id(chat_id: &str) -> Result<ChatId> {
    chat_id
        .parse::<i64>()
        .map(ChatId)
        .context("invalid Telegram chat id")
}

fn disabled_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Retry transient failures with linear backoff; anything else is final.
async fn with_retry<T, F, Fut>(attempts: u32, mut call: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts && is_transient(&error) => {
                tracing::warn!(error = %error, attempt, "transient Telegram error, retrying");
                tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn is_transient(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_)
    )
}

fn is_not_modified(error: &RequestError) -> bool {
    match error {
        RequestError::Api(ApiError::MessageNotModified) => true,
        RequestError::Api(ApiError::Unknown(text)) => text.contains("message is not modified"),
        _ => false,
    }
}

fn is_parse_error(error: &RequestError) -> bool {
    match error {
        RequestError::Api(ApiError::CantParseEntities(_)) => true,
        RequestError::Api(ApiError::Unknown(text)) => text.contains("can't parse entities"),
        _ => false,
    }
}

/// Split text into chunks at line boundaries, falling back to character
/// boundaries.
fn chunk_text(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining);
            break;
        }

        let window = floor_char_boundary(remaining, max_len);
        let split_at = remaining[..window]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(window);

        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }

    chunks
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// =============================================================================
// Tests
// =============================================================================
