// ABOUTME: Long-poll ingestion loop: fetch updates, persist the offset, dispatch.
// ABOUTME: Dispatch never blocks the loop, so one slow chat cannot delay the rest.

use super::TelegramApi;
use courier_core::relay::Relay;
use courier_core::traits::{InboundMessage, QuotedMessage};
use courier_core::OffsetStore;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, UpdateKind, User};
use tokio::sync::watch;

const POLL_LIMIT: u8 = 50;
const POLL_TIMEOUT_SECS: u32 = 60;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The top-level ingestion loop. Owns the offset cursor; everything else is
/// handed to the relay.
pub struct UpdatePoller {
    bot: Bot,
    offset: Arc<OffsetStore>,
    relay: Arc<Relay<TelegramApi>>,
}

impl UpdatePoller {
    pub fn new(bot: Bot, offset: Arc<OffsetStore>, relay: Arc<Relay<TelegramApi>>) -> Self {
        Self { bot, offset, relay }
    }

    /// Poll until the shutdown flag flips. Network failures are logged and
    /// retried after a fixed backoff; they never advance the offset.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(offset = self.offset.current(), "update poller online");

        while !*shutdown.borrow() {
            let mut request = self
                .bot
                .get_updates()
                .limit(POLL_LIMIT)
                .timeout(POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message]);
            let current = self.offset.current();
            if current > 0 {
                request = request.offset((current + 1) as i32);
            }

            let updates = tokio::select! {
                result = request.send() => result,
                _ = shutdown.changed() => break,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(error) => {
                    tracing::warn!(error = %error, "long polling error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {},
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
            };

            for update in updates {
                let update_id = u64::from(update.id.0);
                // Persist the cursor before dispatch: a crash can resend the
                // in-flight update, never skip one.
                if update_id > self.offset.current() {
                    if let Err(error) = self.offset.advance(update_id) {
                        tracing::error!(error = %error, "failed persisting offset");
                    }
                }

                let UpdateKind::Message(message) = update.kind else {
                    continue;
                };
                let Some(inbound) = convert_message(update_id, &message) else {
                    continue;
                };
                self.relay.dispatch(inbound);
            }
        }

        tracing::info!("update poller stopped");
    }
}

fn convert_message(update_id: u64, message: &Message) -> Option<InboundMessage> {
    let from = message.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    let quote = message.reply_to_message().map(|reply| QuotedMessage {
        sender_name: reply
            .from
            .as_ref()
            .map(display_name)
            .unwrap_or_else(|| "unknown".to_string()),
        text: extract_text(reply),
    });

    Some(InboundMessage {
        update_id,
        chat_id: message.chat.id.0.to_string(),
        user_id: from.id.0 as i64,
        message_id: message.id.0,
        text: extract_text(message),
        timestamp_secs: message.date.timestamp(),
        sender_name: display_name(from),
        is_direct: message.chat.is_private(),
        quote,
    })
}

/// Text, caption, or a placeholder for media-only messages.
fn extract_text(message: &Message) -> String {
    message
        .text()
        .or_else(|| message.caption())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "[non-text message]".to_string())
}

fn display_name(user: &User) -> String {
    if let Some(username) = &user.username {
        return username.clone();
    }
    let full_name = user.full_name();
    if full_name.trim().is_empty() {
        user.id.0.to_string()
    } else {
        full_name
    }
}
