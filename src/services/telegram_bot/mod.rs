mod client;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;

pub(crate) use client::TelegramClient;

use crate::core::state::AppState;
use crate::workflow::events::{CallbackAction, Command, InboundEvent, MessageBody};
use crate::workflow::machine;

const MAX_BACKOFF_SECONDS: u64 = 30;

#[derive(Debug, Deserialize)]
pub(crate) struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<TgPhotoSize>>,
    contact: Option<TgContact>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgContact {
    phone_number: String,
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    message: Option<TgMessage>,
    data: Option<String>,
}

impl TgChat {
    fn is_private(&self) -> bool {
        self.chat_type == "private"
    }
}

/// Long-polls the Bot API and hands each update to the workflow. Updates of
/// one user are handled one at a time; users are independent.
#[derive(Clone)]
pub(crate) struct TelegramBotRuntime {
    state: AppState,
    client: Arc<TelegramClient>,
    user_locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl TelegramBotRuntime {
    pub(crate) fn new(state: AppState, client: Arc<TelegramClient>) -> Self {
        Self { state, client, user_locks: Arc::new(DashMap::new()) }
    }

    pub(crate) async fn run(&self) -> Result<()> {
        if self.state.settings().telegram().token.is_empty() {
            return Err(anyhow!("BOT_TOKEN is empty"));
        }

        tracing::info!("Telegram bot runtime started");

        let shutdown = self.state.shutdown_token().clone();
        let mut offset = 0_i64;
        let mut failures = 0_u32;

        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Telegram bot runtime stopping");
                    return Ok(());
                }
                fetched = self.client.get_updates(offset) => fetched,
            };

            let updates = match fetched {
                Ok(updates) => {
                    failures = 0;
                    updates
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff(failures);
                    tracing::error!(
                        error = %error,
                        failures,
                        retry_in_seconds = delay.as_secs(),
                        "Failed to fetch Telegram updates"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                offset = update.update_id + 1;
                if let Some(event) = into_event(update) {
                    self.dispatch(event);
                }
            }
        }
    }

    fn dispatch(&self, event: InboundEvent) {
        let user_id = event.user_id();
        let lock = self.user_locks.entry(user_id).or_default().clone();
        let state = self.state.clone();

        self.state.tasks().spawn(async move {
            let _guard = lock.lock().await;
            let kind = event.kind();
            if let Err(error) = machine::handle_event(&state, event).await {
                tracing::error!(user_id, kind, error = %error, "Failed to handle Telegram update");
            }
        });
    }
}

fn backoff(failures: u32) -> Duration {
    let seconds = 2_u64.saturating_pow(failures.min(6)).min(MAX_BACKOFF_SECONDS);
    Duration::from_secs(seconds)
}

/// Maps an update onto a workflow event. Group chats and message kinds the
/// workflow has no use for map to `None`.
fn into_event(update: TgUpdate) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        let message = query.message?;
        if !message.chat.is_private() {
            return None;
        }
        let body = match (message.caption, message.text) {
            (Some(caption), _) => Some(MessageBody::Caption(caption)),
            (None, Some(text)) => Some(MessageBody::Text(text)),
            (None, None) => None,
        };
        return Some(InboundEvent::Callback {
            user_id: query.from.id,
            chat_id: message.chat.id,
            message_id: message.message_id,
            callback_id: query.id,
            action: query.data.as_deref().and_then(CallbackAction::parse),
            body,
        });
    }

    let message = update.message?;
    let from = message.from?;
    if !message.chat.is_private() {
        tracing::debug!(chat_id = message.chat.id, "Ignoring update from non-private chat");
        return None;
    }
    let chat_id = message.chat.id;

    if let Some(contact) = message.contact {
        return Some(InboundEvent::Contact {
            user_id: from.id,
            chat_id,
            own: contact.user_id == Some(from.id),
            phone: contact.phone_number,
        });
    }

    if let Some(command) = message.text.as_deref().and_then(Command::parse) {
        return Some(InboundEvent::Command { user_id: from.id, chat_id, command });
    }

    // Sizes come smallest first.
    let largest = message.photo.and_then(|sizes| sizes.into_iter().last())?;
    Some(InboundEvent::Photo { user_id: from.id, chat_id, file_id: largest.file_id })
}

pub(crate) async fn run(state: AppState, client: Arc<TelegramClient>) -> Result<()> {
    TelegramBotRuntime::new(state, client).run().await
}
