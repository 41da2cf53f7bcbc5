use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InlineButton {
    pub(crate) text: String,
    pub(crate) callback_data: String,
}

impl InlineButton {
    pub(crate) fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self { text: text.into(), callback_data: callback_data.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyMarkup {
    Inline(Vec<Vec<InlineButton>>),
    /// One-shot keyboard asking the user to share their own phone number.
    RequestContact { label: String },
    RemoveKeyboard,
}

/// Outbound half of the chat platform. Message ids returned here are what the
/// cancellation registry keys on.
#[async_trait]
pub(crate) trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<i64>;

    /// `markup: None` strips any inline buttons from the message.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<()>;

    async fn edit_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<i64>;

    async fn answer_callback(&self, callback_id: &str, text: &str, alert: bool) -> Result<()>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

pub(crate) fn escape_html(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
