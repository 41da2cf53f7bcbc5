use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::TgUpdate;
use crate::core::config::Settings;
use crate::services::chat::{ChatTransport, ReplyMarkup};

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgSentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

/// Bot API client; every text goes out with `parse_mode=HTML`.
#[derive(Debug, Clone)]
pub(crate) struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
    poll_timeout_seconds: u64,
}

impl TelegramClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let telegram = settings.telegram();
        Self::new(telegram.api_base.clone(), telegram.token.clone(), telegram.poll_timeout_seconds)
    }

    pub(crate) fn new(api_base: String, token: String, poll_timeout_seconds: u64) -> Result<Self> {
        // Long polls hold the request open for `poll_timeout_seconds`.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(poll_timeout_seconds + 30))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            poll_timeout_seconds,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;

        decode_response(method, response).await
    }

    pub(crate) async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout_seconds,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

async fn decode_response<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
    let payload: TgResponse<T> = response
        .json()
        .await
        .with_context(|| format!("Failed to decode Telegram {method} payload"))?;

    if !payload.ok {
        let description =
            payload.description.unwrap_or_else(|| "unknown Telegram API error".to_string());
        return Err(anyhow!("Telegram {method} returned ok=false: {description}"));
    }

    payload.result.ok_or_else(|| anyhow!("Telegram {method} returned no result"))
}

pub(crate) fn markup_json(markup: &ReplyMarkup) -> Value {
    match markup {
        ReplyMarkup::Inline(rows) => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| {
                            json!({"text": button.text, "callback_data": button.callback_data})
                        })
                        .collect()
                })
                .collect();
            json!({ "inline_keyboard": rows })
        }
        ReplyMarkup::RequestContact { label } => json!({
            "keyboard": [[{"text": label, "request_contact": true}]],
            "resize_keyboard": true,
            "one_time_keyboard": true,
        }),
        ReplyMarkup::RemoveKeyboard => json!({ "remove_keyboard": true }),
    }
}

fn with_markup(mut payload: Value, markup: Option<ReplyMarkup>) -> Value {
    if let (Some(markup), Some(map)) = (markup, payload.as_object_mut()) {
        map.insert("reply_markup".to_string(), markup_json(&markup));
    }
    payload
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Option<ReplyMarkup>) -> Result<i64> {
        let payload = with_markup(
            json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }),
            markup,
        );
        let sent: TgSentMessage = self.call("sendMessage", payload).await?;
        Ok(sent.message_id)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<()> {
        let payload = with_markup(
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }),
            markup,
        );
        let _: Value = self.call("editMessageText", payload).await?;
        Ok(())
    }

    async fn edit_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()> {
        let _: Value = self
            .call(
                "editMessageCaption",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "caption": caption,
                    "parse_mode": "HTML",
                }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call("deleteMessage", json!({"chat_id": chat_id, "message_id": message_id}))
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<i64> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name =
            path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let photo = Part::bytes(bytes).file_name(file_name).mime_str("image/jpeg")?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", photo);
        if let Some(markup) = markup {
            form = form.text("reply_markup", markup_json(&markup).to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .context("Telegram sendPhoto request failed")?;
        let sent: TgSentMessage = decode_response("sendPhoto", response).await?;
        Ok(sent.message_id)
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, alert: bool) -> Result<()> {
        let mut payload = json!({"callback_query_id": callback_id, "show_alert": alert});
        if !text.is_empty() {
            payload["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: TgFile = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = file.file_path.ok_or_else(|| anyhow!("Telegram getFile missing file_path"))?;

        let response = self
            .client
            .get(format!("{}/file/bot{}/{}", self.api_base, self.token, file_path))
            .send()
            .await
            .context("Failed to download Telegram file")?;
        if !response.status().is_success() {
            return Err(anyhow!("Telegram file download returned {}", response.status()));
        }

        let bytes = response.bytes().await.context("Failed to read Telegram file bytes")?;
        Ok(bytes.to_vec())
    }
}
