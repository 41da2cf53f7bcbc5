use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::config::Settings;

pub(crate) const QUESTIONS_INSTRUCTION: &str = "Extract every question text exactly. Include MC options. Format: {'q1': 'text', 'q2': 'text'}";

pub(crate) fn answers_instruction(questions: &Value) -> String {
    format!(
        "Questions: {}. Map answers. Output JSON: {{'question_1': 'text', 'answer_1': 'text'}}",
        serde_json::to_string(questions).unwrap_or_default()
    )
}

/// Turns an exam photo into a structured JSON object.
#[async_trait]
pub(crate) trait ImageExtractor: Send + Sync {
    async fn extract(&self, image_b64: &str, mime_type: &str, instruction: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub(crate) struct LlmExtractionService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmExtractionService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.model().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.model().api_key.clone(),
            base_url: settings.model().base_url.trim_end_matches('/').to_string(),
            model: settings.model().model_id.clone(),
        })
    }
}

#[async_trait]
impl ImageExtractor for LlmExtractionService {
    async fn extract(&self, image_b64: &str, mime_type: &str, instruction: &str) -> Result<Value> {
        let timer = Instant::now();
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": instruction},
                {"role": "user", "content": [
                    {"type": "image_url", "image_url": {"url": format!("data:{mime_type};base64,{image_b64}")}},
                    {"type": "text", "text": "Return ONLY a valid JSON object."}
                ]}
            ],
            "temperature": 0,
            "response_format": {"type": "json_object"}
        });

        tracing::debug!(prompt_len = instruction.len(), model = %self.model, "Sending extraction request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to call model API")?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!("Model API error ({status}): {body}"));
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .context("Missing model response content")?;

        let result = parse_extraction(content)?;

        tracing::info!(
            duration_seconds = timer.elapsed().as_secs_f64(),
            keys = result.as_object().map(|map| map.len()).unwrap_or(0),
            "Extraction completed"
        );

        Ok(result)
    }
}

/// Models sometimes wrap JSON in markdown fences despite `json_object` mode.
pub(crate) fn repair_json(content: &str) -> String {
    content.replace("```json", "").replace("```", "").trim().to_string()
}

/// Only a non-empty JSON object counts as a usable extraction.
pub(crate) fn parse_extraction(content: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(&repair_json(content)).context("Failed to parse extraction JSON")?;
    match value.as_object() {
        Some(map) if !map.is_empty() => Ok(value),
        Some(_) => Err(anyhow!("Extraction returned an empty object")),
        None => Err(anyhow!("Extraction did not return a JSON object")),
    }
}
