use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::config::Settings;

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Pending,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GradingSummary {
    #[serde(default)]
    pub(crate) overall_grade: Option<Value>,
    #[serde(default)]
    pub(crate) overall_reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TaskStatusResponse {
    #[serde(default)]
    pub(crate) status: TaskStatus,
    #[serde(default)]
    pub(crate) annotated_image: Option<String>,
    #[serde(default)]
    pub(crate) grading: Option<GradingSummary>,
}

impl TaskStatusResponse {
    pub(crate) fn grade(&self) -> Value {
        self.grading.as_ref().and_then(|grading| grading.overall_grade.clone()).unwrap_or(Value::Null)
    }

    pub(crate) fn reasoning(&self) -> String {
        self.grading
            .as_ref()
            .and_then(|grading| grading.overall_reasoning.clone())
            .unwrap_or_else(|| "Done".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    task_id: Option<Value>,
}

/// Task ids arrive as strings or bare numbers; both end up in the result URL.
fn task_id_from(body: Value) -> Result<String> {
    let parsed: CreateTaskResponse =
        serde_json::from_value(body).context("Unexpected grading API response shape")?;
    let task_id = match parsed.task_id {
        Some(Value::String(task_id)) => task_id,
        Some(Value::Number(task_id)) => task_id.to_string(),
        _ => String::new(),
    };
    if task_id.is_empty() {
        return Err(anyhow!("Grading API response is missing task_id"));
    }
    Ok(task_id)
}

#[async_trait]
pub(crate) trait GradingApi: Send + Sync {
    /// Submits one student paper against the answer key and returns the task id.
    async fn create_task(&self, student_image_b64: &str, model_answer: &Value) -> Result<String>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse>;
}

#[derive(Debug, Clone)]
pub(crate) struct GradingApiClient {
    client: Client,
    api_url: String,
    result_url: String,
    api_key: String,
    submit_retries: u32,
}

impl GradingApiClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let grading = settings.grading();
        Self::new(
            grading.api_url.clone(),
            grading.result_url.clone(),
            grading.api_key.clone(),
            Duration::from_secs(grading.request_timeout_seconds),
            grading.submit_retries,
        )
    }

    pub(crate) fn new(
        api_url: String,
        result_url: String,
        api_key: String,
        timeout: Duration,
        submit_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("Failed to build grading HTTP client")?;

        Ok(Self { client, api_url, result_url, api_key, submit_retries })
    }

    async fn post_task(&self, payload: &Value) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await
            .context("Failed to call grading API")?;

        let status = response.status();
        let body: Value =
            response.json().await.context("Failed to decode grading API response")?;
        if !status.is_success() {
            return Err(anyhow!("Grading API returned {status}: {body}"));
        }

        task_id_from(body)
    }
}

#[async_trait]
impl GradingApi for GradingApiClient {
    async fn create_task(&self, student_image_b64: &str, model_answer: &Value) -> Result<String> {
        let payload = json!({
            "student_exam": student_image_b64,
            "model_answer": model_answer,
        });

        let mut last_error = None;
        for attempt in 0..=self.submit_retries {
            match self.post_task(&payload).await {
                Ok(task_id) => return Ok(task_id),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Grading task creation attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt < self.submit_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Unknown grading API error")))
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let response = self
            .client
            .get(format!("{}{}", self.result_url, task_id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to call grading result endpoint")?;

        response.json().await.context("Failed to decode grading status payload")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct StubState {
        posts: Arc<AtomicUsize>,
    }

    async fn create(
        State(state): State<StubState>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let attempt = state.posts.fetch_add(1, Ordering::SeqCst);
        if headers.get("x-api-key").and_then(|value| value.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "bad key"})));
        }
        if attempt == 0 {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"detail": "warming up"})));
        }
        assert_eq!(body["student_exam"], "c3R1ZGVudA==");
        assert_eq!(body["model_answer"]["answer_1"], "4");
        (StatusCode::OK, Json(json!({"task_id": "T1"})))
    }

    async fn status(Path(task_id): Path<String>) -> Json<Value> {
        match task_id.as_str() {
            "T1" => Json(json!({
                "status": "completed",
                "annotated_image": "YW5ub3RhdGVk",
                "grading": {"overall_grade": 8, "overall_reasoning": "Solid"}
            })),
            "T2" => Json(json!({"status": "processing"})),
            _ => Json(json!({})),
        }
    }

    async fn spawn_stub() -> (String, StubState) {
        let state = StubState::default();
        let app = Router::new()
            .route("/tasks", post(create))
            .route("/tasks/:task_id", get(status))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{addr}"), state)
    }

    fn client(base: &str, key: &str, retries: u32) -> GradingApiClient {
        GradingApiClient::new(
            format!("{base}/tasks"),
            format!("{base}/tasks/"),
            key.to_string(),
            Duration::from_secs(5),
            retries,
        )
        .expect("client")
    }

    #[tokio::test]
    async fn create_task_retries_transient_failure() {
        let (base, state) = spawn_stub().await;
        let client = client(&base, "secret", 1);

        let task_id = client
            .create_task("c3R1ZGVudA==", &json!({"answer_1": "4"}))
            .await
            .expect("task id");

        assert_eq!(task_id, "T1");
        assert_eq!(state.posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn create_task_gives_up_after_budget() {
        let (base, state) = spawn_stub().await;
        let client = client(&base, "wrong", 0);

        let result = client.create_task("c3R1ZGVudA==", &json!({})).await;

        assert!(result.is_err());
        assert_eq!(state.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn task_status_decodes_completed_payload() {
        let (base, _) = spawn_stub().await;
        let client = client(&base, "secret", 0);

        let response = client.task_status("T1").await.expect("status");

        assert_eq!(response.status, TaskStatus::Completed);
        assert_eq!(response.grade(), json!(8));
        assert_eq!(response.reasoning(), "Solid");
        assert_eq!(response.annotated_image.as_deref(), Some("YW5ub3RhdGVk"));
    }

    #[tokio::test]
    async fn unknown_or_missing_status_is_not_terminal() {
        let (base, _) = spawn_stub().await;
        let client = client(&base, "secret", 0);

        assert_eq!(client.task_status("T2").await.expect("status").status, TaskStatus::Unknown);
        let empty = client.task_status("T3").await.expect("status");
        assert_eq!(empty.status, TaskStatus::Unknown);
        assert_eq!(empty.grade(), Value::Null);
        assert_eq!(empty.reasoning(), "Done");
    }

    #[test]
    fn numeric_task_id_is_accepted() {
        assert_eq!(task_id_from(json!({"task_id": 42})).expect("numeric id"), "42");
        assert_eq!(task_id_from(json!({"task_id": "T9"})).expect("string id"), "T9");
        assert!(task_id_from(json!({"task_id": ""})).is_err());
        assert!(task_id_from(json!({"task_id": null})).is_err());
        assert!(task_id_from(json!({"detail": "queued"})).is_err());
    }
}
