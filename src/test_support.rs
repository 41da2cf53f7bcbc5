use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::core::state::{AppState, Collaborators};
use crate::services::chat::{ChatTransport, ReplyMarkup};
use crate::services::extraction::ImageExtractor;
use crate::services::grading_api::{GradingApi, GradingSummary, TaskStatus, TaskStatusResponse};
use crate::services::result_ledger::ResultLedger;
use crate::services::storage::StorageService;

const FIRST_MESSAGE_ID: i64 = 100;

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("BOT_ENV", "test");
    std::env::remove_var("ENVIRONMENT");
    std::env::set_var("BOT_STRICT_CONFIG", "0");
    std::env::set_var("BOT_TOKEN", "test-token");
    std::env::set_var("GRADING_POLL_MAX_ATTEMPTS", "150");
    std::env::set_var("GRADING_POLL_INTERVAL_SECONDS", "0");
    std::env::set_var("GRADING_SUBMIT_RETRIES", "0");
    std::env::remove_var("GRADING_NOTIFY_ON_TIMEOUT");
    std::env::set_var("OPS_ENABLED", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("STORAGE_PATH");
    std::env::remove_var("JSON_FILE");
}

pub(crate) struct TestHarness {
    pub(crate) state: AppState,
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) extractor: Arc<FakeExtractor>,
    pub(crate) grading: Arc<FakeGradingApi>,
    _dir: TempDir,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn harness() -> TestHarness {
    harness_with_env(&[]).await
}

/// Builds an `AppState` over fakes, with storage and ledger in a temp dir.
pub(crate) async fn harness_with_env(overrides: &[(&str, &str)]) -> TestHarness {
    let guard = env_lock().await;
    set_test_env();

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("STORAGE_PATH", dir.path().join("exams"));
    std::env::set_var("JSON_FILE", dir.path().join("grading_results.json"));
    for (key, value) in overrides {
        std::env::set_var(key, value);
    }

    let settings = Settings::load().expect("settings");
    let storage = StorageService::from_settings(&settings).await.expect("storage");
    let ledger = ResultLedger::open(settings.storage().ledger_path.clone()).await.expect("ledger");

    let transport = Arc::new(FakeTransport::default());
    let extractor = Arc::new(FakeExtractor::default());
    let grading = Arc::new(FakeGradingApi::default());
    let collaborators = Collaborators {
        transport: transport.clone(),
        extractor: extractor.clone(),
        grading: grading.clone(),
    };

    let state = AppState::new(settings, storage, ledger, collaborators, CancellationToken::new());

    TestHarness { state, transport, extractor, grading, _dir: dir, _guard: guard }
}

/// Outbound chat operations, in the order the fake transport saw them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SentOp {
    Text { chat_id: i64, message_id: i64, text: String, markup: Option<ReplyMarkup> },
    EditText { chat_id: i64, message_id: i64, text: String, markup: Option<ReplyMarkup> },
    EditCaption { chat_id: i64, message_id: i64, caption: String },
    Delete { chat_id: i64, message_id: i64 },
    Photo { chat_id: i64, message_id: i64, path: PathBuf, caption: String, markup: Option<ReplyMarkup> },
    CallbackAnswer { callback_id: String, text: String, alert: bool },
}

#[derive(Debug)]
pub(crate) struct FakeTransport {
    next_id: AtomicI64,
    ops: StdMutex<Vec<SentOp>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self { next_id: AtomicI64::new(FIRST_MESSAGE_ID), ops: StdMutex::new(Vec::new()) }
    }
}

impl FakeTransport {
    pub(crate) fn ops(&self) -> Vec<SentOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SentOp::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn callback_answers(&self) -> Vec<(String, bool)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SentOp::CallbackAnswer { text, alert, .. } if !text.is_empty() => {
                    Some((text, alert))
                }
                _ => None,
            })
            .collect()
    }

    /// Id handed out by the most recent send.
    pub(crate) fn last_message_id(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    pub(crate) fn last_photo_id(&self) -> Option<i64> {
        self.ops().into_iter().rev().find_map(|op| match op {
            SentOp::Photo { message_id, .. } => Some(message_id),
            _ => None,
        })
    }

    fn record(&self, op: SentOp) {
        self.ops.lock().expect("ops lock").push(op);
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Option<ReplyMarkup>) -> Result<i64> {
        let message_id = self.allocate_id();
        self.record(SentOp::Text { chat_id, message_id, text: text.to_string(), markup });
        Ok(message_id)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<()> {
        self.record(SentOp::EditText { chat_id, message_id, text: text.to_string(), markup });
        Ok(())
    }

    async fn edit_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()> {
        self.record(SentOp::EditCaption { chat_id, message_id, caption: caption.to_string() });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.record(SentOp::Delete { chat_id, message_id });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<i64> {
        let message_id = self.allocate_id();
        self.record(SentOp::Photo {
            chat_id,
            message_id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            markup,
        });
        Ok(message_id)
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, alert: bool) -> Result<()> {
        self.record(SentOp::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
            alert,
        });
        Ok(())
    }

    async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
        Ok(b"jpeg-bytes".to_vec())
    }
}

/// Returns scripted results in order; fails once the script runs out.
/// `hold` makes every call wait for a `release`.
#[derive(Debug, Default)]
pub(crate) struct FakeExtractor {
    script: StdMutex<VecDeque<Result<Value, String>>>,
    instructions: StdMutex<Vec<String>>,
    held: AtomicBool,
    gate: Notify,
}

impl FakeExtractor {
    pub(crate) fn push_ok(&self, value: Value) {
        self.script.lock().expect("script lock").push_back(Ok(value));
    }

    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }

    pub(crate) fn instructions(&self) -> Vec<String> {
        self.instructions.lock().expect("instructions lock").clone()
    }
}

#[async_trait]
impl ImageExtractor for FakeExtractor {
    async fn extract(&self, _image_b64: &str, _mime_type: &str, instruction: &str) -> Result<Value> {
        self.instructions.lock().expect("instructions lock").push(instruction.to_string());
        let next = self.script.lock().expect("script lock").pop_front();
        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted extraction left")),
        }
    }
}

/// Scripted grading API. Creation defaults to `T<n>` and status to pending
/// once the scripts run out.
#[derive(Debug, Default)]
pub(crate) struct FakeGradingApi {
    creates: StdMutex<VecDeque<Result<String, String>>>,
    statuses: StdMutex<VecDeque<Result<TaskStatusResponse, String>>>,
    created_answers: StdMutex<Vec<Value>>,
    status_calls: AtomicUsize,
}

impl FakeGradingApi {
    pub(crate) fn push_create(&self, result: Result<&str, &str>) {
        let result = result.map(str::to_string).map_err(str::to_string);
        self.creates.lock().expect("creates lock").push_back(result);
    }

    pub(crate) fn push_status(&self, response: TaskStatusResponse) {
        self.statuses.lock().expect("statuses lock").push_back(Ok(response));
    }

    pub(crate) fn push_status_error(&self, message: &str) {
        self.statuses.lock().expect("statuses lock").push_back(Err(message.to_string()));
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn created_answers(&self) -> Vec<Value> {
        self.created_answers.lock().expect("created lock").clone()
    }
}

#[async_trait]
impl GradingApi for FakeGradingApi {
    async fn create_task(&self, _student_image_b64: &str, model_answer: &Value) -> Result<String> {
        let mut created = self.created_answers.lock().expect("created lock");
        created.push(model_answer.clone());
        let fallback = format!("T{}", created.len());
        drop(created);

        match self.creates.lock().expect("creates lock").pop_front() {
            Some(Ok(task_id)) => Ok(task_id),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(fallback),
        }
    }

    async fn task_status(&self, _task_id: &str) -> Result<TaskStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().expect("statuses lock").pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(pending()),
        }
    }
}

pub(crate) fn pending() -> TaskStatusResponse {
    TaskStatusResponse { status: TaskStatus::Pending, ..TaskStatusResponse::default() }
}

pub(crate) fn failed() -> TaskStatusResponse {
    TaskStatusResponse { status: TaskStatus::Failed, ..TaskStatusResponse::default() }
}

pub(crate) fn completed(grade: Value, reasoning: &str, annotated: Option<&str>) -> TaskStatusResponse {
    TaskStatusResponse {
        status: TaskStatus::Completed,
        annotated_image: annotated.map(str::to_string),
        grading: Some(GradingSummary {
            overall_grade: Some(grade),
            overall_reasoning: Some(reasoning.to_string()),
        }),
    }
}
