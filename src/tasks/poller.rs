use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::state::AppState;
use crate::services::chat::escape_html;
use crate::services::grading_api::{TaskStatus, TaskStatusResponse};
use crate::services::storage::file_stem;
use crate::workflow::events::rating_keyboard;
use crate::workflow::results::{display_grade, ResultMeta};

/// Telegram captions stop at 1024 characters.
const MAX_FEEDBACK_CHARS: usize = 700;

/// Where a poller reports to and what it needs to record a result.
#[derive(Debug, Clone)]
pub(crate) struct PollContext {
    pub(crate) user_id: i64,
    pub(crate) chat_id: i64,
    pub(crate) status_message_id: i64,
    pub(crate) student_image_b64: String,
    pub(crate) teacher_contact: String,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Completed,
    Failed,
    Ignored,
    Exhausted,
    Shutdown,
}

impl PollOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PollOutcome::Completed => "completed",
            PollOutcome::Failed => "failed",
            PollOutcome::Ignored => "ignored",
            PollOutcome::Exhausted => "exhausted",
            PollOutcome::Shutdown => "shutdown",
        }
    }
}

/// Creates the grading task for one student paper and polls it to the end.
/// Returns `None` when the task could not be created.
pub(crate) async fn submit_and_poll(
    state: AppState,
    ctx: PollContext,
    model_answer: Value,
) -> Option<PollOutcome> {
    let task_id = match state.grading().create_task(&ctx.student_image_b64, &model_answer).await {
        Ok(task_id) => {
            metrics::counter!("grading_tasks_created_total", "status" => "ok").increment(1);
            tracing::info!(user_id = ctx.user_id, task_id = %task_id, "Grading task created");
            task_id
        }
        Err(error) => {
            metrics::counter!("grading_tasks_created_total", "status" => "error").increment(1);
            tracing::error!(user_id = ctx.user_id, error = %error, "Failed to create grading task");
            state.cancellations().release(ctx.chat_id, ctx.status_message_id);
            if !ctx.cancel.is_cancelled() {
                edit_status(
                    &state,
                    &ctx,
                    "⚠️ <b>Could not submit the paper.</b> Please send it again.",
                )
                .await;
            }
            return None;
        }
    };

    Some(poll_grading_task(&state, &task_id, &ctx).await)
}

pub(crate) async fn poll_grading_task(
    state: &AppState,
    task_id: &str,
    ctx: &PollContext,
) -> PollOutcome {
    state.active_tasks().record(ctx.user_id, task_id);
    metrics::gauge!("active_pollers").increment(1.0);
    tracing::debug!(user_id = ctx.user_id, task_id, "Polling started");

    let outcome = run_poll_loop(state, task_id, ctx).await;

    metrics::gauge!("active_pollers").decrement(1.0);
    metrics::counter!("grading_poll_outcomes_total", "outcome" => outcome.as_str()).increment(1);
    state.active_tasks().clear_if(ctx.user_id, task_id);
    state.cancellations().release(ctx.chat_id, ctx.status_message_id);

    tracing::info!(
        user_id = ctx.user_id,
        task_id,
        message_id = ctx.status_message_id,
        outcome = outcome.as_str(),
        "Polling finished"
    );
    outcome
}

async fn run_poll_loop(state: &AppState, task_id: &str, ctx: &PollContext) -> PollOutcome {
    let policy = state.settings().poll_policy();

    for attempt in 1..=policy.max_attempts {
        if ctx.cancel.is_cancelled() {
            return cancelled_outcome(state);
        }

        match state.grading().task_status(task_id).await {
            Ok(response) => match response.status {
                TaskStatus::Completed => {
                    deliver_result(state, task_id, ctx, response).await;
                    return PollOutcome::Completed;
                }
                TaskStatus::Failed => {
                    edit_status(
                        state,
                        ctx,
                        "❌ <b>Grading Failed.</b> Server could not process image.",
                    )
                    .await;
                    return PollOutcome::Failed;
                }
                TaskStatus::Pending | TaskStatus::Unknown => {}
            },
            Err(error) => {
                tracing::debug!(task_id, attempt, error = %error, "Polling attempt failed");
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return cancelled_outcome(state),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    tracing::warn!(task_id, attempts = policy.max_attempts, "Grading result did not arrive in time");
    if policy.notify_on_exhausted {
        edit_status(
            state,
            ctx,
            "⌛ <b>Grading timed out.</b> The result did not arrive in time, please send the paper again.",
        )
        .await;
    }
    PollOutcome::Exhausted
}

/// Status-message tokens are children of the shutdown token, so a cancelled
/// poller was either ignored by the user or stopped with the process.
fn cancelled_outcome(state: &AppState) -> PollOutcome {
    if state.shutdown_token().is_cancelled() {
        PollOutcome::Shutdown
    } else {
        PollOutcome::Ignored
    }
}

async fn deliver_result(
    state: &AppState,
    task_id: &str,
    ctx: &PollContext,
    response: TaskStatusResponse,
) {
    let grade = response.grade();
    let feedback = response.reasoning();
    let caption = format!(
        "✅ <b>Graded!</b>\n📊 <b>Grade:</b> {}/10\n📝 <b>Feedback:</b> {}",
        escape_html(&display_grade(&grade)),
        escape_html(&truncate_chars(&feedback, MAX_FEEDBACK_CHARS))
    );

    let inserted = state.results().insert_once(
        task_id,
        ResultMeta::new(
            ctx.student_image_b64.clone(),
            response.annotated_image.clone(),
            grade,
            feedback,
            ctx.teacher_contact.clone(),
        ),
    );
    if !inserted {
        tracing::warn!(task_id, "Result already recorded for task");
    }

    let keyboard = Some(rating_keyboard(task_id));
    let sent = match store_annotated(state, task_id, response.annotated_image.as_deref()).await {
        Ok(Some(path)) => state.transport().send_photo(ctx.chat_id, &path, &caption, keyboard).await,
        Ok(None) => state.transport().send_text(ctx.chat_id, &caption, keyboard).await,
        Err(error) => {
            tracing::warn!(task_id, error = %error, "Annotated image unusable, sending text result");
            state.transport().send_text(ctx.chat_id, &caption, keyboard).await
        }
    };
    if let Err(error) = sent {
        tracing::error!(task_id, chat_id = ctx.chat_id, error = %error, "Failed to deliver grading result");
    }

    if let Err(error) = state.transport().delete_message(ctx.chat_id, ctx.status_message_id).await {
        tracing::debug!(task_id, error = %error, "Failed to delete status message");
    }
}

async fn store_annotated(
    state: &AppState,
    task_id: &str,
    annotated_b64: Option<&str>,
) -> Result<Option<std::path::PathBuf>> {
    let Some(encoded) = annotated_b64.filter(|encoded| !encoded.is_empty()) else {
        return Ok(None);
    };
    let bytes = STANDARD.decode(encoded)?;
    let path = state.storage().write(&format!("res_{}.jpg", file_stem(task_id)), &bytes).await?;
    Ok(Some(path))
}

async fn edit_status(state: &AppState, ctx: &PollContext, text: &str) {
    if let Err(error) =
        state.transport().edit_text(ctx.chat_id, ctx.status_message_id, text, None).await
    {
        tracing::warn!(
            chat_id = ctx.chat_id,
            message_id = ctx.status_message_id,
            error = %error,
            "Failed to edit status message"
        );
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((index, _)) => format!("{}…", &value[..index]),
        None => value.to_string(),
    }
}
