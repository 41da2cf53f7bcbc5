use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

use crate::core::state::AppState;
use crate::core::time::{ledger_timestamp_now, unix_millis_now};
use crate::services::chat::{escape_html, ReplyMarkup};
use crate::services::extraction::{answers_instruction, QUESTIONS_INSTRUCTION};
use crate::services::result_ledger::LedgerEntry;
use crate::tasks::poller::{self, PollContext};
use crate::workflow::events::{ignore_keyboard, CallbackAction, Command, InboundEvent, MessageBody};
use crate::workflow::results::{Rating, RatingClaim};
use crate::workflow::session::SessionState;

const IMAGE_MIME: &str = "image/jpeg";
const STEP_1_PROMPT: &str = "<b>Step 1:</b> Send <b>Exam Questions</b> image.";

/// The two extraction steps that precede grading.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExtractionStep {
    Questions,
    Answers { questions: Value },
}

impl ExtractionStep {
    fn as_str(&self) -> &'static str {
        match self {
            ExtractionStep::Questions => "questions",
            ExtractionStep::Answers { .. } => "answers",
        }
    }

    /// The state a result of this step may still be applied in.
    fn expected_state(&self) -> SessionState {
        match self {
            ExtractionStep::Questions => SessionState::Step1Questions,
            ExtractionStep::Answers { .. } => SessionState::Step2Answers,
        }
    }

    fn instruction(&self) -> String {
        match self {
            ExtractionStep::Questions => QUESTIONS_INSTRUCTION.to_string(),
            ExtractionStep::Answers { questions } => answers_instruction(questions),
        }
    }

    fn file_name(&self, user_id: i64) -> String {
        match self {
            ExtractionStep::Questions => format!("{user_id}_q.jpg"),
            ExtractionStep::Answers { .. } => format!("{user_id}_a.jpg"),
        }
    }

    fn status_text(&self) -> &'static str {
        match self {
            ExtractionStep::Questions => "📥 Reading Questions... ⏳",
            ExtractionStep::Answers { .. } => "🧠 Mapping answers... ⏳",
        }
    }

    fn success_text(&self) -> &'static str {
        match self {
            ExtractionStep::Questions => {
                "✅ <b>Questions saved.</b>\n\n<b>Step 2:</b> Send <b>Model Answer Image</b>."
            }
            ExtractionStep::Answers { .. } => "✅ <b>Answer Key Mapped.</b> Send student papers.",
        }
    }

    fn failure_text(&self) -> &'static str {
        match self {
            ExtractionStep::Questions => {
                "⚠️ <b>Could not read the questions.</b> Please send the image again."
            }
            ExtractionStep::Answers { .. } => {
                "⚠️ <b>Could not map the answers.</b> Please send the image again."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExtractionOutcome {
    Applied,
    /// The status message was ignored before the result arrived.
    Ignored,
    /// The session left the step while the extraction was running.
    Stale,
    Failed,
}

impl ExtractionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ExtractionOutcome::Applied => "applied",
            ExtractionOutcome::Ignored => "ignored",
            ExtractionOutcome::Stale => "stale",
            ExtractionOutcome::Failed => "failed",
        }
    }
}

/// Which rule an ignore press resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IgnoreEffect {
    Questions,
    ModelAnswer,
    Processing,
    Nothing,
}

pub(crate) async fn handle_event(state: &AppState, event: InboundEvent) -> Result<()> {
    tracing::debug!(user_id = event.user_id(), kind = event.kind(), "Handling inbound event");

    match event {
        InboundEvent::Command { user_id, chat_id, command } => {
            handle_command(state, user_id, chat_id, command).await
        }
        InboundEvent::Contact { user_id, chat_id, phone, own } => {
            handle_contact(state, user_id, chat_id, &phone, own).await
        }
        InboundEvent::Photo { user_id, chat_id, file_id } => {
            handle_photo(state, user_id, chat_id, &file_id).await
        }
        InboundEvent::Callback { user_id, chat_id, message_id, callback_id, action, body } => {
            match action {
                Some(CallbackAction::IgnoreImage) => {
                    handle_ignore(state, user_id, chat_id, message_id, &callback_id).await
                }
                Some(CallbackAction::Rate { task_id, rating }) => {
                    handle_rating(
                        state,
                        user_id,
                        chat_id,
                        message_id,
                        &callback_id,
                        &task_id,
                        rating,
                        body,
                    )
                    .await
                }
                None => state.transport().answer_callback(&callback_id, "", false).await,
            }
        }
    }
}

async fn handle_command(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    command: Command,
) -> Result<()> {
    let transport = state.transport();

    match command {
        Command::Start => {
            let session = state.sessions().get_or_create(user_id);
            if session.has_verified_contact() {
                let session = state.sessions().reset(user_id);
                let text = format!(
                    "✅ <b>Verified:</b> <code>{}</code>\n\n{STEP_1_PROMPT}",
                    escape_html(&session.verified_contact)
                );
                transport.send_text(chat_id, &text, Some(ReplyMarkup::RemoveKeyboard)).await?;
            } else {
                state.sessions().update(user_id, |session| session.state = SessionState::WaitContact);
                transport
                    .send_text(
                        chat_id,
                        "👋 <b>Welcome!</b> Grant phone access to start.",
                        Some(contact_keyboard()),
                    )
                    .await?;
            }
        }
        Command::Reset => {
            state.sessions().reset(user_id);
            tracing::info!(user_id, "Session reset by user");
            transport
                .send_text(chat_id, &format!("🔄 <b>Session reset.</b>\n\n{STEP_1_PROMPT}"), None)
                .await?;
        }
        Command::Help => {
            transport
                .send_text(
                    chat_id,
                    "<b>How it works</b>\n1. Send the exam questions image.\n2. Send the model answer image.\n3. Send student papers, one photo each.\n\n/start begins, /reset starts over from step 1.",
                    None,
                )
                .await?;
        }
        Command::Unknown(name) => {
            tracing::debug!(user_id, command = %name, "Unknown command");
            transport
                .send_text(chat_id, "Unknown command. Available: /start, /reset, /help", None)
                .await?;
        }
    }

    Ok(())
}

async fn handle_contact(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    phone: &str,
    own: bool,
) -> Result<()> {
    if !own {
        state
            .transport()
            .send_text(
                chat_id,
                "Please share <b>your own</b> contact with the button below.",
                Some(contact_keyboard()),
            )
            .await?;
        return Ok(());
    }

    let phone = normalize_phone(phone);
    let advanced = state.sessions().update(user_id, |session| {
        session.verified_contact = phone.clone();
        if matches!(session.state, SessionState::Start | SessionState::WaitContact) {
            session.state = SessionState::Step1Questions;
            true
        } else {
            false
        }
    });
    tracing::info!(user_id, advanced, "Contact verified");

    let text = if advanced {
        "✅ <b>Verified!</b>\n\n<b>Step 1:</b> Please send the <b>Exam Questions</b> image."
            .to_string()
    } else {
        format!("✅ <b>Contact updated:</b> <code>{}</code>", escape_html(&phone))
    };
    state.transport().send_text(chat_id, &text, Some(ReplyMarkup::RemoveKeyboard)).await?;
    Ok(())
}

async fn handle_photo(state: &AppState, user_id: i64, chat_id: i64, file_id: &str) -> Result<()> {
    let session = state.sessions().get_or_create(user_id);

    match session.state {
        SessionState::Start | SessionState::WaitContact => {
            state
                .transport()
                .send_text(chat_id, "Please run /start and share your contact first.", None)
                .await?;
            Ok(())
        }
        SessionState::Step1Questions => {
            begin_extraction(state, user_id, chat_id, file_id, ExtractionStep::Questions).await
        }
        SessionState::Step2Answers => match session.data.questions_list().cloned() {
            Some(questions) => {
                let step = ExtractionStep::Answers { questions };
                begin_extraction(state, user_id, chat_id, file_id, step).await
            }
            None => {
                state.sessions().update(user_id, |session| {
                    session.state = SessionState::Step1Questions;
                });
                state
                    .transport()
                    .send_text(chat_id, &format!("No questions saved yet.\n\n{STEP_1_PROMPT}"), None)
                    .await?;
                Ok(())
            }
        },
        SessionState::Step3Student => match session.data.model_answer().cloned() {
            Some(model_answer) => {
                begin_grading(state, user_id, chat_id, file_id, session.verified_contact, model_answer)
                    .await
            }
            None => {
                state.sessions().update(user_id, |session| {
                    session.state = SessionState::Step2Answers;
                });
                state
                    .transport()
                    .send_text(chat_id, "No answer key saved yet. Send the <b>Model Answer</b> image.", None)
                    .await?;
                Ok(())
            }
        },
    }
}

/// Downloads the photo, keeps a copy under storage and returns it base64 encoded.
async fn fetch_photo(state: &AppState, file_id: &str, name: &str) -> Result<String> {
    let bytes = state.transport().download_file(file_id).await.context("Failed to download photo")?;
    state.storage().write(name, &bytes).await?;
    Ok(STANDARD.encode(bytes))
}

async fn begin_extraction(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    file_id: &str,
    step: ExtractionStep,
) -> Result<()> {
    let status_message_id =
        state.transport().send_text(chat_id, step.status_text(), Some(ignore_keyboard())).await?;
    state.cancellations().register(chat_id, status_message_id);

    let image_b64 = match fetch_photo(state, file_id, &step.file_name(user_id)).await {
        Ok(image_b64) => image_b64,
        Err(error) => {
            tracing::warn!(user_id, step = step.as_str(), error = %error, "Failed to fetch photo");
            if !state.cancellations().consume_ignored(chat_id, status_message_id) {
                state
                    .transport()
                    .edit_text(chat_id, status_message_id, step.failure_text(), None)
                    .await?;
            }
            return Ok(());
        }
    };

    let task_state = state.clone();
    state.tasks().spawn(async move {
        run_extraction(task_state, user_id, chat_id, status_message_id, step, image_b64).await;
    });
    Ok(())
}

async fn run_extraction(
    state: AppState,
    user_id: i64,
    chat_id: i64,
    status_message_id: i64,
    step: ExtractionStep,
    image_b64: String,
) {
    let result = state.extractor().extract(&image_b64, IMAGE_MIME, &step.instruction()).await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("extraction_requests_total", "status" => status).increment(1);

    match apply_extraction(&state, user_id, chat_id, status_message_id, &step, result).await {
        Ok(outcome) => tracing::info!(
            user_id,
            message_id = status_message_id,
            step = step.as_str(),
            outcome = outcome.as_str(),
            "Extraction finished"
        ),
        Err(error) => tracing::warn!(
            user_id,
            message_id = status_message_id,
            step = step.as_str(),
            error = %error,
            "Failed to report extraction result"
        ),
    }
}

/// Applies an extraction result to the session unless its status message was
/// ignored or the session moved on in the meantime.
pub(crate) async fn apply_extraction(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    status_message_id: i64,
    step: &ExtractionStep,
    result: Result<Value>,
) -> Result<ExtractionOutcome> {
    if state.cancellations().consume_ignored(chat_id, status_message_id) {
        return Ok(ExtractionOutcome::Ignored);
    }

    let extracted = match result {
        Ok(value) if value.as_object().is_some_and(|map| !map.is_empty()) => value,
        Ok(_) => {
            tracing::warn!(user_id, step = step.as_str(), "Extraction returned no usable object");
            state.transport().edit_text(chat_id, status_message_id, step.failure_text(), None).await?;
            return Ok(ExtractionOutcome::Failed);
        }
        Err(error) => {
            tracing::warn!(user_id, step = step.as_str(), error = %error, "Extraction failed");
            state.transport().edit_text(chat_id, status_message_id, step.failure_text(), None).await?;
            return Ok(ExtractionOutcome::Failed);
        }
    };

    let applied = state.sessions().update(user_id, |session| {
        if session.state != step.expected_state() {
            return false;
        }
        match step {
            ExtractionStep::Questions => {
                session.data.set_questions_list(extracted);
                session.state = SessionState::Step2Answers;
                true
            }
            ExtractionStep::Answers { .. } => {
                if !session.data.set_model_answer(extracted) {
                    return false;
                }
                session.state = SessionState::Step3Student;
                true
            }
        }
    });

    if !applied {
        state
            .transport()
            .edit_text(
                chat_id,
                status_message_id,
                "ℹ️ <b>Discarded.</b> The session has moved on.",
                None,
            )
            .await?;
        return Ok(ExtractionOutcome::Stale);
    }

    state.transport().edit_text(chat_id, status_message_id, step.success_text(), None).await?;
    Ok(ExtractionOutcome::Applied)
}

async fn begin_grading(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    file_id: &str,
    teacher_contact: String,
    model_answer: Value,
) -> Result<()> {
    let name = format!("{user_id}_{}_std.jpg", unix_millis_now());
    let student_image_b64 = match fetch_photo(state, file_id, &name).await {
        Ok(image_b64) => image_b64,
        Err(error) => {
            tracing::warn!(user_id, error = %error, "Failed to fetch student paper");
            state
                .transport()
                .send_text(chat_id, "⚠️ <b>Could not read the photo.</b> Please send it again.", None)
                .await?;
            return Ok(());
        }
    };

    let status_message_id =
        state.transport().send_text(chat_id, "🚀 Grading... ⏳", Some(ignore_keyboard())).await?;
    let cancel = state.cancellations().register(chat_id, status_message_id);

    let ctx = PollContext {
        user_id,
        chat_id,
        status_message_id,
        student_image_b64,
        teacher_contact,
        cancel,
    };
    let task_state = state.clone();
    state.tasks().spawn(async move {
        poller::submit_and_poll(task_state, ctx, model_answer).await;
    });
    Ok(())
}

async fn handle_ignore(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    message_id: i64,
    callback_id: &str,
) -> Result<()> {
    let in_flight = state.cancellations().mark_ignored(chat_id, message_id);
    let current_task = state.active_tasks().get(user_id);

    let (previous, effect) = state.sessions().update(user_id, |session| {
        let previous = session.state;
        let effect = match session.state {
            SessionState::Step1Questions => IgnoreEffect::Questions,
            SessionState::Step2Answers if session.data.questions_list().is_none() => {
                IgnoreEffect::Questions
            }
            SessionState::Step2Answers => IgnoreEffect::ModelAnswer,
            SessionState::Step3Student if session.data.model_answer().is_none() => {
                IgnoreEffect::ModelAnswer
            }
            SessionState::Step3Student => IgnoreEffect::Processing,
            SessionState::Start | SessionState::WaitContact => IgnoreEffect::Nothing,
        };
        match effect {
            IgnoreEffect::Questions => {
                session.state = SessionState::Step1Questions;
                session.data.clear_questions_list();
            }
            IgnoreEffect::ModelAnswer => {
                session.state = SessionState::Step2Answers;
                session.data.clear_model_answer();
            }
            IgnoreEffect::Processing | IgnoreEffect::Nothing => {}
        }
        (previous, effect)
    });

    if effect == IgnoreEffect::Processing {
        state.active_tasks().clear(user_id);
    }

    tracing::info!(
        user_id,
        state = previous.as_str(),
        task_id = current_task.as_deref().unwrap_or("N/A"),
        message_id,
        in_flight,
        "Ignoring image"
    );

    let reply = match effect {
        IgnoreEffect::Questions => Some("🗑️ <b>Questions Ignored.</b> Send new Questions image."),
        IgnoreEffect::ModelAnswer => {
            Some("🗑️ <b>Model Answer Ignored.</b> Send new Answer image.")
        }
        IgnoreEffect::Processing => Some("🛑 <b>Processing Cancelled.</b> Ready for next paper."),
        IgnoreEffect::Nothing => None,
    };
    if let Some(reply) = reply {
        state.transport().send_text(chat_id, reply, None).await?;
    }

    state.transport().answer_callback(callback_id, "", false).await?;
    if let Err(error) = state.transport().delete_message(chat_id, message_id).await {
        tracing::warn!(error = %error, chat_id, message_id, "Failed to delete ignored status message");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_rating(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    message_id: i64,
    callback_id: &str,
    task_id: &str,
    rating: Rating,
    body: Option<MessageBody>,
) -> Result<()> {
    let meta = match state.results().claim_for_rating(task_id) {
        RatingClaim::Claimed(meta) => meta,
        RatingClaim::AlreadyRated => {
            state
                .transport()
                .answer_callback(callback_id, "This result has already been rated.", true)
                .await?;
            return Ok(());
        }
        RatingClaim::Unknown => {
            state
                .transport()
                .answer_callback(callback_id, "This result is no longer available.", true)
                .await?;
            return Ok(());
        }
    };

    let entry = LedgerEntry {
        timestamp: ledger_timestamp_now(),
        user_id,
        teacher_contact: meta.teacher_contact,
        task_id: task_id.to_string(),
        grade: meta.grade,
        feedback: meta.feedback,
        teacher_rating: rating.as_str().to_string(),
        student_image_b64: meta.student_image_b64,
        annotated_image_b64: meta.annotated_image_b64,
    };

    match state.ledger().append(&entry).await {
        Ok(()) => {
            metrics::counter!("ledger_appends_total", "status" => "ok").increment(1);
            tracing::info!(user_id, task_id, rating = rating.as_str(), "Rating saved");
        }
        Err(error) => {
            metrics::counter!("ledger_appends_total", "status" => "error").increment(1);
            tracing::error!(user_id, task_id, error = %error, "Failed to append rating to ledger");
        }
    }

    state
        .transport()
        .answer_callback(callback_id, &format!("Thank you! Rated as {}.", rating.as_str()), true)
        .await?;

    let suffix = format!("\n\n⭐ <b>Feedback:</b> {}", rating.title());
    let edited = match body {
        Some(MessageBody::Text(text)) => {
            let text = format!("{}{suffix}", escape_html(&text));
            state.transport().edit_text(chat_id, message_id, &text, None).await
        }
        Some(MessageBody::Caption(caption)) => {
            let caption = format!("{}{suffix}", escape_html(&caption));
            state.transport().edit_caption(chat_id, message_id, &caption).await
        }
        None => state.transport().edit_caption(chat_id, message_id, suffix.trim_start()).await,
    };
    if let Err(error) = edited {
        tracing::warn!(error = %error, chat_id, message_id, "Failed to mark rated result");
    }
    Ok(())
}

fn contact_keyboard() -> ReplyMarkup {
    ReplyMarkup::RequestContact { label: "🔓 Grant Access".to_string() }
}

fn normalize_phone(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+{phone}")
    }
}
