pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod services;
pub(crate) mod tasks;
pub(crate) mod workflow;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::core::state::{AppState, Collaborators};
use crate::core::telemetry;
use crate::services::extraction::LlmExtractionService;
use crate::services::grading_api::GradingApiClient;
use crate::services::result_ledger::ResultLedger;
use crate::services::storage::StorageService;
use crate::services::telegram_bot::{self, TelegramClient};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let storage = StorageService::from_settings(&settings).await?;
    let ledger = ResultLedger::open(settings.storage().ledger_path.clone()).await?;
    let telegram = Arc::new(TelegramClient::from_settings(&settings)?);
    let collaborators = Collaborators {
        transport: telegram.clone(),
        extractor: Arc::new(LlmExtractionService::from_settings(&settings)?),
        grading: Arc::new(GradingApiClient::from_settings(&settings)?),
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(settings, storage, ledger, collaborators, shutdown.clone());
    tokio::spawn(core::shutdown::cancel_on_signal(shutdown.clone()));

    tracing::info!(
        environment = %state.settings().runtime().environment.as_str(),
        storage = %state.storage().root().display(),
        ledger = %state.ledger().path().display(),
        "Exam grading bot starting"
    );

    let ops = if state.settings().ops().enabled {
        let app = api::router::router(state.clone());
        let listener = tokio::net::TcpListener::bind(state.settings().ops_addr()).await?;
        tracing::info!(addr = %state.settings().ops_addr(), "Ops server listening");

        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await }).await
        }))
    } else {
        None
    };

    let result = telegram_bot::run(state.clone(), telegram).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "Telegram bot runtime failed");
    }
    shutdown.cancel();

    state.tasks().shutdown(SHUTDOWN_GRACE).await;

    if let Some(ops) = ops {
        match ops.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Ops server failed"),
            Err(err) => tracing::error!(error = %err, "Ops server task panicked"),
        }
    }

    tracing::info!("Exam grading bot stopped");
    result
}
