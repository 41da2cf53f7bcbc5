use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::services::chat::ChatTransport;
use crate::services::extraction::ImageExtractor;
use crate::services::grading_api::GradingApi;
use crate::services::result_ledger::ResultLedger;
use crate::services::storage::StorageService;
use crate::tasks::supervisor::TaskSupervisor;
use crate::workflow::cancellation::CancellationRegistry;
use crate::workflow::results::{ActiveTasks, ResultStore};
use crate::workflow::session::SessionStore;

/// External services the workflow talks to.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) extractor: Arc<dyn ImageExtractor>,
    pub(crate) grading: Arc<dyn GradingApi>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    storage: StorageService,
    ledger: ResultLedger,
    collaborators: Collaborators,
    sessions: SessionStore,
    cancellations: CancellationRegistry,
    active_tasks: ActiveTasks,
    results: ResultStore,
    tasks: TaskSupervisor,
    shutdown: CancellationToken,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        storage: StorageService,
        ledger: ResultLedger,
        collaborators: Collaborators,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(InnerState {
                settings,
                storage,
                ledger,
                collaborators,
                sessions: SessionStore::new(),
                cancellations: CancellationRegistry::new(shutdown.clone()),
                active_tasks: ActiveTasks::new(),
                results: ResultStore::new(),
                tasks: TaskSupervisor::new(),
                shutdown,
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    pub(crate) fn ledger(&self) -> &ResultLedger {
        &self.inner.ledger
    }

    pub(crate) fn transport(&self) -> &dyn ChatTransport {
        self.inner.collaborators.transport.as_ref()
    }

    pub(crate) fn extractor(&self) -> &dyn ImageExtractor {
        self.inner.collaborators.extractor.as_ref()
    }

    pub(crate) fn grading(&self) -> &dyn GradingApi {
        self.inner.collaborators.grading.as_ref()
    }

    pub(crate) fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub(crate) fn cancellations(&self) -> &CancellationRegistry {
        &self.inner.cancellations
    }

    pub(crate) fn active_tasks(&self) -> &ActiveTasks {
        &self.inner.active_tasks
    }

    pub(crate) fn results(&self) -> &ResultStore {
        &self.inner.results
    }

    pub(crate) fn tasks(&self) -> &TaskSupervisor {
        &self.inner.tasks
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
