use std::sync::Arc;

use crate::core::config::Settings;
use crate::repositories::exams::ExamRepository;
use crate::services::job_queue::JobPublisher;
use crate::services::storage::ImageStorage;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    exams: Arc<dyn ExamRepository>,
    storage: Arc<dyn ImageStorage>,
    publisher: Arc<dyn JobPublisher>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        exams: Arc<dyn ExamRepository>,
        storage: Arc<dyn ImageStorage>,
        publisher: Arc<dyn JobPublisher>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, exams, storage, publisher }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn exams(&self) -> &dyn ExamRepository {
        self.inner.exams.as_ref()
    }

    pub(crate) fn storage(&self) -> &dyn ImageStorage {
        self.inner.storage.as_ref()
    }

    pub(crate) fn publisher(&self) -> &dyn JobPublisher {
        self.inner.publisher.as_ref()
    }
}
