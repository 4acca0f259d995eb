use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, Method, Request},
    Router,
};
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::db::models::Exam;
use crate::repositories::exams::{ExamRepository, RepositoryError};
use crate::services::job_queue::{ExamJob, JobPublisher, PublishError};
use crate::services::storage::{object_key, ImageStorage, ImageUpload, StorageError, StoredImage};

const MULTIPART_BOUNDARY: &str = "exam-intake-test-boundary";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) exams: MemoryExamRepository,
    pub(crate) storage: MemoryImageStorage,
    pub(crate) publisher: RecordingPublisher,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK
        .get_or_init(|| {
            captured_database_url();
            Arc::new(AsyncMutex::new(()))
        })
        .clone();
    lock.lock_owned().await
}

fn captured_database_url() -> Option<String> {
    static URL: OnceLock<Option<String>> = OnceLock::new();
    URL.get_or_init(|| {
        dotenvy::dotenv().ok();
        std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
    })
    .clone()
}

/// Database URL the test process started with, read before [`set_test_env`] clears it.
///
/// Database-backed tests skip themselves when this is `None`.
pub(crate) async fn database_url() -> Option<String> {
    let _guard = env_lock().await;
    captured_database_url()
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAM_INTAKE_ENV", "test");
    std::env::set_var("EXAM_INTAKE_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "EXAM_INTAKE_HOST",
        "EXAM_INTAKE_PORT",
        "BACKEND_CORS_ORIGINS",
        "DATABASE_URL",
        "AMQP_URL",
        "EXAM_JOBS_QUEUE",
        "STORAGE_BACKEND",
        "STORAGE_DIRECTORY",
        "MAX_UPLOAD_SIZE_KB",
        "MAX_REQUEST_BODY_MB",
        "ALLOWED_IMAGE_EXTENSIONS",
        "EXAM_MIN_IMAGES",
        "S3_ACCESS_KEY",
        "S3_SECRET_KEY",
    ] {
        std::env::remove_var(key);
    }
}

/// Application state wired to in-memory collaborators.
pub(crate) fn memory_state(
    settings: Settings,
) -> (AppState, MemoryExamRepository, MemoryImageStorage, RecordingPublisher) {
    memory_state_with(settings, RecordingPublisher::default())
}

fn memory_state_with(
    settings: Settings,
    publisher: RecordingPublisher,
) -> (AppState, MemoryExamRepository, MemoryImageStorage, RecordingPublisher) {
    let exams = MemoryExamRepository::default();
    let storage = MemoryImageStorage::default();
    let state = AppState::new(
        settings,
        Arc::new(exams.clone()),
        Arc::new(storage.clone()),
        Arc::new(publisher.clone()),
    );
    (state, exams, storage, publisher)
}

pub(crate) async fn setup_test_context() -> TestContext {
    build_context(RecordingPublisher::default()).await
}

pub(crate) async fn setup_test_context_with_failing_publisher() -> TestContext {
    build_context(RecordingPublisher::failing()).await
}

pub(crate) async fn setup_test_context_with_unreachable_broker() -> TestContext {
    build_context(RecordingPublisher::unreachable()).await
}

async fn build_context(publisher: RecordingPublisher) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let (state, exams, storage, publisher) = memory_state_with(settings, publisher);
    let app = api::router::router(state.clone());

    TestContext { state, app, exams, storage, publisher, _guard: guard }
}

pub(crate) fn png_upload(filename: &str) -> ImageUpload {
    ImageUpload {
        filename: filename.to_string(),
        content_type: "image/png".to_string(),
        bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nimage-bytes"),
    }
}

#[derive(Debug, Default)]
struct ExamTable {
    rows: BTreeMap<i64, Exam>,
    next_id: i64,
    writes: usize,
    created_with: Vec<usize>,
}

/// `ExamRepository` over a shared map; clones observe the same rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryExamRepository {
    table: Arc<Mutex<ExamTable>>,
}

impl MemoryExamRepository {
    /// Inserts an exam directly, bypassing the write counter.
    pub(crate) fn seed(&self, user_id: i64, image_count: usize) -> Exam {
        let mut table = self.table.lock().expect("exam table");
        table.next_id += 1;
        let mut exam = Exam::new(table.next_id, user_id, OffsetDateTime::now_utc());
        exam.images.0 = (0..image_count).map(|idx| format!("uploads/seed-{idx}.png")).collect();
        table.rows.insert(exam.id, exam.clone());
        exam
    }

    pub(crate) fn get(&self, id: i64) -> Option<Exam> {
        self.table.lock().expect("exam table").rows.get(&id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Exam> {
        self.table.lock().expect("exam table").rows.values().cloned().collect()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.table.lock().expect("exam table").writes
    }

    /// Image counts observed at each `create` call.
    pub(crate) fn created_with_images(&self) -> Vec<usize> {
        self.table.lock().expect("exam table").created_with.clone()
    }
}

#[async_trait]
impl ExamRepository for MemoryExamRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Exam>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn create(&self, user_id: i64) -> Result<Exam, RepositoryError> {
        let mut table = self.table.lock().expect("exam table");
        table.next_id += 1;
        table.writes += 1;
        let exam = Exam::new(table.next_id, user_id, OffsetDateTime::now_utc());
        table.created_with.push(exam.image_count());
        table.rows.insert(exam.id, exam.clone());
        Ok(exam)
    }

    async fn add_image(&self, exam: &mut Exam, path: &str) -> Result<(), RepositoryError> {
        let mut table = self.table.lock().expect("exam table");
        table.writes += 1;
        let row = table.rows.get_mut(&exam.id).ok_or(RepositoryError::Vanished(exam.id))?;
        row.images.0.push(path.to_string());
        row.updated_at = OffsetDateTime::now_utc();
        *exam = row.clone();
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoredFiles {
    files: Vec<(String, ImageUpload)>,
    fail_after: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryImageStorage {
    inner: Arc<Mutex<StoredFiles>>,
}

impl MemoryImageStorage {
    /// Accepts `count` files, then fails every later write.
    pub(crate) fn failing_after(count: usize) -> Self {
        let storage = Self::default();
        storage.inner.lock().expect("storage").fail_after = Some(count);
        storage
    }

    pub(crate) fn stored_paths(&self) -> Vec<String> {
        self.inner.lock().expect("storage").files.iter().map(|(path, _)| path.clone()).collect()
    }

    pub(crate) fn stored_filenames(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("storage")
            .files
            .iter()
            .map(|(_, upload)| upload.filename.clone())
            .collect()
    }
}

#[async_trait]
impl ImageStorage for MemoryImageStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn store(&self, upload: &ImageUpload) -> Result<StoredImage, StorageError> {
        let mut inner = self.inner.lock().expect("storage");
        if inner.fail_after.is_some_and(|limit| inner.files.len() >= limit) {
            return Err(StorageError::Remote("disk full".to_string()));
        }
        let path = object_key("uploads", &upload.filename);
        inner.files.push((path.clone(), upload.clone()));
        Ok(StoredImage { path, size: upload.bytes.len() as u64, sha256: String::new() })
    }

    async fn health(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PublishedJobs {
    jobs: Vec<ExamJob>,
    broker_down: bool,
    unreachable: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingPublisher {
    inner: Arc<Mutex<PublishedJobs>>,
}

impl RecordingPublisher {
    pub(crate) fn failing() -> Self {
        let publisher = Self::default();
        publisher.inner.lock().expect("publisher").broker_down = true;
        publisher
    }

    /// Fails every call as if the broker refused the connection.
    pub(crate) fn unreachable() -> Self {
        let publisher = Self::default();
        publisher.inner.lock().expect("publisher").unreachable = true;
        publisher
    }

    pub(crate) fn published(&self) -> Vec<ExamJob> {
        self.inner.lock().expect("publisher").jobs.clone()
    }

    fn check(&self) -> Result<(), PublishError> {
        let inner = self.inner.lock().expect("publisher");
        if inner.unreachable {
            return Err(PublishError::Unreachable("connection refused".to_string()));
        }
        if inner.broker_down {
            return Err(PublishError::Rejected("exam_jobs".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, job: &ExamJob) -> Result<(), PublishError> {
        self.check()?;
        self.inner.lock().expect("publisher").jobs.push(job.clone());
        Ok(())
    }

    async fn health(&self) -> Result<(), PublishError> {
        self.check()
    }
}

pub(crate) fn json_request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) fn form_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = fields
        .iter()
        .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request body")
}

fn form_encode(value: &str) -> String {
    value
        .bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            b' ' => "+".to_string(),
            other => format!("%{other:02X}"),
        })
        .collect()
}

/// Hand-assembled `multipart/form-data` body.
#[derive(Debug, Default)]
pub(crate) struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub(crate) fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub(crate) fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub(crate) fn png(self, filename: &str) -> Self {
        self.file("images[]", filename, "image/png", b"\x89PNG\r\n\x1a\npage")
    }

    pub(crate) fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(Body::from(self.body))
            .expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
