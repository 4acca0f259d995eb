use thiserror::Error;

use crate::core::metrics as app_metrics;
use crate::repositories::exams::{ExamRepository, RepositoryError};
use crate::services::job_queue::{ExamJob, JobPublisher, PublishError};
use crate::services::storage::{ImageStorage, ImageUpload, StorageError};

#[derive(Debug, Error)]
pub(crate) enum WorkflowError {
    #[error("exam {0} not found")]
    ExamNotFound(i64),
    #[error("exam {exam_id} has {count} of {required} required images")]
    NotEnoughImages { exam_id: i64, count: usize, required: usize },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadOutcome {
    pub(crate) exam_id: i64,
    pub(crate) image_count: usize,
    pub(crate) uploaded_paths: Vec<String>,
}

/// Stores each upload in request order and appends its path to the exam.
///
/// Without `exam_id` a new exam owned by `user_id` is created first. A missing exam
/// is reported before any file is written. Files already stored stay attached if a
/// later one fails.
pub(crate) async fn upload_images(
    exams: &dyn ExamRepository,
    storage: &dyn ImageStorage,
    user_id: i64,
    exam_id: Option<i64>,
    uploads: &[ImageUpload],
) -> Result<UploadOutcome, WorkflowError> {
    let mut exam = match exam_id {
        Some(id) => exams.find_by_id(id).await?.ok_or(WorkflowError::ExamNotFound(id))?,
        None => {
            let exam = exams.create(user_id).await?;
            tracing::info!(exam_id = exam.id, user_id, "Created exam");
            exam
        }
    };

    let mut uploaded_paths = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let stored = storage.store(upload).await?;
        exams.add_image(&mut exam, &stored.path).await?;
        metrics::counter!(app_metrics::IMAGES_UPLOADED).increment(1);
        tracing::info!(
            exam_id = exam.id,
            path = %stored.path,
            bytes = stored.size,
            sha256 = %stored.sha256,
            image_count = exam.image_count(),
            "Attached image to exam"
        );
        uploaded_paths.push(stored.path);
    }

    Ok(UploadOutcome { exam_id: exam.id, image_count: exam.image_count(), uploaded_paths })
}

/// Publishes the grading job for a complete exam.
///
/// Not idempotent: every successful call enqueues another message.
pub(crate) async fn finish_exam(
    exams: &dyn ExamRepository,
    publisher: &dyn JobPublisher,
    exam_id: i64,
    min_images: usize,
) -> Result<ExamJob, WorkflowError> {
    let exam = exams.find_by_id(exam_id).await?.ok_or(WorkflowError::ExamNotFound(exam_id))?;

    if !exam.has_enough_images(min_images) {
        return Err(WorkflowError::NotEnoughImages {
            exam_id,
            count: exam.image_count(),
            required: min_images,
        });
    }

    let job = ExamJob::from(&exam);
    if let Err(err) = publisher.publish(&job).await {
        metrics::counter!(app_metrics::JOB_PUBLISH_FAILURES).increment(1);
        return Err(err.into());
    }
    metrics::counter!(app_metrics::JOBS_PUBLISHED).increment(1);

    Ok(job)
}

/// Records a completion notice from the grading worker. Never consults the exam store.
pub(crate) fn record_job_completion(exam_id: i64, message: Option<&str>) {
    metrics::counter!(app_metrics::JOB_NOTIFICATIONS).increment(1);
    tracing::info!(
        exam_id,
        message = message.unwrap_or("None"),
        "Job complete notification received"
    );
}
