use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::models::Exam;

pub(crate) const COLUMNS: &str = "id, user_id, images, created_at, updated_at";

#[derive(Debug, Error)]
pub(crate) enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("exam {0} disappeared while it was being updated")]
    Vanished(i64),
}

/// Durable store for [`Exam`] records.
#[async_trait]
pub(crate) trait ExamRepository: Send + Sync {
    /// Looks an exam up by id; `Ok(None)` when no record matches.
    async fn find_by_id(&self, id: i64) -> Result<Option<Exam>, RepositoryError>;

    /// Persists a new exam owned by `user_id` with an empty image list.
    async fn create(&self, user_id: i64) -> Result<Exam, RepositoryError>;

    /// Appends `path` to the exam's image list and refreshes `exam` from the stored row.
    ///
    /// The append happens inside the store, so concurrent calls for the same exam
    /// never drop each other's paths.
    async fn add_image(&self, exam: &mut Exam, path: &str) -> Result<(), RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgExamRepository {
    pool: PgPool,
}

impl PgExamRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamRepository for PgExamRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Exam>, RepositoryError> {
        let exam = sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exam)
    }

    async fn create(&self, user_id: i64) -> Result<Exam, RepositoryError> {
        let exam = sqlx::query_as::<_, Exam>(&format!(
            "INSERT INTO exams (user_id, images) VALUES ($1, '[]'::jsonb) RETURNING {COLUMNS}"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exam)
    }

    async fn add_image(&self, exam: &mut Exam, path: &str) -> Result<(), RepositoryError> {
        let updated = sqlx::query_as::<_, Exam>(&format!(
            "UPDATE exams
             SET images = images || jsonb_build_array($2::text),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        ))
        .bind(exam.id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::Vanished(exam.id))?;

        *exam = updated;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
