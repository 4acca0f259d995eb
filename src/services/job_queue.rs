use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::QueueSettings;
use crate::db::models::Exam;

const PERSISTENT_DELIVERY: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Message body consumed by the grading worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExamJob {
    pub(crate) exam_id: i64,
    pub(crate) user_id: i64,
    pub(crate) images: Vec<String>,
}

impl From<&Exam> for ExamJob {
    fn from(exam: &Exam) -> Self {
        Self { exam_id: exam.id, user_id: exam.user_id, images: exam.images().to_vec() }
    }
}

#[derive(Debug, Error)]
pub(crate) enum PublishError {
    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("message broker unreachable: {0}")]
    Unreachable(String),
    #[error("message broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("broker rejected message for queue {0}")]
    Rejected(String),
}

#[async_trait]
pub(crate) trait JobPublisher: Send + Sync {
    /// Enqueues one persistent message. No retry on failure.
    async fn publish(&self, job: &ExamJob) -> Result<(), PublishError>;

    async fn health(&self) -> Result<(), PublishError>;
}

/// Publishes to RabbitMQ, opening a fresh connection and channel for every message.
#[derive(Debug, Clone)]
pub(crate) struct AmqpJobPublisher {
    url: String,
    queue: String,
}

impl AmqpJobPublisher {
    pub(crate) fn new(settings: &QueueSettings) -> Self {
        Self { url: settings.amqp_url(), queue: settings.queue_name.clone() }
    }

    async fn connect(&self) -> Result<Connection, PublishError> {
        Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|err| PublishError::Unreachable(err.to_string()))
    }

    async fn publish_on(
        &self,
        connection: &Connection,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        let channel = connection.create_channel().await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions { durable: true, ..QueueDeclareOptions::default() },
                FieldTable::default(),
            )
            .await?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT_DELIVERY)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        channel.close(REPLY_SUCCESS, "OK").await?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(PublishError::Rejected(self.queue.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for AmqpJobPublisher {
    async fn publish(&self, job: &ExamJob) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(job)?;
        let connection = self.connect().await?;

        let result = self.publish_on(&connection, &payload).await;

        if let Err(err) = connection.close(REPLY_SUCCESS, "OK").await {
            tracing::warn!(error = %err, "Failed to close broker connection");
        }

        result?;
        tracing::info!(
            exam_id = job.exam_id,
            queue = %self.queue,
            image_count = job.images.len(),
            "Published exam job"
        );
        Ok(())
    }

    async fn health(&self) -> Result<(), PublishError> {
        let connection = self.connect().await?;
        connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}
