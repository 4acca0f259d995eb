use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) const IMAGES_UPLOADED: &str = "exam_images_uploaded_total";
pub(crate) const JOBS_PUBLISHED: &str = "exam_jobs_published_total";
pub(crate) const JOB_PUBLISH_FAILURES: &str = "exam_job_publish_failures_total";
pub(crate) const JOB_NOTIFICATIONS: &str = "exam_job_notifications_total";

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    metrics::describe_counter!(IMAGES_UPLOADED, "Exam images stored and attached to an exam");
    metrics::describe_counter!(JOBS_PUBLISHED, "Grading jobs published to the exam queue");
    metrics::describe_counter!(JOB_PUBLISH_FAILURES, "Grading job publish attempts that failed");
    metrics::describe_counter!(JOB_NOTIFICATIONS, "Job completion notifications received");
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
