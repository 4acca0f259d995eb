pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::repositories::exams::PgExamRepository;
use crate::services::job_queue::{AmqpJobPublisher, JobPublisher};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let storage = services::storage::from_settings(&settings).await?;
    let publisher = AmqpJobPublisher::new(settings.queue());
    if let Err(err) = publisher.health().await {
        tracing::warn!(error = %err, "Message broker unreachable; finishing exams will fail until it recovers");
    }

    tracing::info!(
        storage = storage.backend(),
        queue = %settings.queue().queue_name,
        min_images = settings.exam().min_images,
        "Exam intake collaborators ready"
    );

    let state = AppState::new(
        settings,
        Arc::new(PgExamRepository::new(db_pool.clone())),
        storage,
        Arc::new(publisher),
    );

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Exam intake API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    db_pool.close().await;
    tracing::info!("Database pool closed");

    result?;

    Ok(())
}
