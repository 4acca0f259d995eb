use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::extract::JsonOrForm;
use crate::api::validation::{
    integer_field, integer_text_field, max_size_message, validate_image_upload, FieldErrors,
    IntegerInput,
};
use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::schemas::exam::{
    FinishExamRequest, JobCompleteRequest, MessageResponse, UploadImagesResponse,
};
use crate::services::exam_workflow;
use crate::services::storage::ImageUpload;


const IMAGE_FIELDS: &[&str] = &["images[]", "images"];

pub(crate) fn router(settings: &Settings) -> Router<AppState> {
    Router::new()
        .route(
            "/upload-image",
            post(upload_image)
                .layer(DefaultBodyLimit::max(settings.storage().max_request_body_bytes())),
        )
        .route("/finish-exam", post(finish_exam))
        .route("/api/job-complete", post(job_complete))
}

/// Raw multipart input, collected in full before anything is validated.
#[derive(Debug, Default)]
struct UploadForm {
    user_id: Option<String>,
    exam_id: Option<String>,
    files: Vec<UploadedFile>,
}

#[derive(Debug)]
struct UploadedFile {
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
    oversized: bool,
}

async fn read_upload_form(
    multipart: &mut Multipart,
    max_bytes: u64,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "user_id" | "exam_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest(format!("Invalid value for {name}")))?;
                if name == "user_id" {
                    form.user_id = Some(text);
                } else {
                    form.exam_id = Some(text);
                }
            }
            name if IMAGE_FIELDS.contains(&name) => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let mut bytes = Vec::new();
                let mut oversized = false;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
                {
                    if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                        oversized = true;
                        break;
                    }
                    bytes.extend_from_slice(&chunk);
                }
                form.files.push(UploadedFile { filename, content_type, bytes, oversized });
            }
            _ => {}
        }
    }

    Ok(form)
}

struct ValidatedUpload {
    user_id: i64,
    exam_id: Option<i64>,
    images: Vec<ImageUpload>,
}

fn validate_upload_form(
    form: UploadForm,
    settings: &Settings,
) -> Result<ValidatedUpload, ApiError> {
    let storage = settings.storage();
    let mut errors = FieldErrors::default();

    let user_id = integer_text_field(&mut errors, "user_id", form.user_id.as_deref(), true);
    let exam_id = integer_text_field(&mut errors, "exam_id", form.exam_id.as_deref(), false);

    if form.files.is_empty() {
        errors.add("images", "The images field is required.");
    }

    let mut images = Vec::with_capacity(form.files.len());
    for (index, file) in form.files.into_iter().enumerate() {
        let field = format!("images.{index}");

        let Some(filename) = file.filename else {
            errors.add(field.clone(), format!("The {field} field must be a file."));
            continue;
        };
        if file.oversized {
            errors.add(field.clone(), max_size_message(&field, storage.max_upload_size_kb));
            continue;
        }
        if file.bytes.is_empty() {
            errors.add(field.clone(), format!("The {field} failed to upload."));
            continue;
        }

        let content_type = file.content_type.unwrap_or_default();
        if let Err(message) = validate_image_upload(
            &field,
            &filename,
            &content_type,
            &storage.allowed_image_extensions,
        ) {
            errors.add(field, message);
            continue;
        }

        images.push(ImageUpload { filename, content_type, bytes: file.bytes.into() });
    }

    errors.into_result()?;

    let user_id = user_id.ok_or_else(|| ApiError::Internal("user_id missing".to_string()))?;
    Ok(ValidatedUpload { user_id, exam_id, images })
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadImagesResponse>, ApiError> {
    let max_bytes = state.settings().storage().max_upload_bytes();
    let form = read_upload_form(&mut multipart, max_bytes).await?;
    let upload = validate_upload_form(form, state.settings())?;

    let outcome = exam_workflow::upload_images(
        state.exams(),
        state.storage(),
        upload.user_id,
        upload.exam_id,
        &upload.images,
    )
    .await?;

    Ok(Json(UploadImagesResponse {
        exam_id: outcome.exam_id,
        uploaded_images: outcome.image_count,
        uploaded_paths: outcome.uploaded_paths,
    }))
}

async fn finish_exam(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<FinishExamRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let exam_id = required_exam_id(&payload, payload.exam_id.as_ref())?;

    let job = exam_workflow::finish_exam(
        state.exams(),
        state.publisher(),
        exam_id,
        state.settings().exam().min_images,
    )
    .await?;
    tracing::info!(exam_id = job.exam_id, user_id = job.user_id, "Exam finished");

    Ok(Json(MessageResponse::new("Exam finished and job sent to queue")))
}

async fn job_complete(
    JsonOrForm(payload): JsonOrForm<JobCompleteRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let exam_id = required_exam_id(&payload, payload.exam_id.as_ref())?;
    let message = payload.message.as_deref().filter(|message| !message.trim().is_empty());

    exam_workflow::record_job_completion(exam_id, message);

    Ok(Json(MessageResponse::new("Notification logged")))
}

fn required_exam_id(
    payload: &impl Validate,
    exam_id: Option<&IntegerInput>,
) -> Result<i64, ApiError> {
    if let Err(errors) = payload.validate() {
        return Err(ApiError::Validation(errors.into()));
    }
    let mut errors = FieldErrors::default();
    let exam_id = integer_field(&mut errors, "exam_id", exam_id);
    errors.into_result()?;
    exam_id.ok_or_else(|| ApiError::Internal("exam_id missing".to_string()))
}
