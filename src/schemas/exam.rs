use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::validation::IntegerInput;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FinishExamRequest {
    #[serde(default)]
    #[validate(required(message = "The exam id field is required."))]
    pub(crate) exam_id: Option<IntegerInput>,
}

/// Completion notice posted by the grading worker, usually as a form.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct JobCompleteRequest {
    #[serde(default)]
    #[validate(required(message = "The exam id field is required."))]
    pub(crate) exam_id: Option<IntegerInput>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadImagesResponse {
    pub(crate) exam_id: i64,
    pub(crate) uploaded_images: usize,
    pub(crate) uploaded_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageResponse {
    pub(crate) message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}
