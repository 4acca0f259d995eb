use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;

/// Field-level validation messages, keyed by input name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub(crate) fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub(crate) fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::default();
        for (field, failures) in errors.field_errors() {
            for failure in failures {
                let message = failure
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| format!("The {} field is invalid.", humanize(&field)));
                fields.add(field.to_string(), message);
            }
        }
        fields
    }
}

/// Integer input as sent by JSON clients (`5`) or form posts (`"5"`).
///
/// Any other JSON value is kept so it fails field validation instead of body parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum IntegerInput {
    Integer(i64),
    Text(String),
    Other(serde_json::Value),
}

impl IntegerInput {
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            IntegerInput::Integer(value) => Some(*value),
            IntegerInput::Text(text) => parse_integer(text),
            IntegerInput::Other(_) => None,
        }
    }
}

pub(crate) fn parse_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

/// Checks that a present value is an integer; records a message otherwise.
pub(crate) fn integer_field(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&IntegerInput>,
) -> Option<i64> {
    let value = value?;
    let parsed = value.as_i64();
    if parsed.is_none() {
        errors.add(field, format!("The {} field must be an integer.", humanize(field)));
    }
    parsed
}

/// Same as [`integer_field`] for raw multipart text. Empty text counts as absent.
pub(crate) fn integer_text_field(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    required: bool,
) -> Option<i64> {
    match value.map(str::trim).filter(|text| !text.is_empty()) {
        None => {
            if required {
                errors.add(field, format!("The {} field is required.", humanize(field)));
            }
            None
        }
        Some(text) => {
            let parsed = parse_integer(text);
            if parsed.is_none() {
                errors.add(field, format!("The {} field must be an integer.", humanize(field)));
            }
            parsed
        }
    }
}

/// Validates one uploaded image against the extension allow-list and its declared MIME type.
pub(crate) fn validate_image_upload(
    field: &str,
    filename: &str,
    content_type: &str,
    allowed_extensions: &[String],
) -> Result<(), String> {
    let not_an_image = || format!("The {field} field must be an image.");

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(not_an_image)?;

    if !allowed_extensions.iter().any(|allowed| allowed == &extension) {
        return Err(not_an_image());
    }

    let mime = content_type.trim().to_ascii_lowercase();
    if mime_allowed_for_extension(&mime, &extension) {
        Ok(())
    } else {
        Err(not_an_image())
    }
}

pub(crate) fn max_size_message(field: &str, max_kilobytes: u64) -> String {
    format!("The {field} field must not be greater than {max_kilobytes} kilobytes.")
}

fn mime_allowed_for_extension(mime: &str, extension: &str) -> bool {
    match extension {
        "jpg" | "jpeg" => matches!(mime, "image/jpeg" | "image/jpg" | "image/pjpeg"),
        "png" => mime == "image/png",
        "bmp" => matches!(mime, "image/bmp" | "image/x-ms-bmp"),
        "gif" => mime == "image/gif",
        "svg" => mime == "image/svg+xml",
        "webp" => mime == "image/webp",
        _ => false,
    }
}

pub(crate) fn humanize(field: &str) -> String {
    field.replace('_', " ")
}
