use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Threshold used when no `EXAM_MIN_IMAGES` override is configured.
pub(crate) const DEFAULT_MIN_IMAGES: usize = 10;

/// An exam being assembled from uploaded page images.
///
/// `images` holds storage paths in upload order. The column is `NOT NULL DEFAULT '[]'`
/// so a loaded record never carries a missing list.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) images: Json<Vec<String>>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl Exam {
    pub(crate) fn new(id: i64, user_id: i64, created_at: OffsetDateTime) -> Self {
        Self { id, user_id, images: Json(Vec::new()), created_at, updated_at: created_at }
    }

    pub(crate) fn images(&self) -> &[String] {
        &self.images.0
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images.0.len()
    }

    pub(crate) fn has_enough_images(&self, min_images: usize) -> bool {
        self.image_count() >= min_images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam_with_images(count: usize) -> Exam {
        let mut exam = Exam::new(1, 7, OffsetDateTime::now_utc());
        exam.images.0 = (0..count).map(|idx| format!("uploads/{idx}.png")).collect();
        exam
    }

    #[test]
    fn new_exam_starts_without_images() {
        let exam = Exam::new(3, 42, OffsetDateTime::now_utc());
        assert_eq!(exam.user_id, 42);
        assert!(exam.images().is_empty());
        assert_eq!(exam.created_at, exam.updated_at);
    }

    #[test]
    fn has_enough_images_boundary() {
        assert!(!exam_with_images(0).has_enough_images(DEFAULT_MIN_IMAGES));
        assert!(!exam_with_images(9).has_enough_images(DEFAULT_MIN_IMAGES));
        assert!(exam_with_images(10).has_enough_images(DEFAULT_MIN_IMAGES));
        assert!(exam_with_images(11).has_enough_images(DEFAULT_MIN_IMAGES));
    }

    #[test]
    fn has_enough_images_respects_custom_threshold() {
        let exam = exam_with_images(3);
        assert!(exam.has_enough_images(3));
        assert!(!exam.has_enough_images(4));
    }
}
