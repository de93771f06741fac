use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("teacher {0} not found")]
    NotFound(Uuid),
    #[error("version conflict for teacher {teacher_id}: expected {expected}")]
    Conflict { teacher_id: Uuid, expected: i64 },
    #[error("teacher named {0:?} already exists")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{0}")]
    Validation(String),
    #[error("Teacher {0} not found")]
    TeacherNotFound(Uuid),
    #[error("Review {review_id} not found for teacher {teacher_id}")]
    ReviewNotFound { teacher_id: Uuid, review_id: String },
    #[error("Teacher {teacher_id} was modified concurrently; gave up after {attempts} attempts")]
    Conflict { teacher_id: Uuid, attempts: usize },
    #[error("store failure: {0}")]
    Store(#[source] StoreError),
}

impl ReviewError {
    pub fn validation(message: impl Into<String>) -> Self {
        ReviewError::Validation(message.into())
    }

    /// HTTP-equivalent status for the caller's transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ReviewError::Validation(_) => 400,
            ReviewError::TeacherNotFound(_) | ReviewError::ReviewNotFound { .. } => 404,
            ReviewError::Conflict { .. } => 409,
            ReviewError::Store(_) => 500,
        }
    }
}

impl From<StoreError> for ReviewError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => ReviewError::TeacherNotFound(id),
            StoreError::Duplicate(name) => {
                ReviewError::Validation(format!("Teacher {name:?} already exists"))
            }
            other => ReviewError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let id = Uuid::new_v4();
        assert_eq!(ReviewError::validation("bad").status_code(), 400);
        assert_eq!(ReviewError::TeacherNotFound(id).status_code(), 404);
        assert_eq!(
            ReviewError::ReviewNotFound {
                teacher_id: id,
                review_id: "r-1".to_string()
            }
            .status_code(),
            404
        );
        assert_eq!(
            ReviewError::Conflict {
                teacher_id: id,
                attempts: 3
            }
            .status_code(),
            409
        );
        assert_eq!(
            ReviewError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).status_code(),
            500
        );
    }

    #[test]
    fn store_errors_map_to_review_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ReviewError::from(StoreError::NotFound(id)),
            ReviewError::TeacherNotFound(found) if found == id
        ));
        assert!(matches!(
            ReviewError::from(StoreError::Duplicate("Asha Rao".to_string())),
            ReviewError::Validation(_)
        ));
        assert!(matches!(
            ReviewError::from(StoreError::Conflict {
                teacher_id: id,
                expected: 4
            }),
            ReviewError::Store(StoreError::Conflict { .. })
        ));
    }
}
