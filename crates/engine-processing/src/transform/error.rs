use thiserror::Error;

/// Why a single row could not be transformed. The row is recorded and the
/// chunk moves on, unless the job runs fail-fast.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Transformation failed: {0}")]
    Transformation(String),

    #[error("Validation failed: {rule} - {message}")]
    ValidationFailed { rule: String, message: String },

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Column '{column}' holds {found}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },
}

impl TransformError {
    /// Short code stored with the row error.
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::Transformation(_) => "TRANSFORM_FAILED",
            TransformError::ValidationFailed { .. } => "VALIDATION_FAILED",
            TransformError::MissingColumn(_) => "MISSING_COLUMN",
            TransformError::TypeMismatch { .. } => "TYPE_MISMATCH",
        }
    }
}
