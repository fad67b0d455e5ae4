use crate::core::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single row that could not be transformed or loaded. The chunk it
/// belongs to keeps going; the row is counted as failed and reported here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    pub id: String,
    pub job_id: String,
    pub run_id: String,
    pub chunk_index: usize,
    pub row_index: usize,
    pub stage: ProcessingStage,
    pub error_code: String,
    pub error_message: String,
    pub row_snapshot: HashMap<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

/// The stage of chunk processing where the failure occurred
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessingStage {
    Extract,
    Transform,
    Load,
}

impl RowError {
    pub fn new(
        stage: ProcessingStage,
        chunk_index: usize,
        row_index: usize,
        error_code: &str,
        error_message: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: String::new(),
            run_id: String::new(),
            chunk_index,
            row_index,
            stage,
            error_code: error_code.to_string(),
            error_message,
            row_snapshot: HashMap::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Add the job and run the row was processed under
    pub fn with_run_context(mut self, job_id: &str, run_id: &str) -> Self {
        self.job_id = job_id.to_string();
        self.run_id = run_id.to_string();
        self
    }

    pub fn with_snapshot(mut self, snapshot: HashMap<String, Value>) -> Self {
        self.row_snapshot = snapshot;
        self
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Extract => write!(f, "Extract"),
            ProcessingStage::Transform => write!(f, "Transform"),
            ProcessingStage::Load => write!(f, "Load"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_with_context() {
        let mut snapshot = HashMap::new();
        snapshot.insert("order_id".to_string(), Value::Int(42));

        let err = RowError::new(
            ProcessingStage::Transform,
            3,
            17,
            "CAST_FAILED",
            "amount is not numeric".to_string(),
        )
        .with_run_context("orders_daily", "run-1")
        .with_snapshot(snapshot);

        assert_eq!(err.chunk_index, 3);
        assert_eq!(err.row_index, 17);
        assert_eq!(err.job_id, "orders_daily");
        assert_eq!(err.run_id, "run-1");
        assert_eq!(err.row_snapshot.get("order_id"), Some(&Value::Int(42)));
        assert!(!err.id.is_empty());
    }

    #[test]
    fn test_processing_stage_display() {
        assert_eq!(ProcessingStage::Extract.to_string(), "Extract");
        assert_eq!(ProcessingStage::Transform.to_string(), "Transform");
        assert_eq!(ProcessingStage::Load.to_string(), "Load");
    }
}
