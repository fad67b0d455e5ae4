use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type a coerced column is converted to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Int,
    Float,
    Text,
    Boolean,
}

/// One declared row transform. Job files list these in the order they run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformSpec {
    /// Source column name to target column name.
    Rename(BTreeMap<String, String>),
    Drop(Vec<String>),
    Keep(Vec<String>),
    Coerce { column: String, to: TargetKind },
    SetEntity(String),
}
