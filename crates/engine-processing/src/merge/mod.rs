pub mod classify;
pub mod merger;

pub use classify::{DigestIndex, RowClass};
pub use merger::{KeyedRow, MergeError, MergePlan, PlannedRow, ScdMerger};
