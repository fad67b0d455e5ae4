pub mod checkpoint;
pub mod coordinator;
pub mod fingerprint;
pub mod worker;

pub use coordinator::{ParallelProcessor, RunPlan};
