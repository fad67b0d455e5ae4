pub mod coerce;
pub mod error;
pub mod mapping;
pub mod pipeline;
pub mod pruner;
pub mod spec;

pub use error::TransformError;
pub use pipeline::{FnTransform, RowTransform, TransformPipeline, TransformPipelineExt};
