//! In-process record source and target. Used by tests and dry runs.

pub mod source;
pub mod target;

pub use source::MemorySource;
pub use target::MemoryTarget;
