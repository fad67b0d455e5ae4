pub mod chunk;
pub mod error;
pub mod merge;
pub mod retry;
pub mod transform;
