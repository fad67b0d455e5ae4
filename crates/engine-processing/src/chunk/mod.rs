pub mod processor;

pub use processor::{ChunkOutcome, ChunkProcessor, ChunkState, ProcessorOptions};
