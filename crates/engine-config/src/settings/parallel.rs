use model::{
    chunk::config::{ChunkStrategy, DEFAULT_CHUNK_SIZE},
    execution::load::{CheckpointStrategy, LoadMode},
};
use serde::{Deserialize, Serialize};

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

fn default_extract_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

/// Execution options as written in a job file. Unset fields take defaults
/// when validated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParallelSettings {
    /// Worker count; defaults to available parallelism minus one.
    #[serde(default)]
    pub max_workers: Option<usize>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_true")]
    pub enable_parallel: bool,

    #[serde(default)]
    pub checkpoint_strategy: CheckpointStrategy,

    #[serde(default)]
    pub load_mode: LoadMode,

    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default = "default_extract_retries")]
    pub max_extract_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default)]
    pub chunk_timeout_secs: Option<u64>,

    #[serde(default)]
    pub forced_strategy: Option<ChunkStrategy>,

    /// Column used for key chunking and key checkpoints instead of the first
    /// ORDER BY column.
    #[serde(default)]
    pub checkpoint_column: Option<String>,

    #[serde(default = "default_true")]
    pub clear_checkpoint_on_success: bool,

    /// Known row count; skips the counting query.
    #[serde(default)]
    pub row_count_hint: Option<u64>,

    /// Connections per pool; defaults to `max_workers`.
    #[serde(default)]
    pub pool_size: Option<usize>,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        ParallelSettings {
            max_workers: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            enable_parallel: true,
            checkpoint_strategy: CheckpointStrategy::Auto,
            load_mode: LoadMode::Insert,
            fail_fast: false,
            max_extract_retries: default_extract_retries(),
            retry_base_delay_ms: default_retry_delay_ms(),
            chunk_timeout_secs: None,
            forced_strategy: None,
            checkpoint_column: None,
            clear_checkpoint_on_success: true,
            row_count_hint: None,
            pool_size: None,
        }
    }
}

/// Available parallelism minus one, at least one.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_takes_defaults() {
        let settings: ParallelSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ParallelSettings::default());
    }

    #[test]
    fn test_parses_option_names() {
        let settings: ParallelSettings = serde_json::from_str(
            r#"{
                "max_workers": 4,
                "chunk_size": 1000,
                "checkpoint_strategy": "ROW_SKIP",
                "load_mode": "SCD1",
                "forced_strategy": "OFFSET_LIMIT"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.max_workers, Some(4));
        assert_eq!(settings.checkpoint_strategy, CheckpointStrategy::RowSkip);
        assert_eq!(settings.load_mode, LoadMode::Upsert);
        assert_eq!(settings.forced_strategy, Some(ChunkStrategy::OffsetLimit));
    }

    #[test]
    fn test_default_workers_is_at_least_one() {
        assert!(default_max_workers() >= 1);
    }
}
