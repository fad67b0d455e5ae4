use engine_core::retry::RetryPolicy;
use model::{
    chunk::config::{ChunkStrategy, DEFAULT_CHUNK_SIZE},
    execution::load::{CheckpointStrategy, LoadMode},
};
use std::time::Duration;

/// Immutable, validated configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSettings {
    pub max_workers: usize,
    pub pool_size: usize,
    pub chunk_size: u64,
    /// Parallel execution as requested; the coordinator may still run
    /// sequentially when the plan has a single chunk.
    pub enable_parallel: bool,
    pub checkpoint_strategy: CheckpointStrategy,
    pub load_mode: LoadMode,
    pub fail_fast: bool,
    pub max_extract_retries: u32,
    pub retry_base_delay: Duration,
    pub chunk_timeout: Option<Duration>,
    pub forced_strategy: Option<ChunkStrategy>,
    pub checkpoint_column: Option<String>,
    pub clear_checkpoint_on_success: bool,
    pub row_count_hint: Option<u64>,
}

impl ValidatedSettings {
    pub fn from_builder(builder: ValidatedSettingsBuilder) -> Self {
        let max_workers = builder.max_workers.unwrap_or(1).max(1);
        Self {
            max_workers,
            pool_size: builder.pool_size.unwrap_or(max_workers),
            chunk_size: builder.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            enable_parallel: builder.enable_parallel.unwrap_or(true),
            checkpoint_strategy: builder.checkpoint_strategy.unwrap_or_default(),
            load_mode: builder.load_mode.unwrap_or_default(),
            fail_fast: builder.fail_fast.unwrap_or(false),
            max_extract_retries: builder.max_extract_retries.unwrap_or(3),
            retry_base_delay: builder
                .retry_base_delay
                .unwrap_or(Duration::from_millis(200)),
            chunk_timeout: builder.chunk_timeout,
            forced_strategy: builder.forced_strategy,
            checkpoint_column: builder.checkpoint_column,
            clear_checkpoint_on_success: builder.clear_checkpoint_on_success.unwrap_or(true),
            row_count_hint: builder.row_count_hint,
        }
    }

    /// Row-skip checkpoints only work when rows are read in one ordered pass.
    pub fn requires_sequential(&self) -> bool {
        self.checkpoint_strategy == CheckpointStrategy::RowSkip
    }

    pub fn parallel_requested(&self) -> bool {
        self.enable_parallel && !self.requires_sequential() && self.max_workers > 1
    }

    pub fn extract_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::for_extract(self.max_extract_retries, self.retry_base_delay)
    }
}

#[derive(Debug, Default)]
pub struct ValidatedSettingsBuilder {
    pub max_workers: Option<usize>,
    pub pool_size: Option<usize>,
    pub chunk_size: Option<u64>,
    pub enable_parallel: Option<bool>,
    pub checkpoint_strategy: Option<CheckpointStrategy>,
    pub load_mode: Option<LoadMode>,
    pub fail_fast: Option<bool>,
    pub max_extract_retries: Option<u32>,
    pub retry_base_delay: Option<Duration>,
    pub chunk_timeout: Option<Duration>,
    pub forced_strategy: Option<ChunkStrategy>,
    pub checkpoint_column: Option<String>,
    pub clear_checkpoint_on_success: Option<bool>,
    pub row_count_hint: Option<u64>,
}

impl ValidatedSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn enable_parallel(mut self, enable_parallel: bool) -> Self {
        self.enable_parallel = Some(enable_parallel);
        self
    }

    pub fn checkpoint_strategy(mut self, strategy: CheckpointStrategy) -> Self {
        self.checkpoint_strategy = Some(strategy);
        self
    }

    pub fn load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = Some(load_mode);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn max_extract_retries(mut self, retries: u32) -> Self {
        self.max_extract_retries = Some(retries);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn forced_strategy(mut self, strategy: Option<ChunkStrategy>) -> Self {
        self.forced_strategy = strategy;
        self
    }

    pub fn checkpoint_column(mut self, column: Option<String>) -> Self {
        self.checkpoint_column = column;
        self
    }

    pub fn clear_checkpoint_on_success(mut self, clear: bool) -> Self {
        self.clear_checkpoint_on_success = Some(clear);
        self
    }

    pub fn row_count_hint(mut self, hint: Option<u64>) -> Self {
        self.row_count_hint = hint;
        self
    }

    pub fn pool_size(mut self, size: Option<usize>) -> Self {
        self.pool_size = size;
        self
    }

    pub fn build(self) -> ValidatedSettings {
        ValidatedSettings::from_builder(self)
    }
}
