use crate::settings::{
    error::SettingsError,
    parallel::{ParallelSettings, default_max_workers},
    validated::{ValidatedSettings, ValidatedSettingsBuilder},
};
use model::{
    chunk::config::ChunkStrategy,
    execution::{load::CheckpointStrategy, load::LoadMode, target::TargetTable},
};
use std::time::Duration;
use tracing::{info, warn};

const TYPICAL_CHUNK_RANGE: (u64, u64) = (100, 100_000);

/// Checks a job's settings against each other and the target table before
/// any work starts.
pub struct SettingsValidator<'a> {
    target: &'a TargetTable,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(target: &'a TargetTable) -> Self {
        Self { target }
    }

    pub fn validate(&self, settings: &ParallelSettings) -> Result<ValidatedSettings, SettingsError> {
        let mut builder = ValidatedSettingsBuilder::new();
        let mut errors: Vec<String> = Vec::new();

        self.validate_workers(settings, &mut builder, &mut errors);
        self.validate_chunk_size(settings, &mut builder, &mut errors);
        self.validate_load_mode(settings, &mut builder, &mut errors);
        self.validate_checkpointing(settings, &mut builder, &mut errors);

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        builder = builder
            .fail_fast(settings.fail_fast)
            .max_extract_retries(settings.max_extract_retries)
            .retry_base_delay(Duration::from_millis(settings.retry_base_delay_ms))
            .chunk_timeout(
                settings
                    .chunk_timeout_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            )
            .clear_checkpoint_on_success(settings.clear_checkpoint_on_success)
            .row_count_hint(settings.row_count_hint);

        self.check_conflicts(&builder)?;

        let validated = builder.build();
        self.log_validated_settings(&validated);
        Ok(validated)
    }

    fn validate_workers(
        &self,
        settings: &ParallelSettings,
        builder: &mut ValidatedSettingsBuilder,
        errors: &mut Vec<String>,
    ) {
        let workers = match settings.max_workers {
            Some(0) => {
                errors.push("max_workers must be at least 1".to_string());
                return;
            }
            Some(n) => n,
            None => default_max_workers(),
        };
        builder.max_workers = Some(workers);
        builder.enable_parallel = Some(settings.enable_parallel);

        if let Some(pool) = settings.pool_size
            && pool < workers
        {
            errors.push(format!(
                "pool_size {pool} is smaller than max_workers {workers}; every worker needs its own connection"
            ));
            return;
        }
        builder.pool_size = settings.pool_size;
    }

    fn validate_chunk_size(
        &self,
        settings: &ParallelSettings,
        builder: &mut ValidatedSettingsBuilder,
        errors: &mut Vec<String>,
    ) {
        if settings.chunk_size == 0 {
            errors.push("chunk_size must be greater than 0".to_string());
            return;
        }
        let (low, high) = TYPICAL_CHUNK_RANGE;
        if settings.chunk_size < low || settings.chunk_size > high {
            warn!(
                chunk_size = settings.chunk_size,
                "Chunk size is outside the typical {low}..={high} range"
            );
        }
        builder.chunk_size = Some(settings.chunk_size);
    }

    fn validate_load_mode(
        &self,
        settings: &ParallelSettings,
        builder: &mut ValidatedSettingsBuilder,
        errors: &mut Vec<String>,
    ) {
        if settings.load_mode.needs_business_key() && self.target.business_key.is_empty() {
            errors.push(format!(
                "load_mode {} requires a business key on target table {}",
                settings.load_mode, self.target.name
            ));
            return;
        }
        builder.load_mode = Some(settings.load_mode);
    }

    fn validate_checkpointing(
        &self,
        settings: &ParallelSettings,
        builder: &mut ValidatedSettingsBuilder,
        errors: &mut Vec<String>,
    ) {
        let strategy = settings.checkpoint_strategy;
        if strategy == CheckpointStrategy::Key
            && matches!(
                settings.forced_strategy,
                Some(ChunkStrategy::OffsetLimit | ChunkStrategy::RowidBased)
            )
        {
            errors.push(
                "checkpoint_strategy KEY needs key-based chunking but forced_strategy is positional"
                    .to_string(),
            );
            return;
        }
        if strategy == CheckpointStrategy::RowSkip && settings.enable_parallel {
            warn!("ROW_SKIP checkpoints need one ordered pass; forcing sequential execution");
        }
        builder.checkpoint_strategy = Some(strategy);
        builder.forced_strategy = settings.forced_strategy;
        builder.checkpoint_column = settings
            .checkpoint_column
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
    }

    /// Combinations that can be rejected before the plan exists. SCD2 with
    /// parallel chunks is checked again once the planner has picked a
    /// strategy.
    fn check_conflicts(&self, builder: &ValidatedSettingsBuilder) -> Result<(), SettingsError> {
        let parallel = builder.enable_parallel.unwrap_or(true)
            && builder.checkpoint_strategy != Some(CheckpointStrategy::RowSkip)
            && builder.max_workers.unwrap_or(1) > 1;
        let positional = matches!(
            builder.forced_strategy,
            Some(ChunkStrategy::OffsetLimit | ChunkStrategy::RowidBased)
        );
        if builder.load_mode == Some(LoadMode::Scd2) && parallel && positional {
            return Err(SettingsError::Conflict(
                "SCD2 with parallel execution requires KEY_BASED chunking".to_string(),
            ));
        }
        Ok(())
    }

    fn log_validated_settings(&self, settings: &ValidatedSettings) {
        info!(
            max_workers = settings.max_workers,
            chunk_size = settings.chunk_size,
            parallel = settings.parallel_requested(),
            checkpoint = %settings.checkpoint_strategy,
            load_mode = %settings.load_mode,
            fail_fast = settings.fail_fast,
            "Settings validated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TargetTable {
        TargetTable::new("dim_customer").with_business_key(&["customer_id"])
    }

    #[test]
    fn test_defaults_validate() {
        let validated = SettingsValidator::new(&table())
            .validate(&ParallelSettings::default())
            .unwrap();
        assert_eq!(validated.chunk_size, 50_000);
        assert!(validated.max_workers >= 1);
        assert_eq!(validated.pool_size, validated.max_workers);
        assert!(validated.clear_checkpoint_on_success);
    }

    #[test]
    fn test_collects_every_problem() {
        let settings = ParallelSettings {
            max_workers: Some(0),
            chunk_size: 0,
            load_mode: LoadMode::Upsert,
            ..Default::default()
        };
        let err = SettingsValidator::new(&TargetTable::new("t"))
            .validate(&settings)
            .unwrap_err();
        match err {
            SettingsError::ValidationFailed(problems) => assert_eq!(problems.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_undersized_pool_is_rejected() {
        let settings = ParallelSettings {
            max_workers: Some(4),
            pool_size: Some(2),
            ..Default::default()
        };
        assert!(SettingsValidator::new(&table()).validate(&settings).is_err());
    }

    #[test]
    fn test_row_skip_forces_sequential() {
        let settings = ParallelSettings {
            max_workers: Some(4),
            enable_parallel: true,
            checkpoint_strategy: CheckpointStrategy::RowSkip,
            ..Default::default()
        };
        let validated = SettingsValidator::new(&table()).validate(&settings).unwrap();
        assert!(validated.requires_sequential());
        assert!(!validated.parallel_requested());
    }

    #[test]
    fn test_scd2_parallel_with_positional_chunks_conflicts() {
        let settings = ParallelSettings {
            max_workers: Some(4),
            load_mode: LoadMode::Scd2,
            forced_strategy: Some(ChunkStrategy::OffsetLimit),
            ..Default::default()
        };
        assert!(matches!(
            SettingsValidator::new(&table()).validate(&settings),
            Err(SettingsError::Conflict(_))
        ));
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let settings = ParallelSettings {
            chunk_timeout_secs: Some(0),
            ..Default::default()
        };
        let validated = SettingsValidator::new(&table()).validate(&settings).unwrap();
        assert_eq!(validated.chunk_timeout, None);
    }
}
