#![allow(dead_code)]

use connectors::memory::{source::MemorySource, target::MemoryTarget};
use engine_config::{
    job::{JobSpec, SourceSpec, TargetSpec},
    settings::validated::{ValidatedSettings, ValidatedSettingsBuilder},
};
use engine_core::{runlog::MemoryRunLog, state::MemoryCheckpointStore};
use engine_runtime::ParallelProcessor;
use model::{
    chunk::result::JobResult,
    core::value::Value,
    execution::{load::LoadMode, target::TargetTable},
    records::row::RowData,
};
use planner::query::dialect::DialectKind;
use std::{ops::RangeInclusive, sync::Arc, time::Duration};

pub const JOB_ID: &str = "txns_to_fact";

/// Ordered on the business key, so key-based chunking applies.
pub const TXN_QUERY: &str = "SELECT txn_id, account, amount FROM txns ORDER BY txn_id";

/// No ORDER BY: positional chunking only.
pub const UNORDERED_TXN_QUERY: &str = "SELECT txn_id, account, amount FROM txns";

pub fn txn_row(id: i64) -> RowData {
    RowData::from_pairs(
        "txns",
        vec![
            ("txn_id", Value::Int(id)),
            ("account", Value::String(format!("acc-{:03}", id % 97))),
            ("amount", Value::Int((id * 37) % 1_000)),
        ],
    )
}

pub fn txn_rows(ids: RangeInclusive<i64>) -> Vec<RowData> {
    ids.map(txn_row).collect()
}

/// Same rows with a different amount, as if updated at the source.
pub fn repriced(ids: RangeInclusive<i64>) -> Vec<RowData> {
    ids.map(|id| {
        let mut row = txn_row(id);
        row.set("amount", Value::Int(-id));
        row
    })
    .collect()
}

pub fn keyed_source(rows: Vec<RowData>) -> MemorySource {
    MemorySource::new(rows).with_key_column("txn_id")
}

pub fn fact_table() -> TargetTable {
    TargetTable::new("fact_txns").with_business_key(&["txn_id"])
}

/// Plain append target; no key lookups, so large loads stay cheap.
pub fn append_table() -> TargetTable {
    TargetTable::new("fact_txns")
}

pub fn job(query: &str, table: TargetTable) -> JobSpec {
    JobSpec {
        job_id: JOB_ID.to_string(),
        source: SourceSpec {
            dialect: DialectKind::Postgres,
            url: None,
            query: query.to_string(),
        },
        target: TargetSpec { url: None, table },
        transforms: Vec::new(),
        settings: Default::default(),
    }
}

pub fn settings(mode: LoadMode) -> ValidatedSettingsBuilder {
    ValidatedSettingsBuilder::new()
        .max_workers(4)
        .load_mode(mode)
        .retry_base_delay(Duration::from_millis(1))
}

/// One source, one target and the run state shared between runs of a job.
pub struct Harness {
    pub source: MemorySource,
    pub target: MemoryTarget,
    pub store: Arc<MemoryCheckpointStore>,
    pub run_log: Arc<MemoryRunLog>,
}

impl Harness {
    pub fn new(source: MemorySource) -> Self {
        Self::with_target(source, MemoryTarget::new())
    }

    pub fn with_target(source: MemorySource, target: MemoryTarget) -> Self {
        Harness {
            source,
            target,
            store: Arc::new(MemoryCheckpointStore::new()),
            run_log: Arc::new(MemoryRunLog::new()),
        }
    }

    /// Swaps the source while keeping target, checkpoints and run log.
    pub fn reseed(&mut self, source: MemorySource) {
        self.source = source;
    }

    pub fn processor(&self, job: JobSpec, settings: ValidatedSettings) -> ParallelProcessor {
        ParallelProcessor::new(
            job,
            settings,
            Arc::new(self.source.clone()),
            Arc::new(self.target.clone()),
            self.store.clone(),
        )
        .with_run_log(self.run_log.clone())
    }

    pub async fn run(&self, job: JobSpec, settings: ValidatedSettings) -> JobResult {
        self.processor(job, settings)
            .execute()
            .await
            .expect("job ran")
    }

    /// Target rows ordered by `txn_id`.
    pub fn target_rows(&self) -> Vec<RowData> {
        let mut rows = self.target.rows();
        rows.sort_by_key(|row| row.get_value("txn_id").as_i64().unwrap_or_default());
        rows
    }

    pub fn target_ids(&self) -> Vec<i64> {
        self.target_rows()
            .iter()
            .filter_map(|row| row.get_value("txn_id").as_i64())
            .collect()
    }
}

/// Every extracted row is counted exactly once.
pub fn assert_row_identity(result: &JobResult) {
    assert_eq!(
        result.total_rows_successful + result.total_rows_failed,
        result.total_rows_processed,
        "successful + failed must equal extracted"
    );
    assert_eq!(
        result.rows_new + result.rows_changed + result.rows_unchanged,
        result.total_rows_successful,
        "new + changed + unchanged must equal successful"
    );
}
