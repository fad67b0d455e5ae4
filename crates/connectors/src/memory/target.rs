use crate::{
    error::{ConnectorError, DbError},
    target::{ExistingRow, OpOutcome, TargetConnection, TargetConnector, WriteOp},
};
use async_trait::async_trait;
use model::{
    core::value::Value,
    execution::target::TargetTable,
    records::row::{FieldValue, RowData},
};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

/// Decides whether the target refuses a row: `Some((code, message))` rejects.
pub type RowRejector = Arc<dyn Fn(&RowData) -> Option<(String, String)> + Send + Sync>;

#[derive(Default)]
struct TableState {
    rows: Vec<RowData>,
    commits: usize,
    rollbacks: usize,
    truncations: usize,
    stray_rollbacks: usize,
    failing_commits: u32,
    failing_lookups: u32,
}

/// A shared in-memory table. Every connection stages its writes and
/// publishes them atomically on commit.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TableState>>,
    rejector: Option<RowRejector>,
}

impl fmt::Debug for MemoryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTarget")
            .field("rows", &self.lock().rows.len())
            .finish()
    }
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<RowData>) -> Self {
        let target = Self::default();
        target.lock().rows = rows;
        target
    }

    pub fn with_rejector(mut self, rejector: RowRejector) -> Self {
        self.rejector = Some(rejector);
        self
    }

    /// The next `times` commits fail with a retryable error.
    pub fn fail_next_commits(&self, times: u32) {
        self.lock().failing_commits = times;
    }

    /// The next `times` existing-row lookups fail with a retryable error.
    pub fn fail_next_lookups(&self, times: u32) {
        self.lock().failing_lookups = times;
    }

    pub fn rows(&self) -> Vec<RowData> {
        self.lock().rows.clone()
    }

    /// Rows whose current-version flag is set.
    pub fn current_rows(&self, flag: &str) -> Vec<RowData> {
        self.lock()
            .rows
            .iter()
            .filter(|row| row.get_value(flag).as_bool().unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn truncations(&self) -> usize {
        self.lock().truncations
    }

    /// Rollbacks issued while no transaction was open.
    pub fn stray_rollbacks(&self) -> usize {
        self.lock().stray_rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TargetConnector for MemoryTarget {
    async fn connect(&self) -> Result<Box<dyn TargetConnection>, ConnectorError> {
        Ok(Box::new(MemoryTargetConnection {
            target: self.clone(),
            staged: None,
        }))
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryTargetConnection {
    target: MemoryTarget,
    staged: Option<Vec<WriteOp>>,
}

fn matches_key(row: &RowData, key: &[FieldValue]) -> bool {
    key.iter().all(|k| row.get_value(&k.name).equal(&k.value))
}

fn replay(rows: &mut Vec<RowData>, op: WriteOp) {
    match op {
        WriteOp::Insert { row } => rows.push(row),
        WriteOp::Overwrite { key, row } => {
            for existing in rows.iter_mut().filter(|r| matches_key(r, &key)) {
                for field in &row.field_values {
                    existing.set(&field.name, field.value.clone());
                }
            }
        }
        WriteOp::NewVersion {
            key,
            close,
            current,
            row,
        } => {
            for existing in rows
                .iter_mut()
                .filter(|r| matches_key(r, &key) && r.get_value(&current.name).equal(&current.value))
            {
                for field in &close {
                    existing.set(&field.name, field.value.clone());
                }
            }
            rows.push(row);
        }
    }
}

#[async_trait]
impl TargetConnection for MemoryTargetConnection {
    async fn existing_rows(
        &mut self,
        table: &TargetTable,
        keys: &[Vec<Value>],
        current_only: bool,
    ) -> Result<Vec<ExistingRow>, DbError> {
        let mut state = self.target.lock();
        if state.failing_lookups > 0 {
            state.failing_lookups -= 1;
            return Err(DbError::Unavailable("lookup interrupted".to_string()));
        }
        let found = state
            .rows
            .iter()
            .filter(|row| {
                !current_only
                    || row
                        .get_value(&table.scd.is_current)
                        .as_bool()
                        .unwrap_or(false)
            })
            .filter_map(|row| {
                let key: Vec<Value> = table
                    .business_key
                    .iter()
                    .map(|column| row.get_value(column))
                    .collect();
                let requested = keys.iter().any(|wanted| {
                    wanted.len() == key.len() && wanted.iter().zip(&key).all(|(a, b)| a.equal(b))
                });
                requested.then(|| ExistingRow {
                    key,
                    hash: row.get_value(&table.hash_column).as_string(),
                })
            })
            .collect();
        Ok(found)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if self.staged.is_some() {
            return Err(DbError::Transaction("transaction already open".to_string()));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn apply(&mut self, _table: &TargetTable, ops: &[WriteOp]) -> Result<Vec<OpOutcome>, DbError> {
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| DbError::Transaction("no open transaction".to_string()))?;
        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let rejected = self.target.rejector.as_ref().and_then(|reject| reject(op.row()));
            match rejected {
                Some((code, message)) => outcomes.push(OpOutcome::Rejected { code, message }),
                None => {
                    staged.push(op.clone());
                    outcomes.push(OpOutcome::Applied);
                }
            }
        }
        Ok(outcomes)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| DbError::Transaction("no open transaction".to_string()))?;
        let mut state = self.target.lock();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            state.rollbacks += 1;
            return Err(DbError::Unavailable("commit interrupted".to_string()));
        }
        for op in staged {
            replay(&mut state.rows, op);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let mut state = self.target.lock();
        match self.staged.take() {
            Some(_) => state.rollbacks += 1,
            None => state.stray_rollbacks += 1,
        }
        Ok(())
    }

    async fn truncate(&mut self, _table: &TargetTable) -> Result<(), DbError> {
        let mut state = self.target.lock();
        state.rows.clear();
        state.truncations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TargetTable {
        TargetTable::new("dim").with_business_key(&["id"])
    }

    fn row(id: i64, name: &str) -> RowData {
        RowData::from_pairs(
            "dim",
            [("id", Value::Int(id)), ("name", Value::String(name.into()))],
        )
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let target = MemoryTarget::new();
        let mut conn = target.connect().await.unwrap();
        conn.begin().await.unwrap();
        conn.apply(&table(), &[WriteOp::Insert { row: row(1, "a") }])
            .await
            .unwrap();
        assert!(target.rows().is_empty());
        conn.commit().await.unwrap();
        assert_eq!(target.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_ops() {
        let target = MemoryTarget::new();
        let mut conn = target.connect().await.unwrap();
        conn.begin().await.unwrap();
        conn.apply(&table(), &[WriteOp::Insert { row: row(1, "a") }])
            .await
            .unwrap();
        conn.rollback().await.unwrap();
        assert!(target.rows().is_empty());
        assert_eq!(target.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rejector_fails_single_rows() {
        let target = MemoryTarget::new().with_rejector(Arc::new(|row: &RowData| {
            (row.get_value("name") == Value::String("bad".into()))
                .then(|| ("22001".to_string(), "value too long".to_string()))
        }));
        let mut conn = target.connect().await.unwrap();
        conn.begin().await.unwrap();
        let outcomes = conn
            .apply(
                &table(),
                &[WriteOp::Insert { row: row(1, "ok") }, WriteOp::Insert { row: row(2, "bad") }],
            )
            .await
            .unwrap();
        conn.commit().await.unwrap();
        assert!(outcomes[0].is_applied());
        assert!(!outcomes[1].is_applied());
        assert_eq!(target.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_rows_match_requested_keys() {
        let mut seeded = row(1, "a");
        seeded.set("row_hash", Value::String("abc".into()));
        let target = MemoryTarget::with_rows(vec![seeded, row(2, "b")]);
        let mut conn = target.connect().await.unwrap();
        let found = conn
            .existing_rows(&table(), &[vec![Value::Int(1)], vec![Value::Int(9)]], false)
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![ExistingRow {
                key: vec![Value::Int(1)],
                hash: Some("abc".into())
            }]
        );
    }
}
