use crate::error::{ConnectorError, DbError};
use async_trait::async_trait;
use model::{
    core::value::Value,
    execution::target::TargetTable,
    records::row::{FieldValue, RowData},
};

/// Business key and stored change hash of a row already in the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRow {
    pub key: Vec<Value>,
    pub hash: Option<String>,
}

/// One logical write. Every variant succeeds or fails as a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Append a row.
    Insert { row: RowData },

    /// Replace the row identified by `key` in place.
    Overwrite { key: Vec<FieldValue>, row: RowData },

    /// Close the current version of `key` with the `close` assignments, then
    /// insert `row` as the new current version.
    NewVersion {
        key: Vec<FieldValue>,
        close: Vec<FieldValue>,
        current: FieldValue,
        row: RowData,
    },
}

impl WriteOp {
    pub fn row(&self) -> &RowData {
        match self {
            WriteOp::Insert { row } => row,
            WriteOp::Overwrite { row, .. } => row,
            WriteOp::NewVersion { row, .. } => row,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Applied,
    Rejected { code: String, message: String },
}

impl OpOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, OpOutcome::Applied)
    }
}

/// An open write connection to the target. Writes happen inside one
/// transaction per chunk: `begin`, any number of `apply`, then `commit` or
/// `rollback`.
#[async_trait]
pub trait TargetConnection: Send + Sync {
    /// Rows matching the given business keys. With `current_only` set, only
    /// current SCD versions are returned.
    async fn existing_rows(
        &mut self,
        table: &TargetTable,
        keys: &[Vec<Value>],
        current_only: bool,
    ) -> Result<Vec<ExistingRow>, DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;

    /// Applies `ops` in order inside the open transaction. A rejected op
    /// leaves the transaction usable; an `Err` means it is not.
    async fn apply(&mut self, table: &TargetTable, ops: &[WriteOp]) -> Result<Vec<OpOutcome>, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn truncate(&mut self, table: &TargetTable) -> Result<(), DbError>;
}

/// Opens target connections.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TargetConnection>, ConnectorError>;

    fn name(&self) -> String;
}
