use crate::error::{ConnectorError, DbError};
use async_trait::async_trait;
use model::{chunk::task::ChunkTask, core::value::Value, records::row::RowData};
use planner::{
    plan::{BoundaryRequest, CountRequest, PlanProbe, ProbeError},
    query::dialect::Dialect,
};
use std::sync::Arc;

/// An open read connection to a record source. One per worker.
#[async_trait]
pub trait SourceConnection: Send + Sync {
    /// Reads the rows of one chunk, in source order. SQL sources run
    /// `task.sql`; other sources select by the task's bounds.
    async fn fetch_chunk(&self, task: &ChunkTask) -> Result<Vec<RowData>, DbError>;

    async fn count_rows(&self, request: &CountRequest) -> Result<u64, DbError>;

    async fn key_boundaries(
        &self,
        request: &BoundaryRequest,
    ) -> Result<Vec<Value>, DbError>;
}

/// Opens source connections.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>, ConnectorError>;

    fn dialect(&self) -> Arc<dyn Dialect>;

    fn name(&self) -> String;
}

/// Lets the planner size a job through an open source connection.
pub struct SourceProbe<'a>(pub &'a dyn SourceConnection);

#[async_trait]
impl PlanProbe for SourceProbe<'_> {
    async fn count_rows(&self, request: &CountRequest) -> Result<u64, ProbeError> {
        Ok(self.0.count_rows(request).await?)
    }

    async fn key_boundaries(
        &self,
        request: &BoundaryRequest,
    ) -> Result<Vec<Value>, ProbeError> {
        Ok(self.0.key_boundaries(request).await?)
    }
}
