use crate::{
    error::{ConnectorError, DbError},
    source::{SourceConnection, SourceConnector},
    sql::postgres::{
        row::{column_value, to_row_data},
        utils::{connect_client, ensure_open},
    },
};
use async_trait::async_trait;
use model::{chunk::task::ChunkTask, core::value::Value, records::row::RowData};
use planner::{
    plan::{BoundaryRequest, CountRequest},
    query::dialect::{Dialect, Postgres},
};
use std::sync::Arc;
use tokio_postgres::Client;
use tracing::debug;

/// Reads chunk queries from a Postgres database.
#[derive(Debug, Clone)]
pub struct PgSourceConnector {
    url: String,
    entity: String,
}

impl PgSourceConnector {
    pub fn new(url: &str, entity: &str) -> Self {
        PgSourceConnector {
            url: url.to_string(),
            entity: entity.to_string(),
        }
    }
}

#[async_trait]
impl SourceConnector for PgSourceConnector {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>, ConnectorError> {
        let client = connect_client(&self.url).await?;
        Ok(Box::new(PgSourceConnection {
            client,
            entity: self.entity.clone(),
        }))
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(Postgres)
    }

    fn name(&self) -> String {
        "postgres".to_string()
    }
}

pub struct PgSourceConnection {
    client: Client,
    entity: String,
}

#[async_trait]
impl SourceConnection for PgSourceConnection {
    async fn fetch_chunk(&self, task: &ChunkTask) -> Result<Vec<RowData>, DbError> {
        ensure_open(&self.client)?;
        debug!(chunk = task.chunk_index, sql = %task.sql, "Fetching chunk");
        let rows = self.client.query(task.sql.as_str(), &[]).await?;
        Ok(rows.iter().map(|row| to_row_data(&self.entity, row)).collect())
    }

    async fn count_rows(&self, request: &CountRequest) -> Result<u64, DbError> {
        ensure_open(&self.client)?;
        let row = self.client.query_one(request.sql.as_str(), &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn key_boundaries(&self, request: &BoundaryRequest) -> Result<Vec<Value>, DbError> {
        ensure_open(&self.client)?;
        let rows = self.client.query(request.sql.as_str(), &[]).await?;
        Ok(rows
            .iter()
            .map(|row| column_value(row, 0))
            .filter(|value| !value.is_null())
            .collect())
    }
}
