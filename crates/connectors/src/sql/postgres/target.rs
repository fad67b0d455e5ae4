use crate::{
    error::{ConnectorError, DbError},
    sql::postgres::{
        row::column_value,
        utils::{connect_client, ensure_open, row_level_sqlstate},
    },
    target::{ExistingRow, OpOutcome, TargetConnection, TargetConnector, WriteOp},
};
use async_trait::async_trait;
use model::{
    core::value::Value,
    execution::target::TargetTable,
    records::row::{FieldValue, RowData},
};
use planner::query::{
    dialect::Postgres,
    renderer::Renderer,
    statement::{Insert, SelectByKeys, TableRef, Truncate, Update},
};
use tokio_postgres::Client;
use tracing::debug;

/// Keys per lookup statement.
const LOOKUP_BATCH: usize = 1000;

const SAVEPOINT: &str = "chunk_row";

#[derive(Debug, Clone)]
pub struct PgTargetConnector {
    url: String,
}

impl PgTargetConnector {
    pub fn new(url: &str) -> Self {
        PgTargetConnector {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl TargetConnector for PgTargetConnector {
    async fn connect(&self) -> Result<Box<dyn TargetConnection>, ConnectorError> {
        let client = connect_client(&self.url).await?;
        Ok(Box::new(PgTargetConnection {
            client,
            in_transaction: false,
        }))
    }

    fn name(&self) -> String {
        "postgres".to_string()
    }
}

pub struct PgTargetConnection {
    client: Client,
    in_transaction: bool,
}

fn table_ref(table: &TargetTable) -> TableRef<'_> {
    let (schema, name) = table.qualified_name();
    TableRef::new(schema, name)
}

fn pairs(fields: &[FieldValue]) -> Vec<(&str, &Value)> {
    fields.iter().map(|f| (f.name.as_str(), &f.value)).collect()
}

fn insert_sql(table: &TargetTable, row: &RowData) -> String {
    let columns: Vec<String> = row.field_values.iter().map(|f| f.name.clone()).collect();
    let values = [row.field_values.iter().map(|f| f.value.clone()).collect::<Vec<_>>()];
    Renderer::render_node(
        &Postgres,
        &Insert {
            table: table_ref(table),
            columns: &columns,
            rows: &values,
        },
    )
}

fn statements_for(table: &TargetTable, op: &WriteOp) -> Vec<String> {
    match op {
        WriteOp::Insert { row } => vec![insert_sql(table, row)],
        WriteOp::Overwrite { key, row } => {
            let assignments = row
                .field_values
                .iter()
                .filter(|f| !key.iter().any(|k| k.name.eq_ignore_ascii_case(&f.name)))
                .map(|f| (f.name.as_str(), &f.value))
                .collect();
            let update = Update {
                table: table_ref(table),
                assignments,
                filter: pairs(key),
            };
            vec![Renderer::render_node(&Postgres, &update)]
        }
        WriteOp::NewVersion {
            key,
            close,
            current,
            row,
        } => {
            let mut filter = pairs(key);
            filter.push((current.name.as_str(), &current.value));
            let update = Update {
                table: table_ref(table),
                assignments: pairs(close),
                filter,
            };
            vec![
                Renderer::render_node(&Postgres, &update),
                insert_sql(table, row),
            ]
        }
    }
}

impl PgTargetConnection {
    async fn apply_one(&self, sql: &[String]) -> Result<OpOutcome, DbError> {
        self.client
            .batch_execute(&format!("SAVEPOINT {SAVEPOINT}"))
            .await?;
        for statement in sql {
            if let Err(err) = self.client.batch_execute(statement).await {
                let Some(code) = row_level_sqlstate(&err) else {
                    return Err(err.into());
                };
                self.client
                    .batch_execute(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"))
                    .await?;
                let message = err
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| err.to_string());
                return Ok(OpOutcome::Rejected { code, message });
            }
        }
        self.client
            .batch_execute(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .await?;
        Ok(OpOutcome::Applied)
    }
}

#[async_trait]
impl TargetConnection for PgTargetConnection {
    async fn existing_rows(
        &mut self,
        table: &TargetTable,
        keys: &[Vec<Value>],
        current_only: bool,
    ) -> Result<Vec<ExistingRow>, DbError> {
        ensure_open(&self.client)?;
        let key_len = table.business_key.len();
        let mut columns = table.business_key.clone();
        columns.push(table.hash_column.clone());
        let current = Value::Boolean(true);

        let mut found = Vec::new();
        for batch in keys.chunks(LOOKUP_BATCH) {
            let filter = if current_only {
                vec![(table.scd.is_current.as_str(), &current)]
            } else {
                Vec::new()
            };
            let select = SelectByKeys {
                table: table_ref(table),
                columns: &columns,
                key_columns: &table.business_key,
                keys: batch,
                filter,
            };
            let sql = Renderer::render_node(&Postgres, &select);
            let rows = self.client.query(sql.as_str(), &[]).await?;
            for row in &rows {
                let key = (0..key_len).map(|idx| column_value(row, idx)).collect();
                let hash = column_value(row, key_len).as_string();
                found.push(ExistingRow { key, hash });
            }
        }
        debug!(table = %table.name, requested = keys.len(), found = found.len(), "Looked up existing rows");
        Ok(found)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            return Err(DbError::Transaction("transaction already open".to_string()));
        }
        ensure_open(&self.client)?;
        self.client.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn apply(&mut self, table: &TargetTable, ops: &[WriteOp]) -> Result<Vec<OpOutcome>, DbError> {
        if !self.in_transaction {
            return Err(DbError::Transaction("no open transaction".to_string()));
        }
        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            outcomes.push(self.apply_one(&statements_for(table, op)).await?);
        }
        Ok(outcomes)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::Transaction("no open transaction".to_string()));
        }
        self.in_transaction = false;
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn truncate(&mut self, table: &TargetTable) -> Result<(), DbError> {
        ensure_open(&self.client)?;
        let sql = Renderer::render_node(&Postgres, &Truncate { table: table_ref(table) });
        self.client.batch_execute(&sql).await?;
        Ok(())
    }
}
