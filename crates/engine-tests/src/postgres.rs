#[cfg(test)]
mod tests {
    use crate::{TEST_PG_URL, pg_client, reset_postgres_schema, utils::settings};
    use connectors::sql::postgres::{PgSourceConnector, PgTargetConnector};
    use engine_config::job::{JobSpec, SourceSpec, TargetSpec};
    use engine_core::state::MemoryCheckpointStore;
    use engine_runtime::ParallelProcessor;
    use model::{
        chunk::result::{ExecutionMode, JobStatus},
        execution::{load::LoadMode, target::TargetTable},
    };
    use planner::query::dialect::DialectKind;
    use std::sync::Arc;
    use tracing_test::traced_test;

    const SOURCE_DDL: &str = r#"
        CREATE TABLE txns AS
        SELECT g AS txn_id,
               'acc-' || (g % 97) AS account,
               (g * 37) % 1000 AS amount
          FROM generate_series(1, 5000) AS g;
    "#;

    const TARGET_DDL: &str = r#"
        CREATE TABLE fact_txns (
            txn_id   INTEGER PRIMARY KEY,
            account  TEXT NOT NULL,
            amount   INTEGER NOT NULL,
            row_hash CHAR(32)
        );
    "#;

    fn pg_job(query: &str) -> JobSpec {
        JobSpec {
            job_id: "pg_txns".to_string(),
            source: SourceSpec {
                dialect: DialectKind::Postgres,
                url: Some(TEST_PG_URL.to_string()),
                query: query.to_string(),
            },
            target: TargetSpec {
                url: Some(TEST_PG_URL.to_string()),
                table: TargetTable::new("fact_txns").with_business_key(&["txn_id"]),
            },
            transforms: Vec::new(),
            settings: Default::default(),
        }
    }

    fn processor(mode: LoadMode, parallel: bool) -> ParallelProcessor {
        ParallelProcessor::new(
            pg_job("SELECT txn_id, account, amount FROM txns ORDER BY txn_id"),
            settings(mode)
                .chunk_size(1_000)
                .enable_parallel(parallel)
                .build(),
            Arc::new(PgSourceConnector::new(TEST_PG_URL, "txns")),
            Arc::new(PgTargetConnector::new(TEST_PG_URL)),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    async fn count(table: &str) -> i64 {
        let client = pg_client().await;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {table}"), &[])
            .await
            .expect("count rows");
        row.get(0)
    }

    // Scenario: 5,000 rows copied into an empty Postgres table with 4 workers,
    // then the same upsert again.
    // Expected Outcome: five key chunks commit; the re-run changes nothing.
    #[ignore = "requires a local Postgres at TEST_PG_URL"]
    #[traced_test]
    #[tokio::test]
    async fn pg_upsert_round_trip() {
        reset_postgres_schema().await;
        let client = pg_client().await;
        client.batch_execute(SOURCE_DDL).await.unwrap();
        client.batch_execute(TARGET_DDL).await.unwrap();

        let first = processor(LoadMode::Upsert, true).execute().await.unwrap();
        assert_eq!(first.status, JobStatus::Success);
        assert_eq!(first.execution_mode, ExecutionMode::Parallel);
        assert_eq!(first.chunks_total, 5);
        assert_eq!(first.rows_new, 5_000);
        assert_eq!(count("fact_txns").await, 5_000);

        let second = processor(LoadMode::Upsert, true).execute().await.unwrap();
        assert_eq!(second.rows_unchanged, 5_000);
        assert_eq!(count("fact_txns").await, 5_000);
    }

    // Scenario: a primary-key clash on a handful of rows during a plain insert.
    // Expected Outcome: the clashing rows fail with SQLSTATE 23505, the rest
    // of each chunk commits.
    #[ignore = "requires a local Postgres at TEST_PG_URL"]
    #[tokio::test]
    async fn pg_rejected_rows_do_not_poison_the_chunk() {
        reset_postgres_schema().await;
        let client = pg_client().await;
        client.batch_execute(SOURCE_DDL).await.unwrap();
        client.batch_execute(TARGET_DDL).await.unwrap();
        client
            .batch_execute(
                "INSERT INTO fact_txns (txn_id, account, amount) VALUES (10, 'x', 0), (2500, 'y', 0);",
            )
            .await
            .unwrap();

        let mut job = pg_job("SELECT txn_id, account, amount FROM txns ORDER BY txn_id");
        job.target.table = TargetTable::new("fact_txns");
        let result = ParallelProcessor::new(
            job,
            settings(LoadMode::Insert).chunk_size(1_000).build(),
            Arc::new(PgSourceConnector::new(TEST_PG_URL, "txns")),
            Arc::new(PgTargetConnector::new(TEST_PG_URL)),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .execute()
        .await
        .unwrap();

        assert_eq!(result.status, JobStatus::Partial);
        assert_eq!(result.chunks_succeeded, 5);
        assert_eq!(result.total_rows_failed, 2);
        assert_eq!(count("fact_txns").await, 5_000);
    }
}
