//! TimescaleDB layout operations: hypertables, compression and continuous aggregates.

use async_trait::async_trait;
use bookingbench_core::convert::{ChunkCompression, ChunkInfo, CompressionPolicy, ContinuousAggregate, IndexDefinition, IndexSpec, PartitionPolicy};
use bookingbench_core::storage::LayoutStore;
use bookingbench_core::StoreError;
use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::{check_name, classify, quoted, Postgres};

pub(crate) fn index_statement(table: &str, index: &IndexSpec) -> Result<String, StoreError> {
    check_name(table)?;
    check_name(&index.name)?;
    let mut columns = Vec::with_capacity(index.columns.len());
    for column in &index.columns {
        check_name(&column.name)?;
        columns.push(if column.descending { format!("{} DESC", quoted(&column.name)) } else { quoted(&column.name) });
    }
    Ok(format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", quoted(&index.name), quoted(table), columns.join(", ")))
}

pub(crate) fn compression_settings(policy: &CompressionPolicy) -> Result<String, StoreError> {
    check_name(&policy.table)?;
    check_name(&policy.order_by)?;
    let mut segments = Vec::with_capacity(policy.segment_by.len());
    for column in &policy.segment_by {
        check_name(column)?;
        segments.push(quoted(column));
    }
    Ok(format!(
        "ALTER TABLE {} SET (timescaledb.compress, timescaledb.compress_orderby = '{} DESC', timescaledb.compress_segmentby = '{}')",
        quoted(&policy.table),
        quoted(&policy.order_by),
        segments.join(", ")
    ))
}

pub(crate) fn aggregate_view(aggregate: &ContinuousAggregate) -> Result<String, StoreError> {
    for name in [&aggregate.name, &aggregate.source_table, &aggregate.time_column, &aggregate.bucket_alias] {
        check_name(name)?;
    }
    let mut group_by = vec![quoted(&aggregate.bucket_alias)];
    for column in &aggregate.group_by {
        check_name(column)?;
        group_by.push(quoted(column));
    }
    // The bucket width is an interval literal, so it may only hold digits, letters and spaces.
    if !aggregate.bucket_width.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return Err(StoreError::integrity(format!("invalid bucket width {:?}", aggregate.bucket_width)));
    }

    let mut selects = vec![format!("time_bucket('{}'::interval, {}) AS {}", aggregate.bucket_width, quoted(&aggregate.time_column), quoted(&aggregate.bucket_alias))];
    selects.extend(group_by.iter().skip(1).cloned());
    selects.push("COUNT(*) AS booking_count".to_string());
    selects.push("SUM(\"quantity\") AS total_quantity".to_string());
    if aggregate.sum_amount {
        selects.push("SUM(\"amount\") AS total_amount".to_string());
    }
    Ok(format!(
        "CREATE MATERIALIZED VIEW IF NOT EXISTS {} WITH (timescaledb.continuous) AS SELECT {} FROM {} GROUP BY {} WITH NO DATA",
        quoted(&aggregate.name),
        selects.join(", "),
        quoted(&aggregate.source_table),
        group_by.join(", ")
    ))
}

#[async_trait]
impl LayoutStore for Postgres {
    async fn is_partitioned(&self, table: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT EXISTS (SELECT 1 FROM timescaledb_information.hypertables WHERE hypertable_name = $1)", &[&table])
            .await
            .map_err(classify)?;
        row.try_get(0).map_err(classify)
    }

    async fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        check_name(table)?;
        let client = self.client().await?;
        let row = client.query_one(&format!("SELECT COUNT(*) FROM {}", quoted(table)), &[]).await.map_err(classify)?;
        let count: i64 = row.try_get(0).map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn time_span(&self, table: &str, column: &str) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, StoreError> {
        check_name(table)?;
        check_name(column)?;
        let client = self.client().await?;
        let query = format!("SELECT MIN({column}), MAX({column}) FROM {table}", column = quoted(column), table = quoted(table));
        let row = client.query_one(&query, &[]).await.map_err(classify)?;
        let min: Option<NaiveDateTime> = row.try_get(0).map_err(classify)?;
        let max: Option<NaiveDateTime> = row.try_get(1).map_err(classify)?;
        Ok(min.zip(max))
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"SELECT i.relname::text, ix.indisunique, array_agg(a.attname::text ORDER BY k.n)
                FROM pg_index ix
                JOIN pg_class t ON t.oid = ix.indrelid
                JOIN pg_class i ON i.oid = ix.indexrelid
                JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n) ON true
                JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                WHERE t.relname = $1 AND t.relnamespace = current_schema()::text::regnamespace
                GROUP BY i.relname, ix.indisunique
                ORDER BY i.relname"#,
                &[&table],
            )
            .await
            .map_err(classify)?;
        rows.iter()
            .map(|row| -> Result<IndexDefinition, tokio_postgres::Error> { Ok(IndexDefinition { name: row.try_get(0)?, unique: row.try_get(1)?, columns: row.try_get(2)? }) })
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)
    }

    async fn incoming_foreign_keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT conname::text FROM pg_constraint WHERE contype = 'f' AND confrelid = to_regclass(quote_ident($1)) AND conrelid <> confrelid ORDER BY conname",
                &[&table],
            )
            .await
            .map_err(classify)?;
        rows.iter().map(|row| row.try_get(0)).collect::<Result<Vec<String>, _>>().map_err(classify)
    }

    async fn partition(&self, policy: &PartitionPolicy, indexes: &[IndexSpec]) -> Result<(), StoreError> {
        check_name(&policy.table)?;
        check_name(&policy.time_column)?;
        let table = quoted(&policy.table);
        let mut client = self.client().await?;
        let transaction = client.transaction().await.map_err(classify)?;

        // Unique constraints must include the partitioning column; the others become plain indexes.
        let constraints = transaction
            .query(
                r#"SELECT c.conname::text, array_agg(a.attname::text ORDER BY k.n)
                FROM pg_constraint c
                JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, n) ON true
                JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
                WHERE c.conrelid = to_regclass(quote_ident($1)) AND c.contype IN ('p', 'u')
                GROUP BY c.conname"#,
                &[&policy.table],
            )
            .await
            .map_err(classify)?;
        for row in constraints {
            let name: String = row.try_get(0).map_err(classify)?;
            let columns: Vec<String> = row.try_get(1).map_err(classify)?;
            if columns.contains(&policy.time_column) {
                continue;
            }
            check_name(&name)?;
            let mut recreate = format!("ALTER TABLE {table} DROP CONSTRAINT {name};", name = quoted(&name));
            let columns = columns.iter().map(|column| check_name(column).map(|_| quoted(column))).collect::<Result<Vec<_>, _>>()?;
            recreate += &format!("CREATE INDEX IF NOT EXISTS {} ON {table} ({});", quoted(&name), columns.join(", "));
            info!("Replacing constraint {name} on {} with a plain index", policy.table);
            transaction.batch_execute(&recreate).await.map_err(classify)?;
        }

        let count = format!("SELECT COUNT(*) FROM {table}");
        let before: i64 = transaction.query_one(&count, &[]).await.map_err(classify)?.try_get(0).map_err(classify)?;

        let hypertable = format!(
            "SELECT create_hypertable('{table}', by_range('{column}', INTERVAL '{days} days'), migrate_data => true)",
            column = policy.time_column,
            days = policy.chunk_width_days
        );
        debug!("Postgres({}).partition: {hypertable}", self.label);
        transaction.batch_execute(&hypertable).await.map_err(classify)?;

        // Migrated rows live in the chunks; anything left in the parent table was not moved.
        let after: i64 = transaction.query_one(&count, &[]).await.map_err(classify)?.try_get(0).map_err(classify)?;
        let stranded: i64 = transaction.query_one(&format!("SELECT COUNT(*) FROM ONLY {table}"), &[]).await.map_err(classify)?.try_get(0).map_err(classify)?;
        if after != before || stranded != 0 {
            return Err(StoreError::integrity(format!("migrating {} into chunks kept {after} of {before} rows, {stranded} outside any chunk", policy.table)));
        }

        for index in indexes {
            transaction.batch_execute(&index_statement(&policy.table, index)?).await.map_err(classify)?;
        }
        transaction.commit().await.map_err(classify)
    }

    async fn chunks(&self, table: &str) -> Result<Vec<ChunkInfo>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"SELECT chunk_schema::text, chunk_name::text, range_start::timestamp, range_end::timestamp, is_compressed
                FROM timescaledb_information.chunks
                WHERE hypertable_name = $1
                ORDER BY range_start"#,
                &[&table],
            )
            .await
            .map_err(classify)?;
        rows.iter()
            .map(|row| -> Result<ChunkInfo, tokio_postgres::Error> {
                Ok(ChunkInfo {
                    schema: row.try_get(0)?,
                    name: row.try_get(1)?,
                    range_start: row.try_get(2)?,
                    range_end: row.try_get(3)?,
                    is_compressed: row.try_get(4)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)
    }

    async fn rows_in_chunks(&self, table: &str, column: &str) -> Result<u64, StoreError> {
        check_name(table)?;
        check_name(column)?;
        let client = self.client().await?;
        let query = format!(
            r#"SELECT COALESCE(SUM(n), 0)::bigint
            FROM timescaledb_information.chunks c
            CROSS JOIN LATERAL (
                SELECT COUNT(*) AS n FROM {table} t
                WHERE t.{column} >= c.range_start::timestamp AND t.{column} < c.range_end::timestamp
            ) placed
            WHERE c.hypertable_name = $1"#,
            table = quoted(table),
            column = quoted(column)
        );
        let row = client.query_one(&query, &[&table]).await.map_err(classify)?;
        let placed: i64 = row.try_get(0).map_err(classify)?;
        Ok(placed.max(0) as u64)
    }

    async fn enable_compression(&self, policy: &CompressionPolicy) -> Result<(), StoreError> {
        let settings = compression_settings(policy)?;
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT compression_enabled FROM timescaledb_information.hypertables WHERE hypertable_name = $1", &[&policy.table])
            .await
            .map_err(classify)?;
        let enabled = match row {
            Some(row) => row.try_get::<_, bool>(0).map_err(classify)?,
            None => false,
        };
        if enabled {
            info!("Compression already enabled on {}", policy.table);
            return Ok(());
        }
        debug!("Postgres({}).enable_compression: {settings}", self.label);
        client.batch_execute(&settings).await.map_err(classify)
    }

    async fn add_compression_policy(&self, policy: &CompressionPolicy) -> Result<(), StoreError> {
        check_name(&policy.table)?;
        let client = self.client().await?;
        let statement = format!(
            "SELECT add_compression_policy('{}', INTERVAL '{} days', if_not_exists => true)",
            quoted(&policy.table),
            policy.compress_after_days
        );
        client.batch_execute(&statement).await.map_err(classify)
    }

    async fn compress_chunk(&self, chunk: &ChunkInfo) -> Result<(), StoreError> {
        check_name(&chunk.schema)?;
        check_name(&chunk.name)?;
        let client = self.client().await?;
        debug!("Postgres({}).compress_chunk: {}", self.label, chunk.qualified_name());
        client
            .execute("SELECT compress_chunk(($1::text)::regclass, if_not_compressed => true)", &[&chunk.qualified_name()])
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn compression_stats(&self, table: &str) -> Result<Vec<ChunkCompression>, StoreError> {
        check_name(table)?;
        let client = self.client().await?;
        let query = format!(
            r#"SELECT chunk_name::text, before_compression_total_bytes, after_compression_total_bytes
            FROM chunk_compression_stats('{}')
            WHERE compression_status = 'Compressed'
            ORDER BY chunk_name"#,
            quoted(table)
        );
        let rows = client.query(&query, &[]).await.map_err(classify)?;
        rows.iter()
            .map(|row| -> Result<ChunkCompression, tokio_postgres::Error> {
                Ok(ChunkCompression {
                    chunk_name: row.try_get(0)?,
                    before_bytes: row.try_get::<_, Option<i64>>(1)?.unwrap_or(0),
                    after_bytes: row.try_get::<_, Option<i64>>(2)?.unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)
    }

    async fn create_continuous_aggregate(&self, aggregate: &ContinuousAggregate) -> Result<(), StoreError> {
        let view = aggregate_view(aggregate)?;
        let client = self.client().await?;
        debug!("Postgres({}).create_continuous_aggregate: {view}", self.label);
        // Continuous aggregates cannot be created or refreshed inside a transaction block,
        // so each statement goes through the simple protocol on its own.
        client.batch_execute(&view).await.map_err(classify)?;
        client.batch_execute(&format!("CALL refresh_continuous_aggregate('{}', NULL, NULL)", quoted(&aggregate.name))).await.map_err(classify)?;
        client
            .batch_execute(&format!(
                "SELECT add_continuous_aggregate_policy('{}', start_offset => INTERVAL '3 days', end_offset => INTERVAL '1 hour', schedule_interval => INTERVAL '1 hour', if_not_exists => true)",
                quoted(&aggregate.name)
            ))
            .await
            .map_err(classify)
    }

    async fn continuous_aggregates(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT view_name::text FROM timescaledb_information.continuous_aggregates ORDER BY view_name", &[])
            .await
            .map_err(classify)?;
        rows.iter().map(|row| row.try_get(0)).collect::<Result<Vec<String>, _>>().map_err(classify)
    }

    async fn now(&self) -> Result<NaiveDateTime, StoreError> {
        let client = self.client().await?;
        let row = client.query_one("SELECT LOCALTIMESTAMP", &[]).await.map_err(classify)?;
        row.try_get(0).map_err(classify)
    }
}
