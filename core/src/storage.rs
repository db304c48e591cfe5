//! Store seams. Each storage crate implements these traits for its engine.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures_util::FutureExt;
use tracing::{error, info};

use crate::convert::{ChunkCompression, ChunkInfo, CompressionPolicy, ContinuousAggregate, IndexDefinition, IndexSpec, PartitionPolicy};
use crate::error::{GenerationError, StoreError};
use crate::model::RowBatch;
use crate::scenario::{Scenario, ScenarioParameters};

/// Bulk insertion target used by the generator.
#[async_trait]
pub trait BulkStore: Send + Sync {
    /// Inserts every row of `batch` and returns one identifier per row, in submission order.
    ///
    /// Implementations may split the batch internally; the generator checks the returned
    /// identifier count against the submitted row count regardless.
    async fn insert_returning(&self, batch: &RowBatch) -> Result<Vec<i64>, StoreError>;

    /// Disables validation triggers for the duration of a bulk load.
    async fn suspend_validation(&self) -> Result<(), StoreError>;

    /// Re-enables validation triggers.
    async fn resume_validation(&self) -> Result<(), StoreError>;

    /// Human readable description of the store, without credentials.
    fn describe(&self) -> String;
}

/// Runs `body` with validation suspended, restoring it on every exit path, panics included.
///
/// A restore failure after a successful body is an error of its own; after a failed body it
/// is logged and the body's error is returned.
pub async fn with_validation_suspended<S, F, T>(store: &S, body: F) -> Result<T, GenerationError>
where
    S: BulkStore + ?Sized,
    F: Future<Output = Result<T, GenerationError>>,
{
    store.suspend_validation().await.map_err(|source| GenerationError::Validation { action: "suspended", source })?;
    info!("validation triggers suspended");

    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    let restored = store.resume_validation().await;
    if restored.is_ok() {
        info!("validation triggers restored");
    }

    match (outcome, restored) {
        (Ok(Ok(value)), Ok(())) => Ok(value),
        (Ok(Ok(_)), Err(source)) => Err(GenerationError::Validation { action: "restored", source }),
        (Ok(Err(err)), Ok(())) => Err(err),
        (Ok(Err(err)), Err(restore_err)) => {
            error!("validation triggers could not be restored after a failed run: {restore_err}");
            Err(err)
        }
        (Err(panic), restored) => {
            if let Err(restore_err) = restored {
                error!("validation triggers could not be restored after a panic: {restore_err}");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Physical layout operations used by the storage strategy converter.
#[async_trait]
pub trait LayoutStore: Send + Sync {
    async fn is_partitioned(&self, table: &str) -> Result<bool, StoreError>;

    async fn row_count(&self, table: &str) -> Result<u64, StoreError>;

    /// Smallest and largest value of `column`, `None` for an empty table.
    async fn time_span(&self, table: &str, column: &str) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, StoreError>;

    async fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>, StoreError>;

    /// Names of foreign-key constraints on other tables that reference `table`.
    async fn incoming_foreign_keys(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Reorganises `table` into time chunks, migrating existing rows, and creates `indexes`.
    /// Must be atomic: either the table ends up fully partitioned or unchanged. A migration
    /// that loses or strands rows must fail before it becomes visible.
    async fn partition(&self, policy: &PartitionPolicy, indexes: &[IndexSpec]) -> Result<(), StoreError>;

    async fn chunks(&self, table: &str) -> Result<Vec<ChunkInfo>, StoreError>;

    /// Sum over the chunks of `table` of the rows whose `column` lies in the chunk's range.
    async fn rows_in_chunks(&self, table: &str, column: &str) -> Result<u64, StoreError>;

    /// Declares ordering and segmenting columns. Must be a no-op when already enabled.
    async fn enable_compression(&self, policy: &CompressionPolicy) -> Result<(), StoreError>;

    /// Installs the standing age-based compression policy. Must be idempotent.
    async fn add_compression_policy(&self, policy: &CompressionPolicy) -> Result<(), StoreError>;

    async fn compress_chunk(&self, chunk: &ChunkInfo) -> Result<(), StoreError>;

    async fn compression_stats(&self, table: &str) -> Result<Vec<ChunkCompression>, StoreError>;

    async fn create_continuous_aggregate(&self, aggregate: &ContinuousAggregate) -> Result<(), StoreError>;

    async fn continuous_aggregates(&self) -> Result<Vec<String>, StoreError>;

    /// Current time as seen by the store, used for age thresholds.
    async fn now(&self) -> Result<NaiveDateTime, StoreError>;
}

/// Something a benchmark session can be opened against.
#[async_trait]
pub trait QueryTarget: Send + Sync {
    type Session: QuerySession;

    /// Opens the single connection every scenario of a run executes on.
    async fn open_session(&self) -> Result<Self::Session, StoreError>;

    /// Human readable description of the target, without credentials.
    fn describe(&self) -> String;
}

#[async_trait]
pub trait QuerySession: Send {
    /// Picks the concrete identifiers the filtered scenarios use.
    async fn resolve_parameters(&mut self) -> Result<ScenarioParameters, StoreError>;

    /// Executes one repetition of `scenario` and returns the number of rows fetched.
    async fn execute(&mut self, scenario: &Scenario, parameters: &ScenarioParameters) -> Result<u64, StoreError>;

    /// Stops a statement the client gave up waiting for, so the next repetition does not
    /// queue behind it. Returns once the store has acknowledged the request.
    async fn cancel(&mut self) -> Result<(), StoreError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        suspended: AtomicUsize,
        resumed: AtomicUsize,
        fail_resume: bool,
    }

    #[async_trait]
    impl BulkStore for CountingStore {
        async fn insert_returning(&self, batch: &RowBatch) -> Result<Vec<i64>, StoreError> { Ok((0..batch.len() as i64).collect()) }

        async fn suspend_validation(&self) -> Result<(), StoreError> {
            self.suspended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resume_validation(&self) -> Result<(), StoreError> {
            self.resumed.fetch_add(1, Ordering::SeqCst);
            if self.fail_resume {
                return Err(StoreError::connectivity("gone"));
            }
            Ok(())
        }

        fn describe(&self) -> String { "counting".to_string() }
    }

    #[tokio::test]
    async fn released_after_success() {
        let store = CountingStore::default();
        let value = with_validation_suspended(&store, async { Ok::<_, GenerationError>(5) }).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(store.suspended.load(Ordering::SeqCst), 1);
        assert_eq!(store.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_after_failure_and_original_error_kept() {
        let store = CountingStore { fail_resume: true, ..Default::default() };
        let err = with_validation_suspended(&store, async {
            Err::<(), _>(GenerationError::BatchTruncation { entity: EntityKind::User, batch_index: 0, submitted: 2, returned: 1 })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::BatchTruncation { .. }));
        assert_eq!(store.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restore_failure_after_success_is_reported() {
        let store = CountingStore { fail_resume: true, ..Default::default() };
        let err = with_validation_suspended(&store, async { Ok::<_, GenerationError>(()) }).await.unwrap_err();
        assert!(matches!(err, GenerationError::Validation { action: "restored", .. }));
    }

    #[tokio::test]
    async fn released_after_panic() {
        let store = CountingStore::default();
        let result = AssertUnwindSafe(with_validation_suspended(&store, async {
            if store.suspended.load(Ordering::SeqCst) == 1 {
                panic!("synthesis blew up");
            }
            Ok::<_, GenerationError>(())
        }))
        .catch_unwind()
        .await;
        assert!(result.is_err());
        assert_eq!(store.resumed.load(Ordering::SeqCst), 1);
    }
}
