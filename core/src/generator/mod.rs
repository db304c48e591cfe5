//! Synthetic dataset generation.
//!
//! Entities are produced phase by phase in dependency order. Within a phase,
//! batches are synthesized and inserted with up to `workers` batches in flight;
//! a phase only starts once every batch of the phases it depends on is committed.

mod registry;
mod synth;

use std::ops::Range;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use tracing::{debug, error, info};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::graph::DependencyGraph;
use crate::model::{EntityKind, RowBatch};
use crate::report::{GenerationReport, PhaseTimer, Progress, ReportMetadata};
use crate::sampling::{self, TimeWindow};
use crate::storage::{with_validation_suspended, BulkStore};
use registry::{Committed, Registry};
use synth::SynthContext;

pub struct Generator<'a, S: BulkStore + ?Sized> {
    store: &'a S,
    config: GenerationConfig,
}

struct PhaseOutcome {
    rows: usize,
    batches: usize,
    duration: Duration,
    committed: Vec<Committed>,
}

impl<'a, S: BulkStore + ?Sized> Generator<'a, S> {
    pub fn new(store: &'a S, config: GenerationConfig) -> Self { Self { store, config } }

    pub fn config(&self) -> &GenerationConfig { &self.config }

    /// Populates the store with the planned dataset and reports per-entity cardinalities.
    ///
    /// Validation triggers are suspended for the whole run and restored on every exit path.
    /// Batches committed before a failure stay committed.
    pub async fn generate(&self) -> Result<GenerationReport, GenerationError> {
        self.config.validate()?;
        let order = DependencyGraph::standard().topological_order()?;
        let plan = self.config.plan;
        let target = self.store.describe();
        info!(
            "Generating {} rows ({} bookings) into {} with batch size {} and seed {}",
            plan.total_rows(),
            plan.bookings,
            target,
            self.config.batch_size,
            self.config.seed
        );

        let timer = PhaseTimer::start();
        let mut report = GenerationReport::new(ReportMetadata {
            target,
            seed: self.config.seed,
            target_bookings: plan.bookings,
            batch_size: self.config.batch_size,
            workers: self.config.workers,
            timestamp: Utc::now().to_rfc3339(),
        });
        let window = TimeWindow::ending_at(self.config.window_end, self.config.history_days);
        let dms_base = sampling::run_rng(self.config.seed, EntityKind::Venue).gen_range(100_000_000..1_000_000_000u64);

        let outcome = with_validation_suspended(self.store, async {
            let mut registry = Registry::default();
            for kind in order {
                let phase = self.run_phase(kind, &registry, window, dms_base).await?;
                info!("{}: {} rows in {} batch(es), {:.2}s", kind, phase.rows, phase.batches, phase.duration.as_secs_f64());
                report.add_phase(kind, phase.rows, phase.batches, phase.duration);
                for committed in phase.committed {
                    registry.record(committed);
                }
            }
            Ok(())
        })
        .await;

        if let Err(err) = outcome {
            match err.location() {
                Some((entity, batch_index)) => error!("Generation aborted at {entity} batch {batch_index}: {err}"),
                None => error!("Generation aborted: {err}"),
            }
            return Err(err);
        }

        report.finalize(timer.elapsed());
        info!("Generated {} rows in {:.2}s", report.total_rows(), report.total_duration.as_secs_f64());
        Ok(report)
    }

    async fn run_phase(&self, kind: EntityKind, registry: &Registry, window: TimeWindow, dms_base: u64) -> Result<PhaseOutcome, GenerationError> {
        let total = self.config.plan.count(kind);
        let batch_size = self.config.batch_size;
        let batches = total.div_ceil(batch_size);
        info!("Generating {} {} rows in {} batch(es)", total, kind, batches);

        let ctx = &SynthContext { registry, window, dms_base };
        let mut progress = Progress::new(kind, total);
        let mut committed = Vec::with_capacity(batches);
        let mut results = stream::iter(0..batches)
            .map(move |batch_index| {
                let range = batch_index * batch_size..((batch_index + 1) * batch_size).min(total);
                self.run_batch(ctx, kind, batch_index, range)
            })
            .buffered(self.config.workers);

        let mut batch_index = 0;
        while let Some(result) = results.next().await {
            let (rows, batch) = result?;
            progress.batch_done(batch_index, rows);
            committed.push(batch);
            batch_index += 1;
        }

        Ok(PhaseOutcome { rows: progress.done(), batches, duration: progress.elapsed(), committed })
    }

    async fn run_batch(&self, ctx: &SynthContext<'_>, kind: EntityKind, batch_index: usize, range: Range<usize>) -> Result<(usize, Committed), GenerationError> {
        let mut rng = sampling::batch_rng(self.config.seed, kind, batch_index);
        let batch = ctx.synthesize(kind, batch_index, range, &mut rng)?;
        let ids = insert_checked(self.store, &batch, batch_index).await?;
        Ok((batch.len(), Committed::new(&batch, ids)))
    }
}

/// Inserts one batch and verifies the store acknowledged exactly the rows submitted.
pub async fn insert_checked<S: BulkStore + ?Sized>(store: &S, batch: &RowBatch, batch_index: usize) -> Result<Vec<i64>, GenerationError> {
    let entity = batch.kind();
    let ids = store.insert_returning(batch).await.map_err(|err| GenerationError::from_store(entity, batch_index, err))?;
    if ids.len() != batch.len() {
        return Err(GenerationError::BatchTruncation { entity, batch_index, submitted: batch.len(), returned: ids.len() });
    }
    debug!("{entity} batch {batch_index}: {} rows committed", ids.len());
    Ok(ids)
}
