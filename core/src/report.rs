//! Instrumentation and reporting for generation runs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::EntityKind;

/// Captures timing and cardinalities of a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Phase-level timings, in execution order
    pub phases: Vec<PhaseReport>,
    /// Overall generation duration
    pub total_duration: Duration,
    /// Configuration metadata
    pub metadata: ReportMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub entity: EntityKind,
    pub rows: usize,
    pub batches: usize,
    pub duration: Duration,
    pub rows_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub target: String,
    pub seed: u64,
    pub target_bookings: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub timestamp: String,
}

impl GenerationReport {
    pub fn new(metadata: ReportMetadata) -> Self { Self { phases: Vec::new(), total_duration: Duration::ZERO, metadata } }

    pub fn add_phase(&mut self, entity: EntityKind, rows: usize, batches: usize, duration: Duration) {
        let rows_per_sec = if duration.as_secs_f64() > 0.0 { rows as f64 / duration.as_secs_f64() } else { 0.0 };
        self.phases.push(PhaseReport { entity, rows, batches, duration, rows_per_sec });
    }

    pub fn finalize(&mut self, total_duration: Duration) { self.total_duration = total_duration; }

    /// Rows generated per entity.
    pub fn cardinalities(&self) -> BTreeMap<EntityKind, usize> { self.phases.iter().map(|phase| (phase.entity, phase.rows)).collect() }

    pub fn count(&self, entity: EntityKind) -> usize { self.phases.iter().find(|phase| phase.entity == entity).map_or(0, |phase| phase.rows) }

    pub fn total_rows(&self) -> usize { self.phases.iter().map(|phase| phase.rows).sum() }

    /// Prints a concise table summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Generation Report ===");
        println!("Target: {}", self.metadata.target);
        println!("Seed: {}", self.metadata.seed);
        println!("Batch size: {} ({} workers)", self.metadata.batch_size, self.metadata.workers);
        println!("Timestamp: {}", self.metadata.timestamp);
        println!("\nPhase Results:");
        println!("{:<20} {:>12} {:>9} {:>12} {:>15}", "Entity", "Rows", "Batches", "Duration", "Rows/sec");
        println!("{}", "-".repeat(72));
        for phase in &self.phases {
            println!(
                "{:<20} {:>12} {:>9} {:>11.3}s {:>15.2}",
                phase.entity.table(),
                phase.rows,
                phase.batches,
                phase.duration.as_secs_f64(),
                phase.rows_per_sec
            );
        }
        println!("{}", "-".repeat(72));
        println!("{:<20} {:>12} {:>9} {:>11.3}s", "Total", self.total_rows(), "", self.total_duration.as_secs_f64());
        println!();
    }
}

/// Timer for measuring phase durations.
pub struct PhaseTimer {
    start: Instant,
}

impl PhaseTimer {
    pub fn start() -> Self { Self { start: Instant::now() } }

    pub fn elapsed(&self) -> Duration { self.start.elapsed() }
}

/// Per-batch progress of one phase, logged for operators watching multi-minute runs.
pub struct Progress {
    entity: EntityKind,
    total: usize,
    done: usize,
    timer: PhaseTimer,
}

impl Progress {
    pub fn new(entity: EntityKind, total: usize) -> Self { Self { entity, total, done: 0, timer: PhaseTimer::start() } }

    pub fn batch_done(&mut self, batch_index: usize, rows: usize) {
        self.done += rows;
        let elapsed = self.timer.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { self.done as f64 / elapsed } else { 0.0 };
        let percent = if self.total > 0 { self.done as f64 * 100.0 / self.total as f64 } else { 100.0 };
        let eta = if rate > 0.0 { (self.total.saturating_sub(self.done)) as f64 / rate } else { 0.0 };
        info!(
            entity = %self.entity,
            batch = batch_index,
            "{}: {}/{} ({:.1}%) elapsed {:.1}s rate {:.0}/s eta {:.0}s",
            self.entity,
            self.done,
            self.total,
            percent,
            elapsed,
            rate,
            eta
        );
    }

    pub fn done(&self) -> usize { self.done }

    pub fn elapsed(&self) -> Duration { self.timer.elapsed() }
}
