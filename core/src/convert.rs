//! Storage strategy conversion: time partitioning, columnar compression and
//! continuous aggregates over an already-seeded booking table.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConversionError;
use crate::storage::LayoutStore;

/// Identifiers spliced into SQL must be plain words.
pub fn sane_identifier(name: &str) -> bool { !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') }

fn check_identifier(name: &str) -> Result<(), ConversionError> {
    if sane_identifier(name) {
        Ok(())
    } else {
        Err(ConversionError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPolicy {
    pub table: String,
    pub time_column: String,
    pub chunk_width_days: u32,
}

impl PartitionPolicy {
    pub const DEFAULT_CHUNK_WIDTH_DAYS: u32 = 7;

    pub fn new(table: impl Into<String>, time_column: impl Into<String>) -> Self {
        Self { table: table.into(), time_column: time_column.into(), chunk_width_days: Self::DEFAULT_CHUNK_WIDTH_DAYS }
    }

    pub fn booking() -> Self { Self::new("booking", "dateCreated") }

    pub fn chunk_width_days(mut self, days: u32) -> Self {
        self.chunk_width_days = days.max(1);
        self
    }

    /// Indexes the benchmark scenarios rely on, each led by its filter column and ending on the time column.
    pub fn benchmark_indexes(&self) -> Vec<IndexSpec> {
        let time = IndexColumn::desc(&self.time_column);
        let mut indexes = vec![IndexSpec::new(format!("idx_{}_date_created", self.table), vec![time.clone()])];
        for (suffix, column) in [("offerer_date", "offererId"), ("venue_date", "venueId"), ("status_date", "status")] {
            indexes.push(IndexSpec::new(format!("idx_{}_{suffix}", self.table), vec![IndexColumn::asc(column), time.clone()]));
        }
        indexes.push(IndexSpec::new(format!("idx_{}_token", self.table), vec![IndexColumn::asc("token")]));
        indexes
    }

    fn validate(&self) -> Result<(), ConversionError> {
        check_identifier(&self.table)?;
        check_identifier(&self.time_column)
    }
}

impl Default for PartitionPolicy {
    fn default() -> Self { Self::booking() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPolicy {
    pub table: String,
    /// Ordering key, always compressed in descending order.
    pub order_by: String,
    pub segment_by: Vec<String>,
    pub compress_after_days: u32,
}

impl CompressionPolicy {
    pub const DEFAULT_COMPRESS_AFTER_DAYS: u32 = 7;

    pub fn booking() -> Self {
        Self {
            table: "booking".to_string(),
            order_by: "dateCreated".to_string(),
            segment_by: vec!["offererId".to_string(), "venueId".to_string(), "status".to_string()],
            compress_after_days: Self::DEFAULT_COMPRESS_AFTER_DAYS,
        }
    }

    pub fn compress_after_days(mut self, days: u32) -> Self {
        self.compress_after_days = days;
        self
    }

    fn validate(&self) -> Result<(), ConversionError> {
        check_identifier(&self.table)?;
        check_identifier(&self.order_by)?;
        self.segment_by.iter().try_for_each(|column| check_identifier(column))
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self { Self::booking() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
}

impl IndexColumn {
    pub fn asc(name: impl Into<String>) -> Self { Self { name: name.into(), descending: false } }

    pub fn desc(name: impl Into<String>) -> Self { Self { name: name.into(), descending: true } }
}

/// An index the converter wants to exist after partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<IndexColumn>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, columns: Vec<IndexColumn>) -> Self { Self { name: name.into(), columns } }

    pub fn column_names(&self) -> Vec<String> { self.columns.iter().map(|column| column.name.clone()).collect() }
}

/// An index as it currently exists on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub schema: String,
    pub name: String,
    pub range_start: NaiveDateTime,
    pub range_end: NaiveDateTime,
    pub is_compressed: bool,
}

impl ChunkInfo {
    pub fn qualified_name(&self) -> String { format!("{}.{}", self.schema, self.name) }
}

/// Storage footprint of one compressed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCompression {
    pub chunk_name: String,
    pub before_bytes: i64,
    pub after_bytes: i64,
}

impl ChunkCompression {
    /// Uncompressed size divided by compressed size; undefined when either is not positive.
    pub fn ratio(&self) -> Option<f64> {
        if self.before_bytes > 0 && self.after_bytes > 0 {
            Some(self.before_bytes as f64 / self.after_bytes as f64)
        } else {
            None
        }
    }
}

/// A pre-computed rollup maintained by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousAggregate {
    pub name: String,
    pub source_table: String,
    pub time_column: String,
    /// Width of a bucket, as a store interval literal.
    pub bucket_width: String,
    pub bucket_alias: String,
    pub group_by: Vec<String>,
    pub sum_amount: bool,
}

impl ContinuousAggregate {
    fn daily(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            source_table: "booking".to_string(),
            time_column: "dateCreated".to_string(),
            bucket_width: "1 day".to_string(),
            bucket_alias: "day".to_string(),
            group_by: vec![column.to_string()],
            sum_amount: false,
        }
    }

    /// Daily counts by offerer, venue and status, plus hourly stats by all three.
    pub fn booking_suite() -> Vec<Self> {
        vec![
            Self::daily("booking_daily_counts_by_offerer", "offererId"),
            Self::daily("booking_daily_counts_by_venue", "venueId"),
            Self::daily("booking_daily_counts_by_status", "status"),
            Self {
                name: "booking_hourly_stats".to_string(),
                source_table: "booking".to_string(),
                time_column: "dateCreated".to_string(),
                bucket_width: "1 hour".to_string(),
                bucket_alias: "hour".to_string(),
                group_by: vec!["offererId".to_string(), "venueId".to_string(), "status".to_string()],
                sum_amount: true,
            },
        ]
    }

    fn validate(&self) -> Result<(), ConversionError> {
        check_identifier(&self.name)?;
        check_identifier(&self.source_table)?;
        check_identifier(&self.time_column)?;
        check_identifier(&self.bucket_alias)?;
        self.group_by.iter().try_for_each(|column| check_identifier(column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionOutcome {
    /// The table was already partitioned; nothing was changed.
    AlreadyPartitioned { chunks: usize },
    Partitioned(PartitionSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub rows: u64,
    pub chunks: usize,
    pub span: Option<(NaiveDateTime, NaiveDateTime)>,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSummary {
    pub total_chunks: usize,
    pub compressed_now: usize,
    pub already_compressed: usize,
    /// Chunks younger than the age threshold, left for the standing policy.
    pub left_for_policy: usize,
    pub chunks: Vec<ChunkCompression>,
}

impl CompressionSummary {
    pub fn before_bytes(&self) -> i64 { self.chunks.iter().map(|chunk| chunk.before_bytes).sum() }

    pub fn after_bytes(&self) -> i64 { self.chunks.iter().map(|chunk| chunk.after_bytes).sum() }

    pub fn overall_ratio(&self) -> Option<f64> {
        ChunkCompression { chunk_name: String::new(), before_bytes: self.before_bytes(), after_bytes: self.after_bytes() }.ratio()
    }
}

impl fmt::Display for CompressionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk(s): {} compressed now, {} already compressed, {} left for the policy; {} -> {} bytes",
            self.total_chunks,
            self.compressed_now,
            self.already_compressed,
            self.left_for_policy,
            self.before_bytes(),
            self.after_bytes()
        )?;
        if let Some(ratio) = self.overall_ratio() {
            write!(f, " (ratio {ratio:.2})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub views: Vec<String>,
}

/// Applies physical layout transforms to an experiment store. Never point it at the baseline.
pub struct StorageStrategyConverter<'a, S: LayoutStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: LayoutStore + ?Sized> StorageStrategyConverter<'a, S> {
    pub fn new(store: &'a S) -> Self { Self { store } }

    /// Repartitions the table into time chunks of `chunk_width_days`.
    ///
    /// A second application changes nothing but verifies the chunk layout again. After
    /// conversion the row count, the column lists of every pre-existing index and the
    /// placement of every row inside a chunk are verified. Chunks only exist for intervals
    /// holding rows, so gaps between them are expected.
    pub async fn partition(&self, policy: &PartitionPolicy) -> Result<PartitionOutcome, ConversionError> {
        policy.validate()?;
        let table = policy.table.as_str();

        if self.store.is_partitioned(table).await? {
            let chunks = self.verify_chunks(policy).await?.len();
            info!("{table} is already partitioned ({chunks} chunks), nothing to do");
            return Ok(PartitionOutcome::AlreadyPartitioned { chunks });
        }

        let referencing = self.store.incoming_foreign_keys(table).await?;
        if !referencing.is_empty() {
            return Err(ConversionError::IncomingForeignKeys { table: table.to_string(), constraints: referencing });
        }

        let rows_before = self.store.row_count(table).await?;
        let indexes_before = self.store.indexes(table).await?;
        let span = self.store.time_span(table, &policy.time_column).await?;
        info!("Partitioning {table} ({rows_before} rows) by {} into {}-day chunks", policy.time_column, policy.chunk_width_days);

        let wanted = policy.benchmark_indexes();
        self.store.partition(policy, &wanted).await?;

        let rows_after = self.store.row_count(table).await?;
        if rows_after != rows_before {
            return Err(ConversionError::RowCountChanged { table: table.to_string(), before: rows_before, after: rows_after });
        }

        let indexes_after = self.store.indexes(table).await?;
        let present: BTreeSet<Vec<String>> = indexes_after.iter().map(|index| index.columns.clone()).collect();
        let expected = indexes_before.iter().map(|index| index.columns.clone()).chain(wanted.iter().map(IndexSpec::column_names));
        for columns in expected {
            if !present.contains(&columns) {
                return Err(ConversionError::IndexLost { table: table.to_string(), columns: columns.join(", ") });
            }
        }

        let chunks = self.verify_chunks(policy).await?;
        info!("{table} partitioned: {} chunks, {} indexes", chunks.len(), indexes_after.len());
        Ok(PartitionOutcome::Partitioned(PartitionSummary {
            rows: rows_after,
            chunks: chunks.len(),
            span,
            indexes: indexes_after.into_iter().map(|index| index.name).collect(),
        }))
    }

    /// Enables compression, installs the standing policy and compresses every chunk that is
    /// already older than the threshold. Any compressed chunk with a ratio below 1 is an error.
    pub async fn compress(&self, policy: &CompressionPolicy) -> Result<CompressionSummary, ConversionError> {
        policy.validate()?;
        let table = policy.table.as_str();
        if !self.store.is_partitioned(table).await? {
            return Err(ConversionError::NotPartitioned { table: table.to_string() });
        }

        info!("Enabling compression on {table}: segment by {:?}, order by {} DESC", policy.segment_by, policy.order_by);
        self.store.enable_compression(policy).await?;
        self.store.add_compression_policy(policy).await?;
        info!("Compression policy installed: chunks older than {} days", policy.compress_after_days);

        let threshold = self.store.now().await? - Duration::days(policy.compress_after_days as i64);
        let chunks = self.store.chunks(table).await?;
        let mut summary = CompressionSummary { total_chunks: chunks.len(), compressed_now: 0, already_compressed: 0, left_for_policy: 0, chunks: Vec::new() };
        for chunk in &chunks {
            if chunk.is_compressed {
                summary.already_compressed += 1;
            } else if chunk.range_end <= threshold {
                self.store.compress_chunk(chunk).await?;
                summary.compressed_now += 1;
            } else {
                summary.left_for_policy += 1;
            }
        }

        summary.chunks = self.store.compression_stats(table).await?;
        for chunk in &summary.chunks {
            match chunk.ratio() {
                Some(ratio) => info!("{}: {} -> {} bytes (ratio {:.2})", chunk.chunk_name, chunk.before_bytes, chunk.after_bytes, ratio),
                None => warn!("{}: compression ratio undefined ({} -> {} bytes)", chunk.chunk_name, chunk.before_bytes, chunk.after_bytes),
            }
        }
        let offending: Vec<ChunkCompression> = summary.chunks.iter().filter(|chunk| chunk.ratio().map_or(true, |ratio| ratio < 1.0)).cloned().collect();
        if !offending.is_empty() {
            return Err(ConversionError::CompressionRatio { chunks: offending });
        }

        info!("{table} compression: {summary}");
        Ok(summary)
    }

    /// Creates (or keeps) every aggregate and checks that each one is visible afterwards.
    pub async fn aggregate(&self, aggregates: &[ContinuousAggregate]) -> Result<AggregateSummary, ConversionError> {
        for aggregate in aggregates {
            aggregate.validate()?;
            if !self.store.is_partitioned(&aggregate.source_table).await? {
                return Err(ConversionError::NotPartitioned { table: aggregate.source_table.clone() });
            }
        }
        for aggregate in aggregates {
            info!("Creating continuous aggregate {} ({} buckets by {:?})", aggregate.name, aggregate.bucket_width, aggregate.group_by);
            self.store.create_continuous_aggregate(aggregate).await?;
        }

        let existing: BTreeSet<String> = self.store.continuous_aggregates().await?.into_iter().collect();
        for aggregate in aggregates {
            if !existing.contains(&aggregate.name) {
                return Err(ConversionError::AggregateMissing { view: aggregate.name.clone() });
            }
        }
        Ok(AggregateSummary { views: aggregates.iter().map(|aggregate| aggregate.name.clone()).collect() })
    }

    /// Every row must sit in exactly one chunk.
    async fn verify_chunks(&self, policy: &PartitionPolicy) -> Result<Vec<ChunkInfo>, ConversionError> {
        let table = policy.table.as_str();
        let chunks = self.store.chunks(table).await?;
        let span = self.store.time_span(table, &policy.time_column).await?;
        check_chunks(table, &chunks, span)?;

        let rows = self.store.row_count(table).await?;
        let placed = self.store.rows_in_chunks(table, &policy.time_column).await?;
        if placed != rows {
            return Err(ConversionError::ChunkCoverage { table: table.to_string(), detail: format!("{placed} of {rows} rows fall inside a chunk range") });
        }
        Ok(chunks)
    }
}

/// Chunk ranges must be non-empty and disjoint, and the oldest and newest rows must each
/// fall inside one of them.
fn check_chunks(table: &str, chunks: &[ChunkInfo], span: Option<(NaiveDateTime, NaiveDateTime)>) -> Result<(), ConversionError> {
    let coverage = |detail: String| ConversionError::ChunkCoverage { table: table.to_string(), detail };
    let mut ranges: Vec<(NaiveDateTime, NaiveDateTime)> = chunks.iter().map(|chunk| (chunk.range_start, chunk.range_end)).collect();
    ranges.sort();

    for (start, end) in &ranges {
        if start >= end {
            return Err(coverage(format!("chunk range {start} to {end} is empty")));
        }
    }
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(coverage(format!("chunk starting at {} overlaps the chunk ending at {}", pair[1].0, pair[0].1)));
        }
    }

    let inside = |time: NaiveDateTime| ranges.iter().any(|(start, end)| *start <= time && time < *end);
    if let Some((min, max)) = span {
        for (label, time) in [("earliest", min), ("latest", max)] {
            if !inside(time) {
                return Err(coverage(format!("the {label} row at {time} is outside every chunk")));
            }
        }
    }
    Ok(())
}
