//! Error taxonomy shared by every component.
//!
//! Store implementations classify their driver errors into [`StoreError`]; the
//! components then decide whether a failure is fatal to the run, fatal to the
//! current phase, or recoverable at the scenario level.

use std::path::PathBuf;

use thiserror::Error;

use crate::convert::ChunkCompression;
use crate::model::{EntityKind, InvalidPostalCode};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the credentials.
    #[error("connection error: {0}")]
    Connectivity(BoxError),
    /// Constraint violation, schema mismatch or rejected value.
    #[error("integrity error: {0}")]
    Integrity(BoxError),
    /// The statement was cancelled because it ran past its deadline.
    #[error("timeout: {0}")]
    Timeout(BoxError),
    #[error("storage error: {0}")]
    Other(BoxError),
}

impl StoreError {
    pub fn connectivity(err: impl Into<BoxError>) -> Self { StoreError::Connectivity(err.into()) }

    pub fn integrity(err: impl Into<BoxError>) -> Self { StoreError::Integrity(err.into()) }

    pub fn other(err: impl Into<BoxError>) -> Self { StoreError::Other(err.into()) }

    pub fn is_connectivity(&self) -> bool { matches!(self, StoreError::Connectivity(_)) }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle between {0:?}")]
    Cycle(Vec<EntityKind>),
    #[error("{entity} depends on {dependency}, which is not part of the graph")]
    UnknownDependency { entity: EntityKind, dependency: EntityKind },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid generation config: {0}")]
    Config(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{entity} batch {batch_index}: store unreachable: {source}")]
    Connectivity { entity: EntityKind, batch_index: usize, source: StoreError },

    #[error("{entity} batch {batch_index}: integrity violation: {source}")]
    Integrity { entity: EntityKind, batch_index: usize, source: BoxError },

    /// The store acknowledged fewer (or more) rows than were submitted.
    #[error("{entity} batch {batch_index}: submitted {submitted} rows but the store returned {returned} identifiers")]
    BatchTruncation { entity: EntityKind, batch_index: usize, submitted: usize, returned: usize },

    #[error("{entity} cannot be generated: no {dependency} identifiers are available")]
    MissingDependency { entity: EntityKind, dependency: EntityKind },

    #[error("validation triggers could not be {action}: {source}")]
    Validation { action: &'static str, source: StoreError },
}

impl GenerationError {
    /// Maps a store failure on a given batch to the taxonomy: connectivity aborts the run,
    /// everything else is an integrity failure of the phase.
    pub fn from_store(entity: EntityKind, batch_index: usize, err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(_) => GenerationError::Connectivity { entity, batch_index, source: err },
            other => GenerationError::Integrity { entity, batch_index, source: Box::new(other) },
        }
    }

    pub fn invalid_value(entity: EntityKind, batch_index: usize, err: InvalidPostalCode) -> Self {
        GenerationError::Integrity { entity, batch_index, source: Box::new(err) }
    }

    /// Entity and batch the failure is attributed to, when there is one.
    pub fn location(&self) -> Option<(EntityKind, usize)> {
        match self {
            GenerationError::Connectivity { entity, batch_index, .. }
            | GenerationError::Integrity { entity, batch_index, .. }
            | GenerationError::BatchTruncation { entity, batch_index, .. } => Some((*entity, *batch_index)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("table {table} is not partitioned; run the partition transform first")]
    NotPartitioned { table: String },

    #[error("table {table} is referenced by foreign keys {constraints:?}; refusing to repartition it")]
    IncomingForeignKeys { table: String, constraints: Vec<String> },

    #[error("table {table} held {before} rows before the transform and {after} after")]
    RowCountChanged { table: String, before: u64, after: u64 },

    #[error("table {table} lost its index on ({columns})")]
    IndexLost { table: String, columns: String },

    #[error("chunks of {table} do not cover the stored time span: {detail}")]
    ChunkCoverage { table: String, detail: String },

    #[error("{} chunk(s) report a compression ratio below 1: {}", .chunks.len(), describe_chunks(.chunks))]
    CompressionRatio { chunks: Vec<ChunkCompression> },

    #[error("continuous aggregate {view} is missing after creation")]
    AggregateMissing { view: String },
}

fn describe_chunks(chunks: &[ChunkCompression]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("{} ({} -> {} bytes)", chunk.chunk_name, chunk.before_bytes, chunk.after_bytes))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// No scenario was attempted because the session could not be opened.
    #[error("benchmark target unreachable: {0}")]
    Connectivity(StoreError),

    #[error("could not write results to {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("could not serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}
