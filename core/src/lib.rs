pub mod analyzer;
pub mod config;
pub mod convert;
pub mod error;
pub mod generator;
pub mod graph;
pub mod model;
pub mod plan;
pub mod report;
pub mod runner;
pub mod sampling;
pub mod scenario;
pub mod stats;
pub mod storage;

pub use analyzer::{compare, ComparisonReport};
pub use config::{BenchmarkConfig, ConnectionConfig, GenerationConfig, Strategy};
pub use convert::StorageStrategyConverter;
pub use error::{BenchmarkError, ConversionError, GenerationError, StoreError};
pub use generator::Generator;
pub use model::EntityKind;
pub use plan::GenerationPlan;
pub use report::GenerationReport;
pub use runner::{QueryBenchmarkRunner, ResultSet};
pub use storage::{BulkStore, LayoutStore, QuerySession, QueryTarget};
