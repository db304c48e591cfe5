//! Configuration types for the generator, converter and benchmark runner.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::plan::GenerationPlan;
use crate::sampling::MAX_TOKEN_ORDINAL;

/// Connection parameters of one target store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionConfig {
    pub const BASELINE_PORT: u16 = 5434;
    pub const EXPERIMENT_PORT: u16 = 5435;

    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { host: host.into(), port, database: database.into(), user: user.into(), password: password.into() }
    }

    pub fn baseline() -> Self { Self { port: Self::BASELINE_PORT, ..Self::default() } }

    pub fn experiment() -> Self { Self { port: Self::EXPERIMENT_PORT, ..Self::default() } }

    /// libpq key/value connection string.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            quote_value(&self.host),
            self.port,
            quote_value(&self.database),
            quote_value(&self.user),
            quote_value(&self.password)
        )
    }

    /// `user@host:port/database`, safe to log and to persist in result files.
    pub fn redacted(&self) -> String { format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database) }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\') {
        return value.to_owned();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl Default for ConnectionConfig {
    fn default() -> Self { Self::new("localhost", Self::BASELINE_PORT, "pass_culture", "pass_culture", "passq") }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("ConnectionConfig").field(&self.redacted()).finish() }
}

/// Parameters of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub plan: GenerationPlan,
    pub batch_size: usize,
    pub seed: u64,
    /// Maximum number of batches of one phase in flight at once.
    pub workers: usize,
    pub history_days: u32,
    /// End of the historical window; bookings cluster just before it.
    pub window_end: NaiveDateTime,
}

impl GenerationConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 10_000;
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_HISTORY_DAYS: u32 = 5 * 365;

    pub fn builder(target_bookings: usize) -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            plan: GenerationPlan::for_bookings(target_bookings),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            seed: 0,
            workers: Self::DEFAULT_WORKERS,
            history_days: Self::DEFAULT_HISTORY_DAYS,
            window_end: None,
        }
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        self.plan.validate()?;
        if self.batch_size == 0 {
            return Err(GenerationError::Config("batch size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(GenerationError::Config("worker count must be positive".into()));
        }
        if self.history_days == 0 {
            return Err(GenerationError::Config("history window must span at least one day".into()));
        }
        if self.plan.bookings as u64 > MAX_TOKEN_ORDINAL {
            return Err(GenerationError::Config(format!("at most {MAX_TOKEN_ORDINAL} bookings have distinct tokens")));
        }
        Ok(())
    }
}

/// Builder for [`GenerationConfig`] with production defaults.
pub struct GenerationConfigBuilder {
    plan: GenerationPlan,
    batch_size: usize,
    seed: u64,
    workers: usize,
    history_days: u32,
    window_end: Option<NaiveDateTime>,
}

impl GenerationConfigBuilder {
    pub fn plan(mut self, plan: GenerationPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn history_days(mut self, days: u32) -> Self {
        self.history_days = days;
        self
    }

    pub fn window_end(mut self, end: NaiveDateTime) -> Self {
        self.window_end = Some(end);
        self
    }

    pub fn build(self) -> GenerationConfig {
        let window_end = self.window_end.unwrap_or_else(|| {
            let now = Utc::now().naive_utc();
            now.with_nanosecond(0).unwrap_or(now)
        });
        GenerationConfig {
            plan: self.plan,
            batch_size: self.batch_size,
            seed: self.seed,
            workers: self.workers,
            history_days: self.history_days,
            window_end,
        }
    }
}

/// Label under which a benchmark pass is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Baseline,
    Partitioned,
    Compressed,
    Aggregated,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [Strategy::Baseline, Strategy::Partitioned, Strategy::Compressed, Strategy::Aggregated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Baseline => "baseline",
            Strategy::Partitioned => "partitioned",
            Strategy::Compressed => "compressed",
            Strategy::Aggregated => "aggregated",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL.into_iter().find(|strategy| strategy.as_str() == s).ok_or_else(|| format!("unknown strategy {s:?}"))
    }
}

/// Parameters of one benchmark pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    pub strategy: Strategy,
    pub repetitions: usize,
    /// Unrecorded executions before sampling starts.
    pub warmup: usize,
    pub scenario_timeout: Duration,
}

impl BenchmarkConfig {
    pub const DEFAULT_REPETITIONS: usize = 10;

    pub fn new(strategy: Strategy) -> Self { Self { strategy, repetitions: Self::DEFAULT_REPETITIONS, warmup: 1, scenario_timeout: Duration::from_secs(60) } }

    pub fn repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    pub fn warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = timeout;
        self
    }
}
