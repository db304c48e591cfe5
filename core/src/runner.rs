//! Query benchmark runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{BenchmarkConfig, Strategy};
use crate::error::{BenchmarkError, StoreError};
use crate::scenario::{Scenario, ScenarioParameters};
use crate::stats::LatencyStats;
use crate::storage::{QuerySession, QueryTarget};

/// Outcome of every repetition of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    /// Successful repetition timings in milliseconds, in execution order.
    pub samples_ms: Vec<f64>,
    pub failures: usize,
    pub errors: Vec<String>,
    /// Rows fetched by the last successful repetition.
    pub rows: Option<u64>,
    pub stats: Option<LatencyStats>,
}

impl ScenarioResult {
    fn new(scenario: Scenario) -> Self { Self { scenario, samples_ms: Vec::new(), failures: 0, errors: Vec::new(), rows: None, stats: None } }

    /// A scenario without a single successful repetition.
    pub fn failed(&self) -> bool { self.samples_ms.is_empty() }

    fn record_failure(&mut self, message: String) {
        self.failures += 1;
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub strategy: Strategy,
    pub timestamp: String,
    pub target: String,
    pub repetitions: usize,
    pub warmup: usize,
    pub timeout_ms: u64,
    pub parameters: ScenarioParameters,
    /// False when the run was cancelled before every scenario was attempted.
    pub complete: bool,
}

/// Results of one benchmark pass, keyed by scenario name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub metadata: ResultMetadata,
    pub scenarios: BTreeMap<String, ScenarioResult>,
}

impl ResultSet {
    pub fn load(path: &Path) -> Result<Self, BenchmarkError> {
        let bytes = std::fs::read(path).map_err(|source| BenchmarkError::Io { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the set next to `path` first and renames it into place, so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<(), BenchmarkError> {
        let io = |source| BenchmarkError::Io { path: path.to_path_buf(), source };
        let json = serde_json::to_vec_pretty(self)?;
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, json).map_err(io)?;
        std::fs::rename(&staging, path).map_err(io)
    }
}

pub struct QueryBenchmarkRunner<'a, T: QueryTarget + ?Sized> {
    target: &'a T,
    config: BenchmarkConfig,
    output: Option<PathBuf>,
    cancel: Arc<AtomicBool>,
}

impl<'a, T: QueryTarget + ?Sized> QueryBenchmarkRunner<'a, T> {
    pub fn new(target: &'a T, config: BenchmarkConfig) -> Self { Self { target, config, output: None, cancel: Arc::new(AtomicBool::new(false)) } }

    /// Rewrites the result file at `path` after every scenario.
    pub fn checkpoint_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Shares a cancellation flag; it is checked between scenarios.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> { self.cancel.clone() }

    /// Runs every scenario of `suite` on one session.
    ///
    /// Only a failure to open the session aborts the run; a failing scenario is recorded and
    /// the runner moves on.
    pub async fn run(&self, suite: &[Scenario]) -> Result<ResultSet, BenchmarkError> {
        let mut session = self.target.open_session().await.map_err(BenchmarkError::Connectivity)?;
        let parameters = match session.resolve_parameters().await {
            Ok(parameters) => parameters,
            Err(err) if err.is_connectivity() => return Err(BenchmarkError::Connectivity(err)),
            Err(err) => {
                warn!("Could not resolve scenario parameters, filtered scenarios will fail: {err}");
                ScenarioParameters::default()
            }
        };
        info!(
            strategy = %self.config.strategy,
            "Benchmarking {} scenarios against {} ({} repetitions, {} warmup, parameters {:?})",
            suite.len(),
            self.target.describe(),
            self.config.repetitions,
            self.config.warmup,
            parameters
        );

        let mut results = ResultSet {
            metadata: ResultMetadata {
                strategy: self.config.strategy,
                timestamp: Utc::now().to_rfc3339(),
                target: self.target.describe(),
                repetitions: self.config.repetitions,
                warmup: self.config.warmup,
                timeout_ms: self.config.scenario_timeout.as_millis() as u64,
                parameters,
                complete: false,
            },
            scenarios: BTreeMap::new(),
        };

        let mut cancelled = false;
        for scenario in suite {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Benchmark cancelled before {}", scenario.name);
                cancelled = true;
                break;
            }
            let result = self.run_scenario(&mut session, scenario, &parameters).await;
            match &result.stats {
                Some(stats) => info!(
                    scenario = %scenario.name,
                    "{}: median {:.2}ms p95 {:.2}ms p99 {:.2}ms ({} samples, {} failures)",
                    scenario.name,
                    stats.median,
                    stats.p95,
                    stats.p99,
                    stats.count,
                    result.failures
                ),
                None => warn!(scenario = %scenario.name, "{} failed: {}", scenario.name, result.errors.join("; ")),
            }
            results.scenarios.insert(scenario.name.clone(), result);
            self.checkpoint(&results)?;
        }

        results.metadata.complete = !cancelled;
        self.checkpoint(&results)?;
        Ok(results)
    }

    async fn run_scenario(&self, session: &mut T::Session, scenario: &Scenario, parameters: &ScenarioParameters) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario.clone());
        if !scenario.is_runnable(parameters) {
            for _ in 0..self.config.repetitions {
                result.record_failure("no identifier available for the scenario filter".to_string());
            }
            return result;
        }

        for _ in 0..self.config.warmup {
            if let Err(err) = self.execute_once(session, scenario, parameters).await {
                warn!(scenario = %scenario.name, "warmup failed: {err}");
            }
        }

        for _ in 0..self.config.repetitions {
            let started = Instant::now();
            match self.execute_once(session, scenario, parameters).await {
                Ok(rows) => {
                    result.samples_ms.push(started.elapsed().as_secs_f64() * 1_000.0);
                    result.rows = Some(rows);
                }
                Err(message) => result.record_failure(message),
            }
        }
        result.stats = LatencyStats::from_samples(&result.samples_ms);
        result
    }

    async fn execute_once(&self, session: &mut T::Session, scenario: &Scenario, parameters: &ScenarioParameters) -> Result<u64, String> {
        let outcome = tokio::time::timeout(self.config.scenario_timeout, session.execute(scenario, parameters)).await;
        match outcome {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(StoreError::Timeout(err))) => Err(format!("timed out in the store: {err}")),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => {
                if let Err(err) = session.cancel().await {
                    warn!(scenario = %scenario.name, "could not cancel the abandoned statement: {err}");
                }
                Err(format!("timed out after {}ms", self.config.scenario_timeout.as_millis()))
            }
        }
    }

    fn checkpoint(&self, results: &ResultSet) -> Result<(), BenchmarkError> {
        match &self.output {
            Some(path) => results.save(path),
            None => Ok(()),
        }
    }
}
