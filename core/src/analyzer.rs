//! Cross-strategy comparison of benchmark result sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Strategy;
use crate::runner::ResultSet;

/// A result set together with where it was read from.
#[derive(Debug, Clone)]
pub struct LoadedSet {
    pub source: String,
    pub set: ResultSet,
}

/// Something about the inputs that prevents a complete comparison. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    Unreadable { source: String, error: String },
    MissingBaseline,
    DuplicateStrategy { strategy: Strategy, source: String },
    MissingScenario { scenario: String, strategy: Strategy },
    NoSamples { scenario: String, strategy: Strategy },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::Unreadable { source, error } => write!(f, "{source} could not be read: {error}"),
            Inconsistency::MissingBaseline => write!(f, "no baseline result set; speedups are undefined"),
            Inconsistency::DuplicateStrategy { strategy, source } => write!(f, "{source} repeats strategy {strategy} and was ignored"),
            Inconsistency::MissingScenario { scenario, strategy } => write!(f, "scenario {scenario} is missing from {strategy}"),
            Inconsistency::NoSamples { scenario, strategy } => write!(f, "scenario {scenario} has no successful samples for {strategy}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTiming {
    pub strategy: Strategy,
    pub median_ms: Option<f64>,
    /// Baseline median divided by this strategy's median.
    pub speedup: Option<f64>,
    pub improvement_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioComparison {
    pub scenario: String,
    pub timings: Vec<StrategyTiming>,
    pub best: Option<Strategy>,
    pub worst: Option<Strategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub strategy: Strategy,
    /// Geometric mean of the per-scenario speedups.
    pub speedup: f64,
    pub scenarios: usize,
    pub average_improvement_pct: f64,
    pub best_scenario: Option<String>,
    pub worst_scenario: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub strategies: Vec<Strategy>,
    pub scenarios: Vec<ScenarioComparison>,
    pub ranking: Vec<RankingEntry>,
    pub inconsistencies: Vec<Inconsistency>,
}

/// Every `*.json` file of `dir`, in sorted order.
pub fn result_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Reads result sets from files and directories. Unreadable inputs become inconsistencies.
pub fn load_inputs(inputs: &[PathBuf]) -> (Vec<LoadedSet>, Vec<Inconsistency>) {
    let mut files = Vec::new();
    let mut problems = Vec::new();
    for input in inputs {
        if input.is_dir() {
            match result_files(input) {
                Ok(found) => files.extend(found),
                Err(err) => problems.push(Inconsistency::Unreadable { source: input.display().to_string(), error: err.to_string() }),
            }
        } else {
            files.push(input.clone());
        }
    }

    let mut sets = Vec::new();
    for file in files {
        let source = file.display().to_string();
        match ResultSet::load(&file) {
            Ok(set) => {
                debug!("Loaded {} scenarios for {} from {source}", set.scenarios.len(), set.metadata.strategy);
                sets.push(LoadedSet { source, set });
            }
            Err(err) => {
                warn!("Skipping {source}: {err}");
                problems.push(Inconsistency::Unreadable { source, error: err.to_string() });
            }
        }
    }
    (sets, problems)
}

/// Compares result sets against the baseline. The report depends only on the inputs and
/// their order; the first set of each strategy wins.
pub fn compare(sets: &[LoadedSet]) -> ComparisonReport {
    let mut inconsistencies = Vec::new();
    let mut by_strategy: BTreeMap<Strategy, &ResultSet> = BTreeMap::new();
    for loaded in sets {
        let strategy = loaded.set.metadata.strategy;
        if by_strategy.contains_key(&strategy) {
            inconsistencies.push(Inconsistency::DuplicateStrategy { strategy, source: loaded.source.clone() });
        } else {
            by_strategy.insert(strategy, &loaded.set);
        }
    }
    let has_baseline = by_strategy.contains_key(&Strategy::Baseline);
    if !has_baseline {
        inconsistencies.push(Inconsistency::MissingBaseline);
    }

    let scenario_names: BTreeSet<&String> = by_strategy.values().flat_map(|set| set.scenarios.keys()).collect();
    let mut scenarios = Vec::with_capacity(scenario_names.len());
    for name in scenario_names {
        let mut medians: BTreeMap<Strategy, Option<f64>> = BTreeMap::new();
        for (strategy, set) in &by_strategy {
            let median = match set.scenarios.get(name) {
                None => {
                    inconsistencies.push(Inconsistency::MissingScenario { scenario: name.clone(), strategy: *strategy });
                    None
                }
                Some(result) => {
                    let median = result.stats.map(|stats| stats.median);
                    if median.is_none() {
                        inconsistencies.push(Inconsistency::NoSamples { scenario: name.clone(), strategy: *strategy });
                    }
                    median
                }
            };
            medians.insert(*strategy, median);
        }

        let baseline = medians.get(&Strategy::Baseline).copied().flatten();
        let timings: Vec<StrategyTiming> = medians
            .iter()
            .map(|(strategy, median)| {
                let speedup = match (baseline, median) {
                    (Some(base), Some(median)) if *median > 0.0 => Some(base / median),
                    _ => None,
                };
                let improvement_pct = match (baseline, median) {
                    (Some(base), Some(median)) if base > 0.0 => Some((base - median) / base * 100.0),
                    _ => None,
                };
                StrategyTiming { strategy: *strategy, median_ms: *median, speedup, improvement_pct }
            })
            .collect();

        let measured: Vec<(Strategy, f64)> = timings.iter().filter_map(|timing| timing.median_ms.map(|median| (timing.strategy, median))).collect();
        let best = measured.iter().min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))).map(|(strategy, _)| *strategy);
        let worst = measured.iter().max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0))).map(|(strategy, _)| *strategy);
        scenarios.push(ScenarioComparison { scenario: name.clone(), timings, best, worst });
    }

    let ranking = if has_baseline { rank(by_strategy.keys().copied(), &scenarios) } else { Vec::new() };
    inconsistencies.sort();
    ComparisonReport { strategies: by_strategy.keys().copied().collect(), scenarios, ranking, inconsistencies }
}

fn rank(strategies: impl Iterator<Item = Strategy>, scenarios: &[ScenarioComparison]) -> Vec<RankingEntry> {
    let mut ranking: Vec<RankingEntry> = strategies
        .filter_map(|strategy| {
            let per_scenario: Vec<(&str, f64, f64)> = scenarios
                .iter()
                .filter_map(|comparison| {
                    let timing = comparison.timings.iter().find(|timing| timing.strategy == strategy)?;
                    Some((comparison.scenario.as_str(), timing.speedup?, timing.improvement_pct?))
                })
                .collect();
            if per_scenario.is_empty() {
                return None;
            }
            let count = per_scenario.len() as f64;
            let speedup = (per_scenario.iter().map(|(_, speedup, _)| speedup.ln()).sum::<f64>() / count).exp();
            let average_improvement_pct = per_scenario.iter().map(|(_, _, pct)| pct).sum::<f64>() / count;
            // Scenario names are visited in sorted order, so ties resolve to the first name.
            let best = per_scenario.iter().fold(None::<(&str, f64)>, |acc, (name, _, pct)| match acc {
                Some((_, top)) if top >= *pct => acc,
                _ => Some((*name, *pct)),
            });
            let worst = per_scenario.iter().fold(None::<(&str, f64)>, |acc, (name, _, pct)| match acc {
                Some((_, bottom)) if bottom <= *pct => acc,
                _ => Some((*name, *pct)),
            });
            Some(RankingEntry {
                strategy,
                speedup,
                scenarios: per_scenario.len(),
                average_improvement_pct,
                best_scenario: best.map(|(name, _)| name.to_string()),
                worst_scenario: worst.map(|(name, _)| name.to_string()),
            })
        })
        .collect();
    ranking.sort_by(|a, b| b.speedup.total_cmp(&a.speedup).then_with(|| a.strategy.as_str().cmp(b.strategy.as_str())));
    ranking
}

fn millis(value: Option<f64>) -> String { value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2}ms")) }

fn ratio(value: Option<f64>) -> String { value.map_or_else(|| "-".to_string(), |speedup| format!("{speedup:.2}x")) }

impl ComparisonReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> { serde_json::to_string_pretty(self) }

    /// Fixed-width text rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(78);
        let _ = writeln!(out, "{rule}\nBOOKING STORAGE BENCHMARK - COMPARISON REPORT\n{rule}");
        let labels: Vec<&str> = self.strategies.iter().map(Strategy::as_str).collect();
        let _ = writeln!(out, "Strategies: {}\n", labels.join(", "));

        let _ = write!(out, "{:<36}", "Scenario");
        for strategy in &self.strategies {
            let _ = write!(out, " {:>22}", strategy.as_str());
        }
        let _ = writeln!(out, "  best / worst");
        let _ = writeln!(out, "{}", "-".repeat(36 + 23 * self.strategies.len() + 14));
        for scenario in &self.scenarios {
            let _ = write!(out, "{:<36}", scenario.scenario);
            for timing in &scenario.timings {
                let cell = match timing.strategy {
                    Strategy::Baseline => millis(timing.median_ms),
                    _ => format!("{} {:>7}", millis(timing.median_ms), ratio(timing.speedup)),
                };
                let _ = write!(out, " {cell:>22}");
            }
            let label = |strategy: Option<Strategy>| strategy.map_or("-", |strategy| strategy.as_str());
            let _ = writeln!(out, "  {} / {}", label(scenario.best), label(scenario.worst));
        }

        if !self.ranking.is_empty() {
            let _ = writeln!(out, "\nOverall ranking (geometric mean speedup vs baseline)");
            for (position, entry) in self.ranking.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{:>2}. {:<12} {:>6.2}x over {} scenario(s), average change {:+.1}%",
                    position + 1,
                    entry.strategy.as_str(),
                    entry.speedup,
                    entry.scenarios,
                    entry.average_improvement_pct
                );
                if entry.strategy != Strategy::Baseline {
                    let _ = writeln!(
                        out,
                        "    best: {}  worst: {}",
                        entry.best_scenario.as_deref().unwrap_or("-"),
                        entry.worst_scenario.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        if !self.inconsistencies.is_empty() {
            let _ = writeln!(out, "\nInconsistencies");
            for inconsistency in &self.inconsistencies {
                let _ = writeln!(out, "  - {inconsistency}");
            }
        }
        out
    }
}
