use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bookingbench_core::analyzer::{compare, load_inputs};
use bookingbench_core::convert::{CompressionPolicy, ContinuousAggregate, PartitionOutcome, PartitionPolicy};
use bookingbench_core::scenario::{select, standard_suite};
use bookingbench_core::{
    BenchmarkConfig, ConnectionConfig, GenerationConfig, GenerationPlan, Generator, QueryBenchmarkRunner, StorageStrategyConverter, Strategy,
};
use bookingbench_storage_postgres::{Postgres, PostgresTarget};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "bookingbench", version, about = "Booking storage strategy benchmark")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    #[arg(long, global = true, env = "BOOKINGBENCH_HOST", default_value = "localhost")]
    host: String,
    #[arg(long, global = true, env = "BOOKINGBENCH_DATABASE", default_value = "pass_culture")]
    database: String,
    #[arg(long, global = true, env = "BOOKINGBENCH_USER", default_value = "pass_culture")]
    user: String,
    #[arg(long, global = true, env = "BOOKINGBENCH_PASSWORD", default_value = "passq", hide_env_values = true)]
    password: String,
    /// Port of the untouched baseline store.
    #[arg(long, global = true, env = "BOOKINGBENCH_BASELINE_PORT", default_value_t = ConnectionConfig::BASELINE_PORT)]
    baseline_port: u16,
    /// Port of the store the layout transforms are applied to.
    #[arg(long, global = true, env = "BOOKINGBENCH_EXPERIMENT_PORT", default_value_t = ConnectionConfig::EXPERIMENT_PORT)]
    experiment_port: u16,
}

impl ConnectionArgs {
    fn config(&self, port: u16) -> ConnectionConfig { ConnectionConfig::new(&self.host, port, &self.database, &self.user, &self.password) }

    fn baseline(&self) -> ConnectionConfig { self.config(self.baseline_port) }

    fn experiment(&self) -> ConnectionConfig { self.config(self.experiment_port) }
}

#[derive(Subcommand)]
enum Commands {
    /// Fill both stores with the same synthetic dataset.
    Seed(SeedArgs),
    /// Turn the experiment store's booking table into time chunks.
    Partition {
        #[arg(long, default_value_t = PartitionPolicy::DEFAULT_CHUNK_WIDTH_DAYS)]
        chunk_days: u32,
    },
    /// Compress the experiment store's old booking chunks.
    Compress {
        #[arg(long, default_value_t = CompressionPolicy::DEFAULT_COMPRESS_AFTER_DAYS)]
        after_days: u32,
    },
    /// Create the booking continuous aggregates on the experiment store.
    Aggregate,
    /// Run the scenario suite and write a result file.
    Bench(BenchArgs),
    /// Compare result files against the baseline.
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct SeedArgs {
    #[arg(long, env = "BOOKINGBENCH_BOOKINGS", default_value_t = 1_000_000)]
    bookings: usize,
    #[arg(long, env = "BOOKINGBENCH_BATCH_SIZE", default_value_t = GenerationConfig::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    #[arg(long, env = "BOOKINGBENCH_SEED", default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value_t = GenerationConfig::DEFAULT_WORKERS)]
    workers: usize,
    #[arg(long, default_value_t = GenerationConfig::DEFAULT_HISTORY_DAYS)]
    history_days: u32,
    #[arg(long)]
    num_users: Option<usize>,
    #[arg(long)]
    num_offerers: Option<usize>,
    #[arg(long)]
    num_venues: Option<usize>,
    #[arg(long)]
    num_offers: Option<usize>,
    #[arg(long)]
    num_stocks: Option<usize>,
    #[arg(long)]
    skip_baseline: bool,
    #[arg(long)]
    skip_experiment: bool,
}

impl SeedArgs {
    fn config(&self) -> GenerationConfig {
        let mut plan = GenerationPlan::for_bookings(self.bookings);
        if let Some(users) = self.num_users {
            plan = plan.with_users(users);
        }
        if let Some(offerers) = self.num_offerers {
            plan = plan.with_offerers(offerers);
        }
        if let Some(venues) = self.num_venues {
            plan = plan.with_venues(venues);
        }
        if let Some(offers) = self.num_offers {
            plan = plan.with_offers(offers);
        }
        if let Some(stocks) = self.num_stocks {
            plan = plan.with_stocks(stocks);
        }
        GenerationConfig::builder(self.bookings)
            .plan(plan)
            .batch_size(self.batch_size)
            .seed(self.seed)
            .workers(self.workers)
            .history_days(self.history_days)
            .build()
    }
}

#[derive(Args)]
struct BenchArgs {
    /// baseline, partitioned, compressed or aggregated. Baseline runs against the baseline store.
    #[arg(long, env = "BOOKINGBENCH_STRATEGY")]
    strategy: Strategy,
    #[arg(long, default_value_t = BenchmarkConfig::DEFAULT_REPETITIONS)]
    repetitions: usize,
    #[arg(long, default_value_t = 1)]
    warmup: usize,
    /// Per-repetition deadline in seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    /// Only run these scenarios.
    #[arg(long = "scenario")]
    scenarios: Vec<String>,
    /// Defaults to results/<strategy>.json.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Result files or directories of result files.
    #[arg(default_value = "results")]
    inputs: Vec<PathBuf>,
    /// Also write the report as JSON.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Write the text report here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let level = match std::env::var("LOG_LEVEL") {
        Ok(level) => Level::from_str(&level).with_context(|| format!("invalid LOG_LEVEL {level:?}"))?,
        Err(_) => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Seed(args) => seed(&cli.connection, &args).await,
        Commands::Partition { chunk_days } => {
            let store = Postgres::connect(&cli.connection.experiment(), Postgres::DEFAULT_POOL_SIZE).await.context("partition: connecting")?;
            let policy = PartitionPolicy::booking().chunk_width_days(chunk_days);
            match StorageStrategyConverter::new(&store).partition(&policy).await.context("partition")? {
                PartitionOutcome::AlreadyPartitioned { chunks } => info!("booking was already partitioned ({chunks} chunks)"),
                PartitionOutcome::Partitioned(summary) => {
                    info!("booking partitioned: {} rows in {} chunks, indexes {:?}", summary.rows, summary.chunks, summary.indexes)
                }
            }
            Ok(())
        }
        Commands::Compress { after_days } => {
            let store = Postgres::connect(&cli.connection.experiment(), Postgres::DEFAULT_POOL_SIZE).await.context("compress: connecting")?;
            let policy = CompressionPolicy::booking().compress_after_days(after_days);
            let summary = StorageStrategyConverter::new(&store).compress(&policy).await.context("compress")?;
            info!("booking compressed: {summary}");
            Ok(())
        }
        Commands::Aggregate => {
            let store = Postgres::connect(&cli.connection.experiment(), Postgres::DEFAULT_POOL_SIZE).await.context("aggregate: connecting")?;
            let summary = StorageStrategyConverter::new(&store).aggregate(&ContinuousAggregate::booking_suite()).await.context("aggregate")?;
            info!("continuous aggregates ready: {}", summary.views.join(", "));
            Ok(())
        }
        Commands::Bench(args) => bench(&cli.connection, args).await,
        Commands::Analyze(args) => analyze(args),
    }
}

async fn seed(connection: &ConnectionArgs, args: &SeedArgs) -> Result<()> {
    if args.skip_baseline && args.skip_experiment {
        bail!("seed: both stores skipped, nothing to do");
    }
    // One config so both stores receive the same window and therefore the same rows.
    let config = args.config();
    config.validate().context("seed: invalid configuration")?;

    let seed_one = |label: &'static str, target: ConnectionConfig, skip: bool| {
        let config = config.clone();
        async move {
            if skip {
                info!("Skipping the {label} store");
                return Ok(None);
            }
            let store = Postgres::connect(&target, config.workers as u32 + 1).await.with_context(|| format!("seed {label}: connecting"))?;
            let report = Generator::new(&store, config).generate().await.with_context(|| format!("seed {label}"))?;
            anyhow::Ok(Some(report))
        }
    };

    let (baseline, experiment) = tokio::try_join!(
        seed_one("baseline", connection.baseline(), args.skip_baseline),
        seed_one("experiment", connection.experiment(), args.skip_experiment),
    )?;
    for report in [baseline, experiment].into_iter().flatten() {
        report.print_summary();
    }
    Ok(())
}

async fn bench(connection: &ConnectionArgs, args: BenchArgs) -> Result<()> {
    let suite = select(standard_suite(), &args.scenarios).map_err(|unknown| anyhow::anyhow!("bench: unknown scenario(s) {}", unknown.join(", ")))?;
    let target_config = match args.strategy {
        Strategy::Baseline => connection.baseline(),
        _ => connection.experiment(),
    };
    let timeout = Duration::from_secs(args.timeout_secs);
    // The server cancels slightly after the client gives up, so a stuck statement never outlives the session.
    let target = PostgresTarget::new(target_config).statement_timeout(timeout + Duration::from_secs(1));
    let config = BenchmarkConfig::new(args.strategy).repetitions(args.repetitions).warmup(args.warmup).scenario_timeout(timeout);

    let output = args.output.unwrap_or_else(|| PathBuf::from("results").join(format!("{}.json", args.strategy)));
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("bench: creating {}", parent.display()))?;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current scenario");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let runner = QueryBenchmarkRunner::new(&target, config).checkpoint_to(&output).with_cancel(cancel);
    let results = runner.run(&suite).await.with_context(|| format!("bench {}", args.strategy))?;

    let failed: Vec<&str> = results.scenarios.iter().filter(|(_, result)| result.failed()).map(|(name, _)| name.as_str()).collect();
    if !failed.is_empty() {
        warn!("{} scenario(s) produced no samples: {}", failed.len(), failed.join(", "));
    }
    info!("Results written to {}", output.display());
    if !results.metadata.complete {
        bail!("bench {}: cancelled after {} of {} scenarios", args.strategy, results.scenarios.len(), suite.len());
    }
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let (sets, problems) = load_inputs(&args.inputs);
    let mut report = compare(&sets);
    report.inconsistencies.extend(problems);
    report.inconsistencies.sort();

    let text = report.render_text();
    match &args.output {
        Some(path) => std::fs::write(path, &text).with_context(|| format!("analyze: writing {}", path.display()))?,
        None => print!("{text}"),
    }
    if let Some(path) = &args.json {
        let json = report.to_json().context("analyze: serializing the report")?;
        std::fs::write(path, json).with_context(|| format!("analyze: writing {}", path.display()))?;
    }
    Ok(())
}
