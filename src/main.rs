//! dnntune CLI
//!
//! Runs the hyperparameter search, retrains the best network and evaluates
//! it on the test table.
//!
//! ```bash
//! dnntune --config configs/dloc.yaml
//! dnntune --target overload_loc --max-trials 5 --device cpu -v
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use dnntune::config::RunConfig;
use dnntune::device::DeviceKind;
use dnntune::experiment;

#[derive(Debug, Parser)]
#[command(name = "dnntune", version, about = "Bayesian hyperparameter search for a feedforward classifier")]
struct Cli {
    /// YAML run configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target column to predict
    #[arg(long)]
    target: Option<String>,

    #[arg(long)]
    train: Option<PathBuf>,

    #[arg(long)]
    test: Option<PathBuf>,

    /// Directory the timestamped run folders go in
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    max_trials: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    device: Option<DeviceKind>,

    #[arg(long)]
    gpu_index: Option<usize>,

    #[arg(long)]
    memory_limit_mb: Option<u64>,

    /// More logging, repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::WARN,
            (false, 0) => LevelFilter::INFO,
            (false, 1) => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(target) = self.target {
            config.data.target = target;
        }
        if let Some(train) = self.train {
            config.data.train_path = train;
        }
        if let Some(test) = self.test {
            config.data.test_path = test;
        }
        if let Some(seed) = self.seed {
            config.data.seed = seed;
        }
        if let Some(root) = self.output_dir {
            config.output.root = root;
        }
        if let Some(max_trials) = self.max_trials {
            config.search.max_trials = max_trials;
        }
        if let Some(epochs) = self.epochs {
            config.search.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.search.batch_size = batch_size;
        }
        if let Some(kind) = self.device {
            config.device.kind = kind;
        }
        if let Some(index) = self.gpu_index {
            config.device.gpu_index = index;
        }
        if let Some(limit) = self.memory_limit_mb {
            config.device.memory_limit_mb = limit;
        }
        config
    }
}

fn init_logging(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.level());

    let config = match &cli.config {
        Some(path) => match RunConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => RunConfig::default(),
    };
    let config = cli.apply(config);

    match experiment::run(&config) {
        Ok(summary) => {
            println!("Time_consuming: {}", summary.record.time_consuming);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let mut chain = e.to_string();
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                chain.push_str(": ");
                chain.push_str(&cause.to_string());
                source = cause.source();
            }
            error!(error = %chain, "run failed");
            ExitCode::FAILURE
        }
    }
}
