//! MIS-rs CLI: Mechanistic Interpretability Score

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use mis_rs::{MetricKind, MisConfig, MisExperiment};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mis-rs")]
#[command(about = "Mechanistic Interpretability Score from psychophysics tasks")]
#[command(version)]
struct Cli {
    /// Safetensors file with `activations` and `representations`
    /// (or `representations.<metric>`)
    #[arg(short, long)]
    input: PathBuf,

    /// Similarity metric ("lpips" or "dreamsim")
    #[arg(short, long, default_value = "dreamsim")]
    metric: String,

    /// JSON config file; command-line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Explanation set size
    #[arg(short)]
    k: Option<usize>,

    /// Tasks per unit
    #[arg(short = 'n', long = "tasks")]
    n_tasks: Option<usize>,

    /// Quantile pool fraction in (0, 1]
    #[arg(short, long)]
    quantile: Option<f64>,

    /// Sigmoid sharpness
    #[arg(short, long, conflicts_with = "decision_rate")]
    alpha: Option<f64>,

    /// Score the binary decision rate instead of the sigmoid mean
    #[arg(long)]
    decision_rate: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Activations are stored (n_samples, n_units)
    #[arg(long)]
    sample_major: bool,

    /// Output JSON report
    #[arg(short, long, default_value = "outputs/mis_results.json")]
    output: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Force CPU mode
    #[arg(long)]
    cpu: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<MisConfig> {
        let mut config = match &self.config {
            Some(path) => MisConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => MisConfig::default(),
        };
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(n) = self.n_tasks {
            config.n_tasks = n;
        }
        if let Some(q) = self.quantile {
            config.quantile = q;
        }
        if let Some(a) = self.alpha {
            config.alpha = Some(a);
        }
        if self.decision_rate {
            config.alpha = None;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Resolve the backend before touching any data
    let metric: MetricKind = cli.metric.parse()?;
    let config = cli.resolve_config()?;

    println!("=== MIS-rs: Mechanistic Interpretability Score ===");
    println!("Input:  {}", cli.input.display());
    println!("Metric: {metric}");
    println!("Output: {}", cli.output.display());

    let device = if cli.cpu {
        info!("Forcing CPU mode");
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    info!("Device: {:?}", device);

    let tensors = candle_core::safetensors::load(&cli.input, &device)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let activations = tensors
        .get("activations")
        .context("Input is missing an `activations` tensor")?;
    let activations = if cli.sample_major {
        activations.t()?.contiguous()?
    } else {
        activations.clone()
    };
    let keyed = format!("representations.{metric}");
    let representations = tensors
        .get(&keyed)
        .or_else(|| tensors.get("representations"))
        .with_context(|| format!("Input has neither `{keyed}` nor `representations`"))?;

    info!(
        "Activations {:?}, representations {:?}",
        activations.dims(),
        representations.dims()
    );

    let experiment = MisExperiment::new(metric, config);
    let report = experiment.run(representations, &activations)?;

    // Print results
    println!("\n=== Results ===");
    for (unit, score) in report.scores.iter().enumerate() {
        println!("Unit {unit:4}: {score:.3}");
    }
    println!(
        "\nMean: {:.3}  Best: unit {} with {:.3}",
        report.mean_score, report.best_unit, report.best_score
    );

    // Save results
    if let Some(parent) = cli.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    report.save(&cli.output)?;
    info!("Results saved to {}", cli.output.display());

    Ok(())
}
