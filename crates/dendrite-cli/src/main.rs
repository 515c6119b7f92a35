//! # Dendrite CLI
//!
//! Runs multi-compartment networks and checks that both execution backends
//! agree.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use dendrite_compart::{compare_backends, rates_match, NetworkBlueprint, PyramidalScenario, SpikeMonitor};
use dendrite_core::{BackendKind, ConductanceMode, EngineConfig, STEPS_PER_SECOND};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Resolutions swept by `compare` when `--substeps` is not given
const SUBSTEP_SWEEP: [u32; 4] = [10, 20, 30, 40];

/// Macro-steps per progress update
const CHUNK_MS: u64 = 100;

#[derive(Parser)]
#[command(name = "dendrite")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Multi-compartment Izhikevich network runner", long_about = None)]
struct Cli {
    /// Log engine events (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a network on one backend and report firing rates
    Run {
        #[command(flatten)]
        network: NetworkArgs,
        /// Execution backend
        #[arg(short, long, value_enum, default_value = "sequential")]
        backend: Backend,
    },

    /// Run a network on both backends and compare firing rates
    Compare {
        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Print the default engine configuration as JSON
    Config,
}

#[derive(Args)]
struct NetworkArgs {
    /// JSON network description
    #[arg(short, long, conflicts_with = "scenario")]
    network: Option<PathBuf>,
    /// Built-in network (default when no file is given)
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,
    /// Micro-steps per 1 ms timestep
    #[arg(long)]
    substeps: Option<u32>,
    /// Conductance-based synapses
    #[arg(long)]
    coba: bool,
    #[arg(long, default_value_t = 1)]
    seconds: u32,
    #[arg(long, default_value_t = 0)]
    millis: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Sequential,
    Parallel,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Sequential => BackendKind::Sequential,
            Backend::Parallel => BackendKind::Parallel,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    /// Soma with three dendrites, 5 cells per compartment
    Pyramidal,
}

fn load(args: &NetworkArgs) -> anyhow::Result<NetworkBlueprint> {
    let mut blueprint = match (&args.network, args.scenario) {
        (Some(path), _) => NetworkBlueprint::from_file(path)
            .with_context(|| format!("failed to load network {}", path.display()))?,
        (None, Some(Scenario::Pyramidal) | None) => PyramidalScenario::default().blueprint(),
    };
    if let Some(substeps) = args.substeps {
        blueprint.config.substeps = substeps;
    }
    if args.coba {
        blueprint.config.conductance = ConductanceMode::coba();
    }
    blueprint.config.validate()?;
    Ok(blueprint)
}

fn describe(config: &EngineConfig) -> String {
    format!(
        "{:?}, {} substeps, {}",
        config.method,
        config.substeps,
        if config.conductance.is_coba() { "COBA" } else { "CUBA" }
    )
}

fn run(args: &NetworkArgs, backend: BackendKind) -> anyhow::Result<()> {
    let blueprint = load(args)?;
    let mut sim = blueprint.build(backend)?;
    let total = u64::from(args.seconds) * STEPS_PER_SECOND + u64::from(args.millis);
    if total == 0 {
        bail!("run duration must be at least 1 ms");
    }

    println!(
        "{} {} neurons on the {} backend ({})",
        "Running".green().bold(),
        sim.network().neuron_count(),
        backend.to_string().cyan(),
        describe(&blueprint.config)
    );

    let pb = ProgressBar::new(total);
    pb.set_style(ProgressStyle::default_bar().template("  [{bar:40}] {pos}/{len} ms")?);

    let mut monitor = SpikeMonitor::new(sim.network());
    let mut remaining = total;
    while remaining > 0 {
        let chunk = remaining.min(CHUNK_MS);
        sim.run_network_with(0, chunk as u32, &mut monitor)?;
        pb.inc(chunk);
        remaining -= chunk;
    }
    pb.finish_and_clear();
    info!(steps = total, timestep = sim.timestep(), "run finished");

    println!();
    println!("  {:<12} {:>6} {:>10} {:>12}", "group", "size", "spikes", "rate (Hz)");
    for group in sim.network().groups() {
        println!(
            "  {:<12} {:>6} {:>10} {:>12.4}",
            group.name.cyan(),
            group.size,
            monitor.spike_count(group.id),
            monitor.pop_mean_firing_rate(group.id)
        );
    }
    Ok(())
}

fn compare(args: &NetworkArgs) -> anyhow::Result<()> {
    let base = load(args)?;
    let sweep: Vec<u32> = match args.substeps {
        Some(substeps) => vec![substeps],
        None => SUBSTEP_SWEEP.to_vec(),
    };

    let mut failures = 0;
    for &substeps in &sweep {
        let mut blueprint = base.clone();
        blueprint.config.substeps = substeps;
        println!("{} {}", "Comparing".green().bold(), describe(&blueprint.config));

        let report = compare_backends(|kind| blueprint.build(kind), args.seconds, args.millis)?;
        println!("  {:<12} {:>12} {:>12}", "group", "sequential", "parallel");
        for (name, s, p) in report.rate_pairs() {
            let status = if rates_match(s, p) {
                "ok".green()
            } else {
                "MISMATCH".red().bold()
            };
            println!("  {:<12} {:>12.4} {:>12.4}  {}", name, s, p, status);
        }
        if !report.is_equivalent() {
            failures += 1;
        }
        println!();
    }

    if failures > 0 {
        bail!("backends disagree at {} of {} resolutions", failures, sweep.len());
    }
    println!("{}", "Backends agree".green().bold());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { network, backend } => run(&network, backend.into())?,
        Commands::Compare { network } => compare(&network)?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
        }
    }

    Ok(())
}
