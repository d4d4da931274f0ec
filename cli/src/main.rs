//! qss - command-line front end for the Quantized State System solver.
//!
//! Features:
//! - Modern CLI with clap derive macros
//! - Structured logging with tracing
//! - Progress indicators
//! - Colored output

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, Args, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use qss_core::{Oracle, SimConfig, SimulationReport, Simulator, StateAlgorithm};
use qss_engine::{BufferedSampleStream, CsvOutputSink, OutputSink, Sample, SampleKind, SimulationConfig};
use qss_engine::testutil::{self, ACHILLES_X1, ACHILLES_X2};

/// qss - Quantized State System (QSS/LIQSS) event-driven ODE solver
#[derive(Parser)]
#[command(name = "qss")]
#[command(author = "QSS Solver Team")]
#[command(version)]
#[command(about = "Quantized State System event-driven ODE/hybrid-system solver", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Display solver information and bundled demo models
    Info,

    /// Run one of the bundled reference demo models
    Demo(DemoArgs),

    /// Run a simulation from a TOML configuration file
    Run(RunArgs),
}

#[derive(Args)]
struct DemoArgs {
    /// Which demo model to run
    #[arg(value_enum)]
    model: DemoModel,

    /// Simulation end time
    #[arg(long, default_value_t = 10.0)]
    t_end: f64,

    /// Write sampled trajectories to this CSV file instead of a summary
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DemoModel {
    /// Bouncing ball under gravity, QSS2, with a zero-crossing bounce handler
    BouncingBall,
    /// Achilles/tortoise linear-pursuit pair, QSS3
    AchillesQss3,
    /// Achilles/tortoise linear-pursuit pair, LIQSS2
    AchillesLiqss2,
}

#[derive(Args)]
struct RunArgs {
    /// Path to a `SimulationConfig` TOML file
    config: PathBuf,

    /// Which bundled model the config's run window applies to
    #[arg(value_enum, long, default_value = "bouncing-ball")]
    model: DemoModel,
}

fn demo_header(name: &str) {
    println!("\n{} {}", "Running demo:".cyan().bold(), name.yellow());
    println!("{}", "-".repeat(60).dimmed());
}

fn report_summary(start: Instant, report: &SimulationReport) {
    println!("{}", "-".repeat(60).dimmed());
    println!("{} {:.6}", "final time:".green(), report.final_time);
    println!("{} {}", "discrete events:".green(), report.discrete_events);
    println!("{} {}", "qss events:".green(), report.qss_events);
    println!("{} {}", "zero-crossing events:".green(), report.zero_crossing_events);
    println!("{} {}", "handler events:".green(), report.handler_events);
    println!("{} {:.3?}", "wall time:".dimmed(), start.elapsed());
}

/// Step the simulator to completion, optionally sampling each named
/// variable's quantized trajectory into a CSV file after every event
/// batch (spec.md §6.3).
fn run_with_optional_csv<O: Oracle>(sim: &mut Simulator<O>, output: &Option<PathBuf>, names: &[&str]) -> anyhow::Result<SimulationReport> {
    let Some(path) = output else {
        return Ok(sim.run()?);
    };

    let file = File::create(path)?;
    let sink = CsvOutputSink::new(BufWriter::new(file));
    let mut stream = BufferedSampleStream::new(sink);

    while let Some(t) = sim.step()? {
        for (idx, name) in names.iter().enumerate() {
            let value = sim.variables[idx].q_at(t);
            stream.push(name, SampleKind::Q, Sample { t, value })?;
        }
    }
    stream.finish()?;
    Ok(sim.report())
}

fn run_demo(args: DemoArgs) -> anyhow::Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
    bar.set_message("integrating...");
    bar.enable_steady_tick(std::time::Duration::from_millis(80));

    let start = Instant::now();
    let sim_config = SimConfig::default();

    match args.model {
        DemoModel::BouncingBall => {
            demo_header("bouncing ball (QSS2)");
            let (variables, oracle) = testutil::bouncing_ball_model();
            let mut sim = Simulator::new(variables, oracle, sim_config, 0.0, args.t_end);
            sim.initialize()?;
            let report = run_with_optional_csv(&mut sim, &args.output, &["h", "v"])?;
            bar.finish_and_clear();
            report_summary(start, &report);
            println!("{} {}", "bounces:".green(), sim.oracle.bounce_count());
        }
        DemoModel::AchillesQss3 => {
            demo_header("Achilles/tortoise pursuit (QSS3)");
            let (variables, oracle) = testutil::achilles_model(StateAlgorithm::Qss, 3);
            let mut sim = Simulator::new(variables, oracle, sim_config, 0.0, args.t_end);
            sim.initialize()?;
            let report = run_with_optional_csv(&mut sim, &args.output, &["x1", "x2"])?;
            bar.finish_and_clear();
            report_summary(start, &report);
            println!("{} x1={:.6} x2={:.6}", "final positions:".green(), sim.oracle.get_real(ACHILLES_X1), sim.oracle.get_real(ACHILLES_X2));
        }
        DemoModel::AchillesLiqss2 => {
            demo_header("Achilles/tortoise pursuit (LIQSS2)");
            let (variables, oracle) = testutil::achilles_model(StateAlgorithm::Liqss, 2);
            let mut sim = Simulator::new(variables, oracle, sim_config, 0.0, args.t_end);
            sim.initialize()?;
            let report = run_with_optional_csv(&mut sim, &args.output, &["x1", "x2"])?;
            bar.finish_and_clear();
            report_summary(start, &report);
            println!("{} x1={:.6} x2={:.6}", "final positions:".green(), sim.oracle.get_real(ACHILLES_X1), sim.oracle.get_real(ACHILLES_X2));
        }
    }
    Ok(())
}

fn run_from_config(args: RunArgs) -> anyhow::Result<()> {
    let config = SimulationConfig::load(&args.config)?;
    let sim_config = config.to_sim_config();
    let output = config.output.path.clone();

    demo_header(&format!("configured run: {:?}", args.model));
    let start = Instant::now();

    let report = match args.model {
        DemoModel::BouncingBall => {
            let (variables, oracle) = testutil::bouncing_ball_model();
            let mut sim = Simulator::new(variables, oracle, sim_config, config.run.t_start, config.run.t_end);
            sim.max_events = config.run.max_events;
            sim.initialize()?;
            run_with_optional_csv(&mut sim, &output, &["h", "v"])?
        }
        DemoModel::AchillesQss3 => {
            let (variables, oracle) = testutil::achilles_model(StateAlgorithm::Qss, 3);
            let mut sim = Simulator::new(variables, oracle, sim_config, config.run.t_start, config.run.t_end);
            sim.max_events = config.run.max_events;
            sim.initialize()?;
            run_with_optional_csv(&mut sim, &output, &["x1", "x2"])?
        }
        DemoModel::AchillesLiqss2 => {
            let (variables, oracle) = testutil::achilles_model(StateAlgorithm::Liqss, 2);
            let mut sim = Simulator::new(variables, oracle, sim_config, config.run.t_start, config.run.t_end);
            sim.max_events = config.run.max_events;
            sim.initialize()?;
            run_with_optional_csv(&mut sim, &output, &["x1", "x2"])?
        }
    };

    report_summary(start, &report);
    Ok(())
}

fn print_info() {
    println!("\n{}", "QSS Solver Information".cyan().bold());
    println!("{}\n", "=".repeat(60).dimmed());

    println!("{}: {}", "Version".yellow(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("{}", "CRATES:".yellow().bold());
    println!("{}", "-".repeat(60).dimmed());
    println!("  {} | Variable model, event queue, QSS/LIQSS kernel, zero-crossing engine", "qss-core  ".cyan());
    println!("  {} | Model metadata, config, output sinks, persisted state, demo oracles", "qss-engine".cyan());
    println!("  {} | This command-line front end", "qss-cli   ".cyan());
    println!();

    println!("{}", "ALGORITHMS:".yellow().bold());
    println!("{}", "-".repeat(60).dimmed());
    println!("  QSS1 / QSS2 / QSS3         explicit quantized-state integration");
    println!("  LIQSS1 / LIQSS2 / LIQSS3   implicit, hysteresis-stabilized self-observers");
    println!();

    println!("{}", "BUNDLED DEMOS:".yellow().bold());
    println!("{}", "-".repeat(60).dimmed());
    println!("  {}   h, v under gravity; zero-crossing bounce handler", "bouncing-ball  ".cyan());
    println!("  {}   linear mutual-pursuit pair, QSS3", "achilles-qss3  ".cyan());
    println!("  {}   linear mutual-pursuit pair, LIQSS2", "achilles-liqss2".cyan());
    println!();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(true).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to install tracing subscriber");
    if cli.verbose {
        info!("verbose logging enabled");
    }

    match cli.command {
        Commands::Info => {
            print_info();
            Ok(())
        }
        Commands::Demo(args) => run_demo(args),
        Commands::Run(args) => run_from_config(args),
    }
}
