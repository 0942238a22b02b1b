//! FlowVis - Command-line entry point
//!
//! Runs a pipeline simulation from a config file and writes the keyframe
//! timeline as JSON for the renderer.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flowvis_rs::config::{ConfigFormat, SimConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// FlowVis: simulate pull-based async pipelines
///
/// Produces a deterministic keyframe timeline of every request, future and
/// work item moving through the configured stages.
#[derive(Debug, Parser)]
#[command(name = "flowvis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to this file.
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a simulation and export its timeline.
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Print the built-in demo configuration.
    DefaultConfig {
        #[arg(long, value_enum, default_value_t = FormatArg::Toml)]
        format: FormatArg,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Pipeline config (TOML or JSON). Uses the demo pipeline when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the horizon in milliseconds.
    #[arg(long, value_name = "MS")]
    horizon_ms: Option<u64>,

    /// Write the timeline here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Pretty-print the timeline JSON.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Toml,
    Json,
}

impl From<FormatArg> for ConfigFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Toml => ConfigFormat::Toml,
            FormatArg::Json => ConfigFormat::Json,
        }
    }
}

/// Initialize logging. The returned guard flushes the file writer on drop.
fn init_tracing(
    verbose: u8,
    log_file: Option<&PathBuf>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = match verbose {
        0 => "info,flowvis_rs=debug",
        1 => "debug,flowvis_rs=debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(None)
        }
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(horizon) = args.horizon_ms {
        config.max_time_ms = horizon;
    }

    let mut sim = config.build_simulation()?;
    let summary = sim.run().context("Simulation aborted")?;
    tracing::info!(
        "Finished after {} round trip(s), {} tokens, loop length {} ms",
        summary.round_trips,
        summary.tokens,
        summary.total_duration
    );

    let timeline = sim.into_timeline();
    match &args.output {
        Some(path) => {
            timeline
                .save_to_file(path, args.pretty)
                .with_context(|| format!("Failed to write timeline to {:?}", path))?;
            tracing::info!("Timeline written to {:?}", path);
        }
        None => {
            let json = if args.pretty {
                serde_json::to_string_pretty(&timeline)?
            } else {
                serde_json::to_string(&timeline)?
            };
            println!("{json}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_tracing(cli.verbose, cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::DefaultConfig { format } => SimConfig::default()
            .render(format.into())
            .map(|text| print!("{text}"))
            .map_err(anyhow::Error::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
