//! Runs the routing executable once per namelist of a cycle, slowest VPUs
//! first, on a bounded pool. Each run appends to `logs/{vpu}_{label}.log`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::{logging, ForecastCycle, PipelineConfig, RoutingRunner};
use tracing::error;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "run_routing", about = "Route every namelist of a forecast cycle")]
struct Args {
    /// Cycle date, YYYYMMDD.
    #[arg(long)]
    ymd: String,

    /// Routing executable; overrides `routing_executable` from the settings file.
    #[arg(long)]
    executable: Option<PathBuf>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<ExitCode> {
    let config = PipelineConfig::load().context("loading configuration")?;
    let cycle = ForecastCycle::parse(&args.ymd)?;
    let mut runner = RoutingRunner::from_settings(&config.settings);
    if let Some(executable) = &args.executable {
        runner = runner.with_executable(executable.clone());
    }

    let report = runner
        .run(&config.paths.cycle(cycle))
        .with_context(|| format!("routing cycle {cycle}"))?;
    report.log_summary("routing");
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
