//! Folds a cycle's per-VPU tables into `mapstyletable_{%Y-%m-%d-%H}.csv` files.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::{logging, ForecastCycle, GlobalTableMerger, PipelineConfig};
use tracing::{error, info};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "global_tables", about = "Merge classified tables into per-timestamp CSV files")]
struct Args {
    /// Cycle date, YYYYMMDD.
    #[arg(long)]
    ymd: String,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<ExitCode> {
    let config = PipelineConfig::load().context("loading configuration")?;
    let cycle = ForecastCycle::parse(&args.ymd)?;
    let report = GlobalTableMerger::new(config.paths.cycle(cycle))
        .merge()
        .with_context(|| format!("merging tables of cycle {cycle}"))?;
    info!(vpus = report.vpus.len(), partitions = report.partitions.len(), "done");
    Ok(ExitCode::SUCCESS)
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
