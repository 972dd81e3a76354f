//! Writes the next cycle's `Qinit` file for every VPU in the store.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::{
    logging, ConsolidatedStore, ForecastCycle, InitialConditionExtractor, JobFanout, PipelineConfig, VpuId,
};
use tracing::{error, info};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "init_conditions", about = "Extract next-cycle initial conditions from the ensemble mean")]
struct Args {
    /// Cycle date, YYYYMMDD.
    #[arg(long)]
    ymd: String,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<ExitCode> {
    let config = PipelineConfig::load().context("loading configuration")?;
    let cycle = ForecastCycle::parse(&args.ymd)?;
    let store = ConsolidatedStore::open(&config.paths.cycle(cycle).store_path())?;
    let vpus: Vec<VpuId> = store.vpu_extents().iter().map(|e| e.vpu.clone()).collect();

    let extractor = InitialConditionExtractor::new(&config.paths, cycle);
    info!(cycle = %cycle, vpus = vpus.len(), "extracting initial conditions");
    let report = JobFanout::new(config.settings.max_workers)
        .run(&vpus, |vpu| extractor.extract_vpu(&store, vpu).map(|_| ()))?;
    report.log_summary("init_conditions");
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
