//! Builds `outputs/{YYYYMMDD}.zarr` from the routed discharge of a cycle.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::{logging, EnsembleAggregator, ForecastCycle, PipelineConfig, VpuId};
use tracing::{error, info, warn};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "aggregate_ensembles", about = "Merge ensemble discharge into the consolidated store")]
struct Args {
    /// Cycle date, YYYYMMDD.
    #[arg(long)]
    ymd: String,

    /// VPU to merge (repeatable). Defaults to every configured VPU.
    #[arg(long = "vpu")]
    vpus: Vec<VpuId>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<ExitCode> {
    let config = PipelineConfig::load().context("loading configuration")?;
    let cycle = ForecastCycle::parse(&args.ymd)?;
    let vpus = if args.vpus.is_empty() {
        config
            .paths
            .configured_vpus()
            .with_context(|| format!("listing VPUs in {}", config.paths.configs_dir.display()))?
    } else {
        args.vpus.clone()
    };

    let aggregator = EnsembleAggregator::from_config(&config, cycle);
    let report = aggregator
        .aggregate(&vpus)
        .with_context(|| format!("aggregating cycle {cycle}"))?;

    for excluded in &report.excluded {
        warn!(vpu = %excluded.vpu, reason = %excluded.reason, "not in store");
    }
    info!(
        store = %report.store_path.display(),
        vpus = report.merged.len(),
        excluded = report.excluded.len(),
        members = report.members.len(),
        timesteps = report.n_time,
        reaches = report.n_reach,
        "store complete"
    );
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
