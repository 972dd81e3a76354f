//! Classifies the ensemble mean of each VPU into `maptables/map_{vpu}_{ymd}.parquet`.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::maptable::MapOutcome;
use forecast_core::{logging, ConsolidatedStore, ForecastCycle, JobFanout, MapClassifier, PipelineConfig, VpuId};
use tracing::{error, info};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "map_tables", about = "Classify ensemble-mean discharge per VPU")]
struct Args {
    /// Cycle date, YYYYMMDD.
    #[arg(long)]
    ymd: String,

    /// VPU to classify (repeatable). Defaults to every VPU in the store.
    #[arg(long = "vpu")]
    vpus: Vec<VpuId>,

    /// Re-classify VPUs whose table already exists.
    #[arg(long)]
    rebuild: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<ExitCode> {
    let config = PipelineConfig::load().context("loading configuration")?;
    let cycle = ForecastCycle::parse(&args.ymd)?;
    let store = ConsolidatedStore::open(&config.paths.cycle(cycle).store_path())?;
    let vpus: Vec<VpuId> = if args.vpus.is_empty() {
        store.vpu_extents().iter().map(|e| e.vpu.clone()).collect()
    } else {
        args.vpus.clone()
    };

    let classifier = MapClassifier::new(&config.paths, cycle, args.rebuild);
    info!(cycle = %cycle, vpus = vpus.len(), rebuild = args.rebuild, "classifying");
    let report = JobFanout::new(config.settings.max_workers).run(&vpus, |vpu| {
        classifier.classify_vpu(&store, vpu).map(|outcome| {
            if outcome == MapOutcome::Skipped {
                info!(vpu = %vpu, "kept existing table");
            }
        })
    })?;
    report.log_summary("map_tables");
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
