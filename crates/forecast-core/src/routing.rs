//! Routing fan-out: one run of the routing executable per namelist of a
//! cycle, slowest VPUs first. Each run appends to `logs/{vpu}_{label}.log`,
//! framed by start and finish timestamps.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Utc;
use tracing::info;

use crate::config::Settings;
use crate::cycle::CycleLayout;
use crate::error::{PipelineError, Result};
use crate::fanout::{BatchReport, JobFanout, WorkUnit};
use crate::ids::{natural_cmp, Namelist};
use crate::priority::PriorityOrderer;

/// One namelist and the log its run appends to.
#[derive(Debug, Clone)]
pub struct RoutingJob {
    pub namelist: Namelist,
    pub path: PathBuf,
    pub log: PathBuf,
}

impl WorkUnit for RoutingJob {
    fn label(&self) -> String {
        format!("vpu {} ({})", self.namelist.vpu, self.namelist.label)
    }
}

/// Lists the namelists of a cycle, ordered by label within each VPU.
pub fn discover_jobs(layout: &CycleLayout) -> Result<Vec<RoutingJob>> {
    let (namelists_dir, logs_dir) = (layout.namelists_dir(), layout.logs_dir());
    if !namelists_dir.is_dir() {
        return Err(PipelineError::MissingInput(format!(
            "namelist directory {} does not exist",
            namelists_dir.display()
        )));
    }
    let mut jobs = Vec::new();
    for entry in fs::read_dir(&namelists_dir).map_err(PipelineError::io(&namelists_dir))? {
        let entry = entry.map_err(PipelineError::io(&namelists_dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let namelist = Namelist::parse_name(&entry.file_name().to_string_lossy())?;
        let log = logs_dir.join(format!("{}_{}.log", namelist.vpu, namelist.label));
        jobs.push(RoutingJob { namelist, path, log });
    }
    // deterministic order within a VPU before the stable priority sort
    jobs.sort_by(|a, b| natural_cmp(&a.namelist.label, &b.namelist.label));
    Ok(jobs)
}

fn stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Runs every namelist of a cycle through the routing executable.
#[derive(Debug, Clone)]
pub struct RoutingRunner {
    executable: PathBuf,
    orderer: PriorityOrderer,
    fanout: JobFanout,
}

impl RoutingRunner {
    pub fn new(executable: PathBuf, orderer: PriorityOrderer, fanout: JobFanout) -> Self {
        Self {
            executable,
            orderer,
            fanout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.routing_executable.clone(),
            PriorityOrderer::from_settings(settings.priority.as_deref()),
            JobFanout::new(settings.max_workers),
        )
    }

    /// Replaces the executable, keeping ordering and pool size.
    pub fn with_executable(mut self, executable: PathBuf) -> Self {
        self.executable = executable;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Discovers, orders and runs the cycle's namelists. Failed runs are
    /// recorded in the report; only a missing or empty namelist directory,
    /// an unranked VPU or an unusable log directory abort the batch.
    pub fn run(&self, layout: &CycleLayout) -> Result<BatchReport> {
        let jobs = discover_jobs(layout)?;
        if jobs.is_empty() {
            return Err(PipelineError::MissingInput(format!(
                "no namelists in {}",
                layout.namelists_dir().display()
            )));
        }
        let jobs = self.orderer.order_by(jobs, |job| &job.namelist.vpu)?;
        let logs_dir = layout.logs_dir();
        fs::create_dir_all(&logs_dir).map_err(PipelineError::io(&logs_dir))?;

        info!(cycle = %layout.cycle(), jobs = jobs.len(), executable = %self.executable.display(), "routing");
        self.fanout.run(&jobs, |job| self.route(job))
    }

    /// One routing run, appending its output to the job's log.
    pub fn route(&self, job: &RoutingJob) -> Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&job.log)
            .map_err(PipelineError::io(&job.log))?;
        writeln!(log, "Job started at {}", stamp()).map_err(PipelineError::io(&job.log))?;
        log.flush().map_err(PipelineError::io(&job.log))?;

        let stdout = log.try_clone().map_err(PipelineError::io(&job.log))?;
        let stderr = log.try_clone().map_err(PipelineError::io(&job.log))?;
        let status = Command::new(&self.executable)
            .arg("--namelist")
            .arg(&job.path)
            .arg("--ksp_type")
            .arg("preonly")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status();

        writeln!(log, "Job finished at {}", stamp()).map_err(PipelineError::io(&job.log))?;
        let status = status.map_err(|e| PipelineError::Routing {
            namelist: job.path.clone(),
            reason: format!("could not start {}: {e}", self.executable.display()),
        })?;
        if !status.success() {
            return Err(PipelineError::Routing {
                namelist: job.path.clone(),
                reason: format!("{} exited with {status}", self.executable.display()),
            });
        }
        Ok(())
    }
}
