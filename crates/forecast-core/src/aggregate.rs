//! Merging per-VPU, per-member discharge into the consolidated store.
//!
//! A VPU is merged only with its full ensemble: the perturbed members
//! expected for the cycle plus the control member. Incomplete VPUs are left
//! out and reported; inconsistent data (reach order, time axis, duplicate
//! reaches) fails the whole merge and leaves no store at the final path.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, Settings};
use crate::cycle::{CycleLayout, ForecastCycle};
use crate::discharge::{DischargeFile, DischargeSeries, FileAxes};
use crate::error::{PipelineError, Result};
use crate::ids::{runoff_member, EnsembleMember, OutputFile, VpuId};
use crate::store::{StoreAttrs, StoreOptions, StoreWriter, VpuExtent};

impl From<&Settings> for StoreOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            chunk_target_bytes: settings.chunk_target_bytes,
            zstd_level: settings.zstd_level,
        }
    }
}

/// A requested VPU that was left out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedVpu {
    pub vpu: VpuId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub store_path: PathBuf,
    /// Merged VPUs in store order.
    pub merged: Vec<VpuExtent>,
    pub excluded: Vec<ExcludedVpu>,
    pub members: Vec<EnsembleMember>,
    pub n_time: usize,
    pub n_reach: usize,
}

/// Where a VPU's perturbed members come from.
#[derive(Debug, Clone)]
enum PerturbedSource {
    /// `Qout_{vpu}.nc` with an ensemble axis.
    Merged(PathBuf),
    /// `Qout_{vpu}_{m}.nc`, ascending by member.
    Members(Vec<(EnsembleMember, PathBuf)>),
}

/// A VPU that passed the roster checks.
#[derive(Debug)]
struct Candidate {
    vpu: VpuId,
    control: PathBuf,
    perturbed: PerturbedSource,
    axes: FileAxes,
}

/// Discharge outputs of one VPU found in the outputs directory.
#[derive(Debug, Default)]
struct Found {
    merged: bool,
    members: BTreeSet<EnsembleMember>,
}

pub struct EnsembleAggregator {
    layout: CycleLayout,
    runoff_dir: PathBuf,
    options: StoreOptions,
}

impl EnsembleAggregator {
    pub fn new(layout: CycleLayout, runoff_dir: PathBuf, options: StoreOptions) -> Self {
        Self {
            layout,
            runoff_dir,
            options,
        }
    }

    pub fn from_config(config: &PipelineConfig, cycle: ForecastCycle) -> Self {
        Self::new(
            config.paths.cycle(cycle),
            config.paths.runoff_dir(cycle),
            StoreOptions::from(&config.settings),
        )
    }

    /// Perturbed members the cycle was forced with: the runoff files present
    /// for the cycle, or `1..=51` when there are none to go by.
    pub fn expected_members(&self) -> Result<Vec<EnsembleMember>> {
        expected_members(&self.runoff_dir)
    }

    /// Builds the store from `vpus` (deduplicated, merged in natural order).
    pub fn aggregate(&self, vpus: &[VpuId]) -> Result<AggregationReport> {
        let expected = self.expected_members()?;
        let found = scan_outputs(&self.layout.outputs_dir())?;

        let mut requested = vpus.to_vec();
        requested.sort();
        requested.dedup();

        let mut excluded = Vec::new();
        let mut candidates = Vec::new();
        for vpu in requested {
            match self.screen(&vpu, found.get(&vpu), &expected)? {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    warn!(vpu = %vpu, %reason, "excluding VPU from the store");
                    excluded.push(ExcludedVpu { vpu, reason });
                }
            }
        }
        if candidates.is_empty() {
            return Err(PipelineError::MissingInput(format!(
                "no VPU has a complete ensemble in {}",
                self.layout.outputs_dir().display()
            )));
        }
        check_disjoint(&candidates)?;
        let times = candidates[0].axes.times.clone();
        if let Some(other) = candidates.iter().find(|c| c.axes.times != times) {
            return Err(PipelineError::StructuralMismatch(format!(
                "time axis of VPU {} differs from VPU {}",
                other.vpu, candidates[0].vpu
            )));
        }

        let mut members = expected.clone();
        members.push(EnsembleMember::CONTROL);
        let n_reach: usize = candidates.iter().map(|c| c.axes.rivids.len()).sum();
        let store_path = self.layout.store_path();
        info!(
            vpus = candidates.len(),
            excluded = excluded.len(),
            reaches = n_reach,
            members = members.len(),
            steps = times.len(),
            "building consolidated store"
        );

        let mut writer = StoreWriter::create(&store_path, times.clone(), members.clone(), n_reach, self.options)?;
        debug!(chunk = writer.chunk_len(), "reaches per chunk");
        let mut merged = Vec::with_capacity(candidates.len());
        let mut offset = 0;
        for candidate in &candidates {
            let series = load_vpu(candidate, &expected)?;
            writer.push_series(&series)?;
            info!(vpu = %candidate.vpu, reaches = series.n_reach(), "merged");
            merged.push(VpuExtent {
                vpu: candidate.vpu.clone(),
                offset,
                count: series.n_reach(),
            });
            offset += series.n_reach();
        }
        let attrs = StoreAttrs {
            cycle: self.layout.cycle().ymd(),
            vpus: merged.clone(),
        };
        let store_path = writer.finish(attrs)?;
        info!(path = %store_path.display(), "store complete");

        Ok(AggregationReport {
            store_path,
            merged,
            excluded,
            members,
            n_time: times.len(),
            n_reach,
        })
    }

    /// Checks one requested VPU. The outer error is fatal; the inner one is
    /// a reason to leave the VPU out.
    fn screen(
        &self,
        vpu: &VpuId,
        found: Option<&Found>,
        expected: &[EnsembleMember],
    ) -> Result<std::result::Result<Candidate, String>> {
        let Some(found) = found.filter(|f| f.members.contains(&EnsembleMember::CONTROL)) else {
            return Ok(Err(format!("no control output Qout_{vpu}_52.nc")));
        };
        let control = self.layout.member_output(vpu, EnsembleMember::CONTROL);
        let axes = DischargeFile::read_axes(&control)?;

        let perturbed = if found.merged {
            let path = self.layout.perturbed_output(vpu);
            let n = DischargeFile::read_axes(&path)?.n_members;
            if n != expected.len() {
                return Ok(Err(format!(
                    "Qout_{vpu}.nc holds {n} perturbed members, expected {}",
                    expected.len()
                )));
            }
            PerturbedSource::Merged(path)
        } else {
            let have: Vec<EnsembleMember> = found.members.iter().copied().filter(|m| !m.is_control()).collect();
            if have != expected {
                return Ok(Err(describe_member_gap(&have, expected)));
            }
            PerturbedSource::Members(
                have.into_iter()
                    .map(|m| (m, self.layout.member_output(vpu, m)))
                    .collect(),
            )
        };
        Ok(Ok(Candidate {
            vpu: vpu.clone(),
            control,
            perturbed,
            axes,
        }))
    }
}

/// Reads one VPU as `(perturbed..., control)` and checks it against the axes
/// seen while screening.
fn load_vpu(candidate: &Candidate, expected: &[EnsembleMember]) -> Result<DischargeSeries> {
    let mut parts = match &candidate.perturbed {
        PerturbedSource::Merged(path) => vec![DischargeFile::read(path)?.into_series(expected.to_vec())?],
        PerturbedSource::Members(files) => files
            .iter()
            .map(|(m, path)| DischargeFile::read(path)?.into_series(vec![*m]))
            .collect::<Result<Vec<_>>>()?,
    };
    parts.push(DischargeFile::read(&candidate.control)?.into_series(vec![EnsembleMember::CONTROL])?);
    let series = DischargeSeries::concat_members(parts)?;

    if series.rivids != candidate.axes.rivids || series.times != candidate.axes.times {
        return Err(PipelineError::StructuralMismatch(format!(
            "outputs of VPU {} changed while the store was being built",
            candidate.vpu
        )));
    }
    Ok(series)
}

fn describe_member_gap(have: &[EnsembleMember], expected: &[EnsembleMember]) -> String {
    let have_set: BTreeSet<_> = have.iter().collect();
    let expected_set: BTreeSet<_> = expected.iter().collect();
    let missing: Vec<String> = expected_set.difference(&have_set).map(|m| m.to_string()).collect();
    let extra: Vec<String> = have_set.difference(&expected_set).map(|m| m.to_string()).collect();
    let mut reason = format!("{}/{} perturbed members present", have.len(), expected.len());
    if !missing.is_empty() {
        reason.push_str(&format!(", missing [{}]", missing.join(", ")));
    }
    if !extra.is_empty() {
        reason.push_str(&format!(", unexpected [{}]", extra.join(", ")));
    }
    reason
}

fn check_disjoint(candidates: &[Candidate]) -> Result<()> {
    let mut owner: HashSet<i64> = HashSet::new();
    for candidate in candidates {
        for &rivid in &candidate.axes.rivids {
            if !owner.insert(rivid) {
                return Err(PipelineError::StructuralMismatch(format!(
                    "reach {rivid} of VPU {} already belongs to another VPU",
                    candidate.vpu
                )));
            }
        }
    }
    Ok(())
}

fn scan_outputs(dir: &Path) -> Result<BTreeMap<VpuId, Found>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingInput(format!("outputs directory {} does not exist", dir.display()))
        } else {
            PipelineError::io(dir)(e)
        }
    })?;
    let mut found: BTreeMap<VpuId, Found> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(PipelineError::io(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(file) = OutputFile::parse_name(&name)? else {
            continue;
        };
        let slot = found.entry(file.vpu().clone()).or_default();
        match file {
            OutputFile::Perturbed { .. } => slot.merged = true,
            OutputFile::Member { member, .. } => {
                slot.members.insert(member);
            }
        }
    }
    Ok(found)
}

/// Perturbed ensemble numbers named by the runoff files in `runoff_dir`.
pub fn expected_members(runoff_dir: &Path) -> Result<Vec<EnsembleMember>> {
    let Ok(entries) = fs::read_dir(runoff_dir) else {
        debug!(dir = %runoff_dir.display(), "no runoff directory, expecting members 1-51");
        return Ok(EnsembleMember::all_perturbed());
    };
    let mut members = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(PipelineError::io(runoff_dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.ends_with(".nc") && name.contains("runoff")) {
            continue;
        }
        let member = runoff_member(&name)?;
        if !member.is_control() {
            members.insert(member);
        }
    }
    if members.is_empty() {
        warn!(dir = %runoff_dir.display(), "no runoff files found, expecting members 1-51");
        return Ok(EnsembleMember::all_perturbed());
    }
    Ok(members.into_iter().collect())
}
