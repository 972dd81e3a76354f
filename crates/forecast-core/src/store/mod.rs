//! The consolidated ensemble store: a Zarr v3 group holding `Qout` over
//! `(time, rivid, ensemble)`, its three coordinate arrays and, in the root
//! attributes, the cycle and the VPU extents on the rivid axis.

mod writer;

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::Group;

pub use writer::{chunk_reaches, partial_path, StoreOptions, StoreWriter};

use crate::error::{PipelineError, Result};
use crate::ids::{EnsembleMember, VpuId};

pub const ARR_QOUT: &str = "Qout";
pub const ARR_TIME: &str = "time";
pub const ARR_RIVID: &str = "rivid";
pub const ARR_ENSEMBLE: &str = "ensemble";
pub const TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

fn zarr_error<E: fmt::Display>(path: &Path) -> impl FnOnce(E) -> PipelineError + '_ {
    move |e| PipelineError::store(path, e.to_string())
}

// ── Attributes ────────────────────────────────────────────────────────────────

/// Root attributes: the cycle and where each VPU's reaches live on the
/// rivid axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAttrs {
    pub cycle: String,
    pub vpus: Vec<VpuExtent>,
}

/// A contiguous run of reaches belonging to one VPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpuExtent {
    pub vpu: VpuId,
    pub offset: usize,
    pub count: usize,
}

impl VpuExtent {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.count
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Read-only view of a finished store.
pub struct ConsolidatedStore {
    path: PathBuf,
    attrs: StoreAttrs,
    qout: Array<FilesystemStore>,
    times: Vec<i64>,
    rivids: Vec<i64>,
    members: Vec<EnsembleMember>,
}

impl fmt::Debug for ConsolidatedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsolidatedStore")
            .field("path", &self.path)
            .field("attrs", &self.attrs)
            .field("times", &self.times.len())
            .field("rivids", &self.rivids.len())
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl ConsolidatedStore {
    /// Opens a store and loads its coordinates and root attributes.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(PipelineError::MissingInput(format!(
                "consolidated store {} does not exist",
                path.display()
            )));
        }
        let store = Arc::new(FilesystemStore::new(path).map_err(zarr_error(path))?);

        let root = Group::open(store.clone(), "/").map_err(zarr_error(path))?;
        let attrs: StoreAttrs = serde_json::from_value(serde_json::Value::Object(root.attributes().clone()))
            .map_err(|e| PipelineError::store(path, format!("root attributes: {e}")))?;

        let coord = |name: &str, data_type: DataType| -> Result<Array<FilesystemStore>> {
            let array = Array::open(store.clone(), &format!("/{name}")).map_err(zarr_error(path))?;
            if array.data_type() != &data_type || array.shape().len() != 1 {
                return Err(PipelineError::store(path, format!("coordinate {name} must be 1-D {data_type:?}")));
            }
            Ok(array)
        };
        let time_array = coord(ARR_TIME, DataType::Int64)?;
        let rivid_array = coord(ARR_RIVID, DataType::Int64)?;
        let ens_array = coord(ARR_ENSEMBLE, DataType::Int32)?;
        let times = time_array
            .retrieve_array_subset_elements::<i64>(&time_array.subset_all())
            .map_err(zarr_error(path))?;
        let rivids = rivid_array
            .retrieve_array_subset_elements::<i64>(&rivid_array.subset_all())
            .map_err(zarr_error(path))?;
        let members = ens_array
            .retrieve_array_subset_elements::<i32>(&ens_array.subset_all())
            .map_err(zarr_error(path))?
            .into_iter()
            .map(|m| {
                u32::try_from(m)
                    .map_err(|_| PipelineError::store(path, format!("negative ensemble number {m}")))
                    .and_then(EnsembleMember::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let qout = Array::open(store, &format!("/{ARR_QOUT}")).map_err(zarr_error(path))?;
        let store = Self {
            path: path.to_path_buf(),
            attrs,
            qout,
            times,
            rivids,
            members,
        };
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        let (t, r, e) = (self.times.len(), self.rivids.len(), self.members.len());
        if self.qout.data_type() != &DataType::Float32 {
            return Err(self.bad(format!("Qout must be float32, found {:?}", self.qout.data_type())));
        }
        if self.qout.shape() != [t as u64, r as u64, e as u64] {
            return Err(self.bad(format!(
                "Qout shape {:?} disagrees with coordinates [{t}, {r}, {e}]",
                self.qout.shape()
            )));
        }
        let mut next = 0;
        for extent in &self.attrs.vpus {
            if extent.offset != next {
                return Err(self.bad(format!("extent of VPU {} is not contiguous", extent.vpu)));
            }
            next += extent.count;
        }
        if next != r {
            return Err(self.bad(format!("VPU extents cover {next} of {r} reaches")));
        }
        Ok(())
    }

    fn bad(&self, reason: String) -> PipelineError {
        PipelineError::store(&self.path, reason)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cycle(&self) -> &str {
        &self.attrs.cycle
    }

    /// Seconds since 1970-01-01.
    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn rivids(&self) -> &[i64] {
        &self.rivids
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// VPUs in merge order.
    pub fn vpu_extents(&self) -> &[VpuExtent] {
        &self.attrs.vpus
    }

    pub fn extent(&self, vpu: &VpuId) -> Option<&VpuExtent> {
        self.attrs.vpus.iter().find(|e| &e.vpu == vpu)
    }

    /// Discharge of reaches `range` as `[time, reach, ensemble]` C order,
    /// decoding only the chunks that cover the range.
    pub fn read_reaches(&self, range: Range<usize>) -> Result<Vec<f32>> {
        if range.end > self.rivids.len() || range.start > range.end {
            return Err(self.bad(format!(
                "reach range {range:?} outside 0..{}",
                self.rivids.len()
            )));
        }
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let subset = ArraySubset::new_with_ranges(&[
            0..self.times.len() as u64,
            range.start as u64..range.end as u64,
            0..self.members.len() as u64,
        ]);
        self.qout
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(zarr_error(&self.path))
    }
}
