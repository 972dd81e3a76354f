//! Ensemble-mean discharge of one VPU, read from the consolidated store.

use chrono::{DateTime, NaiveDateTime};

use crate::error::{PipelineError, Result};
use crate::ids::VpuId;
use crate::store::ConsolidatedStore;

/// Mean discharge over the ensemble axis, time-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanSeries {
    pub vpu: VpuId,
    pub times: Vec<NaiveDateTime>,
    pub rivids: Vec<i64>,
    /// `values[t * n_reach + r]`; NaN where every member is NaN.
    pub values: Vec<f64>,
}

impl MeanSeries {
    pub fn n_time(&self) -> usize {
        self.times.len()
    }

    pub fn n_reach(&self) -> usize {
        self.rivids.len()
    }

    /// Means of every reach at timestep `t`.
    pub fn row(&self, t: usize) -> &[f64] {
        let n = self.n_reach();
        &self.values[t * n..(t + 1) * n]
    }

    pub fn time_index(&self, at: NaiveDateTime) -> Option<usize> {
        self.times.iter().position(|&t| t == at)
    }
}

pub struct EnsembleMean<'a> {
    store: &'a ConsolidatedStore,
}

impl<'a> EnsembleMean<'a> {
    pub fn new(store: &'a ConsolidatedStore) -> Self {
        Self { store }
    }

    /// Averages the VPU's reaches over all members, in f64, skipping NaN.
    pub fn for_vpu(&self, vpu: &VpuId) -> Result<MeanSeries> {
        let extent = self.store.extent(vpu).ok_or_else(|| {
            PipelineError::MissingInput(format!("VPU {vpu} is not in store {}", self.store.path().display()))
        })?;
        let range = extent.range();
        let block = self.store.read_reaches(range.clone())?;
        let n_e = self.store.members().len();

        let values = block
            .chunks_exact(n_e.max(1))
            .map(|members| {
                let (sum, count) = members
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
                if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            })
            .collect();

        let times = self
            .store
            .times()
            .iter()
            .map(|&secs| {
                DateTime::from_timestamp(secs, 0)
                    .map(|dt| dt.naive_utc())
                    .ok_or_else(|| PipelineError::store(self.store.path(), format!("time {secs} out of range")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MeanSeries {
            vpu: vpu.clone(),
            times,
            rivids: self.store.rivids()[range].to_vec(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discharge::DischargeSeries;
    use crate::ids::EnsembleMember;
    use crate::store::{StoreAttrs, StoreOptions, StoreWriter, VpuExtent};
    use approx::assert_relative_eq;

    fn store_with(values_by_member: [[f32; 2]; 3]) -> (tempfile::TempDir, ConsolidatedStore) {
        let dir = tempfile::tempdir().unwrap();
        let members = vec![
            EnsembleMember::new(1).unwrap(),
            EnsembleMember::new(2).unwrap(),
            EnsembleMember::CONTROL,
        ];
        let opts = StoreOptions {
            chunk_target_bytes: 1,
            zstd_level: 3,
        };
        let path = dir.path().join("s.zarr");
        let mut w = StoreWriter::create(&path, vec![0], members.clone(), 3, opts).unwrap();
        // one reach in VPU 1, two in VPU 2; member values only vary for reach 0 of VPU 2
        w.push_series(&DischargeSeries {
            times: vec![0],
            rivids: vec![100],
            members: members.clone(),
            values: vec![1.0, 1.0, 1.0],
        })
        .unwrap();
        let mut values = Vec::new();
        for m in values_by_member {
            values.extend(m);
        }
        w.push_series(&DischargeSeries {
            times: vec![0],
            rivids: vec![200, 201],
            members,
            values,
        })
        .unwrap();
        w.finish(StoreAttrs {
            cycle: "20240101".into(),
            vpus: vec![
                VpuExtent { vpu: VpuId::from(1), offset: 0, count: 1 },
                VpuExtent { vpu: VpuId::from(2), offset: 1, count: 2 },
            ],
        })
        .unwrap();
        let store = ConsolidatedStore::open(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn mean_skips_nan_members() {
        let (_dir, store) = store_with([[1.0, f32::NAN], [2.0, f32::NAN], [6.0, f32::NAN]]);
        let mean = EnsembleMean::new(&store).for_vpu(&VpuId::from(2)).unwrap();
        assert_eq!(mean.rivids, vec![200, 201]);
        assert_eq!(mean.n_time(), 1);
        assert_relative_eq!(mean.row(0)[0], 3.0);
        assert!(mean.row(0)[1].is_nan());
        assert_eq!(mean.times[0], DateTime::from_timestamp(0, 0).unwrap().naive_utc());
    }

    #[test]
    fn mean_accumulates_in_f64() {
        let (_dir, store) = store_with([[0.1, 0.0], [0.2, 0.0], [0.3, -3.0]]);
        let mean = EnsembleMean::new(&store).for_vpu(&VpuId::from(2)).unwrap();
        let expected = (0.1f32 as f64 + 0.2f32 as f64 + 0.3f32 as f64) / 3.0;
        assert_relative_eq!(mean.row(0)[0], expected, epsilon = 1e-12);
        assert_relative_eq!(mean.row(0)[1], -1.0);
    }

    #[test]
    fn unknown_vpu_is_missing_input() {
        let (_dir, store) = store_with([[0.0; 2]; 3]);
        let err = EnsembleMean::new(&store).for_vpu(&VpuId::from(3)).unwrap_err();
        assert!(err.is_missing_input());
    }
}
