//! Streaming construction of a consolidated store.
//!
//! Reaches are appended VPU by VPU into a single chunk buffer of shape
//! `[time, chunk, ensemble]`; each full buffer is handed to the `Qout` array
//! as one chunk, so memory holds one VPU's series plus one chunk. The store
//! is built under `{name}.partial` and renamed into place by
//! [`StoreWriter::finish`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use zarrs::array::codec::ZstdCodec;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue, ZARR_NAN_F32};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;

use super::{zarr_error, StoreAttrs, ARR_ENSEMBLE, ARR_QOUT, ARR_RIVID, ARR_TIME, TIME_UNITS};
use crate::discharge::DischargeSeries;
use crate::error::{PipelineError, Result};
use crate::ids::EnsembleMember;

/// Reaches per chunk: `target_bytes / (n_time * n_ensemble * 4)`, at least
/// one and at most `n_reach`.
pub fn chunk_reaches(target_bytes: usize, n_time: usize, n_ensemble: usize, n_reach: usize) -> usize {
    let per_reach = (n_time * n_ensemble * 4).max(1);
    (target_bytes / per_reach).max(1).min(n_reach.max(1))
}

/// Encoding parameters for the discharge array.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub chunk_target_bytes: usize,
    pub zstd_level: i32,
}

pub struct StoreWriter {
    final_path: PathBuf,
    partial_path: PathBuf,
    store: Arc<FilesystemStore>,
    qout: Array<FilesystemStore>,
    times: Vec<i64>,
    members: Vec<EnsembleMember>,
    rivids: Vec<i64>,
    n_reach: usize,
    chunk_len: usize,
    buffer: Vec<f32>,
    filled: usize,
    next_chunk: u64,
}

impl StoreWriter {
    /// Removes any previous store (complete or partial) at `final_path` and
    /// starts a new one for `n_reach` reaches.
    pub fn create(
        final_path: &Path,
        times: Vec<i64>,
        members: Vec<EnsembleMember>,
        n_reach: usize,
        options: StoreOptions,
    ) -> Result<Self> {
        let partial_path = partial_path(final_path);
        for stale in [final_path, partial_path.as_path()] {
            if stale.exists() {
                debug!(path = %stale.display(), "removing previous store");
                fs::remove_dir_all(stale).map_err(PipelineError::io(stale))?;
            }
        }
        fs::create_dir_all(&partial_path).map_err(PipelineError::io(&partial_path))?;
        let store = Arc::new(FilesystemStore::new(&partial_path).map_err(zarr_error(&partial_path))?);

        let (n_time, n_ens) = (times.len(), members.len());
        let chunk_len = chunk_reaches(options.chunk_target_bytes, n_time, n_ens, n_reach);
        let qout = ArrayBuilder::new(
            vec![n_time as u64, n_reach as u64, n_ens as u64],
            DataType::Float32,
            vec![n_time.max(1) as u64, chunk_len as u64, n_ens.max(1) as u64]
                .try_into()
                .map_err(zarr_error(&partial_path))?,
            FillValue::from(ZARR_NAN_F32),
        )
        .bytes_to_bytes_codecs(vec![Arc::new(ZstdCodec::new(options.zstd_level, false))])
        .dimension_names([ARR_TIME, ARR_RIVID, ARR_ENSEMBLE].into())
        .attributes(described("Discharge", "m3 s-1"))
        .build(store.clone(), &format!("/{ARR_QOUT}"))
        .map_err(zarr_error(&partial_path))?;

        Ok(Self {
            final_path: final_path.to_path_buf(),
            partial_path,
            store,
            qout,
            buffer: vec![f32::NAN; n_time * chunk_len * n_ens],
            times,
            members,
            rivids: Vec::with_capacity(n_reach),
            n_reach,
            chunk_len,
            filled: 0,
            next_chunk: 0,
        })
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Appends every reach of `series`. Its time axis and ensemble order must
    /// match the store's.
    pub fn push_series(&mut self, series: &DischargeSeries) -> Result<()> {
        if series.times != self.times {
            return Err(PipelineError::StructuralMismatch(
                "time axis differs from the first merged VPU".into(),
            ));
        }
        if series.members != self.members {
            return Err(PipelineError::StructuralMismatch(format!(
                "ensemble axis {:?} differs from the store's {:?}",
                series.members, self.members
            )));
        }
        if self.rivids.len() + series.n_reach() > self.n_reach {
            return Err(PipelineError::StructuralMismatch(format!(
                "more reaches than the {} the store was sized for",
                self.n_reach
            )));
        }
        let (n_time, n_ens, c) = (self.times.len(), self.members.len(), self.chunk_len);
        for (r, &rivid) in series.rivids.iter().enumerate() {
            for t in 0..n_time {
                let row = (t * c + self.filled) * n_ens;
                for e in 0..n_ens {
                    self.buffer[row + e] = series.value(e, t, r);
                }
            }
            self.rivids.push(rivid);
            self.filled += 1;
            if self.filled == c {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.filled == 0 {
            return Ok(());
        }
        self.qout
            .store_chunk_elements::<f32>(&[0, self.next_chunk, 0], &self.buffer)
            .map_err(zarr_error(&self.partial_path))?;
        self.buffer.fill(f32::NAN);
        self.filled = 0;
        self.next_chunk += 1;
        Ok(())
    }

    /// Flushes the last (NaN-padded) chunk, writes coordinates and metadata,
    /// and moves the store into place.
    pub fn finish(mut self, attrs: StoreAttrs) -> Result<PathBuf> {
        self.flush()?;
        if self.rivids.len() != self.n_reach {
            return Err(PipelineError::StructuralMismatch(format!(
                "store sized for {} reaches but {} were written",
                self.n_reach,
                self.rivids.len()
            )));
        }
        self.qout.store_metadata().map_err(zarr_error(&self.partial_path))?;

        let ensemble: Vec<i32> = self.members.iter().map(|m| m.number() as i32).collect();
        self.write_coord(ARR_TIME, DataType::Int64, FillValue::from(0i64), &self.times, described("time", TIME_UNITS))?;
        self.write_coord(ARR_RIVID, DataType::Int64, FillValue::from(0i64), &self.rivids, serde_json::Map::new())?;
        self.write_coord(ARR_ENSEMBLE, DataType::Int32, FillValue::from(0i32), &ensemble, serde_json::Map::new())?;

        let root_attrs = match serde_json::to_value(&attrs)? {
            serde_json::Value::Object(map) => map,
            other => return Err(PipelineError::store(&self.partial_path, format!("root attributes {other}"))),
        };
        GroupBuilder::new()
            .attributes(root_attrs)
            .build(self.store.clone(), "/")
            .map_err(zarr_error(&self.partial_path))?
            .store_metadata()
            .map_err(zarr_error(&self.partial_path))?;

        fs::rename(&self.partial_path, &self.final_path).map_err(PipelineError::io(&self.final_path))?;
        Ok(self.final_path)
    }

    /// Writes a 1-D coordinate as a single uncompressed chunk.
    fn write_coord<T: zarrs::array::Element>(
        &self,
        name: &str,
        data_type: DataType,
        fill: FillValue,
        values: &[T],
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let array = ArrayBuilder::new(
            vec![values.len() as u64],
            data_type,
            vec![values.len().max(1) as u64].try_into().map_err(zarr_error(&self.partial_path))?,
            fill,
        )
        .dimension_names([name].into())
        .attributes(attributes)
        .build(self.store.clone(), &format!("/{name}"))
        .map_err(zarr_error(&self.partial_path))?;
        array.store_metadata().map_err(zarr_error(&self.partial_path))?;
        if !values.is_empty() {
            array.store_chunk_elements(&[0], values).map_err(zarr_error(&self.partial_path))?;
        }
        Ok(())
    }
}

fn described(long_name: &str, units: &str) -> serde_json::Map<String, serde_json::Value> {
    match json!({ "long_name": long_name, "units": units }) {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_length_rule() {
        // 5 MB over 85 steps x 52 members x 4 bytes
        assert_eq!(chunk_reaches(5_000_000, 85, 52, 1_000_000), 282);
        assert_eq!(chunk_reaches(5_000_000, 85, 52, 100), 100);
        assert_eq!(chunk_reaches(1, 85, 52, 100), 1);
    }

    #[test]
    fn partial_name() {
        assert_eq!(
            partial_path(Path::new("/out/20240101.zarr")),
            PathBuf::from("/out/20240101.zarr.partial")
        );
    }

    #[test]
    fn described_attributes() {
        let attrs = described("time", TIME_UNITS);
        assert_eq!(attrs["long_name"], "time");
        assert_eq!(attrs["units"], TIME_UNITS);
    }
}
