//! Classic netCDF access on top of the `netcdf3` crate, with errors mapped
//! into [`PipelineError`] and numeric variables widened to the type a caller
//! asks for.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use netcdf3::{DataSet, DataVector, FileReader, FileWriter, Version};

use crate::error::{PipelineError, Result};

/// Maps any `netcdf3` error for `path`.
pub fn nc_error<E: Debug>(path: &Path) -> impl FnOnce(E) -> PipelineError + '_ {
    move |e| PipelineError::netcdf(path, format!("{e:?}"))
}

/// A classic or 64-bit offset file opened for reading.
pub struct NcReader {
    path: PathBuf,
    file: FileReader,
}

impl NcReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = FileReader::open(path).map_err(nc_error(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_set(&self) -> &DataSet {
        self.file.data_set()
    }

    /// Dimension names of `var`, outermost first.
    pub fn dim_names(&self, var: &str) -> Result<Vec<String>> {
        self.data_set()
            .get_var(var)
            .map(|v| v.dim_names())
            .ok_or_else(|| PipelineError::netcdf(&self.path, format!("no variable {var:?}")))
    }

    pub fn shape(&self, var: &str) -> Result<Vec<usize>> {
        let ds = self.data_set();
        self.dim_names(var)?
            .iter()
            .map(|d| {
                ds.dim_size(d)
                    .ok_or_else(|| PipelineError::netcdf(&self.path, format!("no dimension {d:?}")))
            })
            .collect()
    }

    pub fn read(&mut self, var: &str) -> Result<DataVector> {
        self.file.read_var(var).map_err(nc_error(&self.path))
    }

    pub fn read_f64(&mut self, var: &str) -> Result<Vec<f64>> {
        Ok(match self.read(var)? {
            DataVector::I8(v) => v.into_iter().map(f64::from).collect(),
            DataVector::U8(v) => v.into_iter().map(f64::from).collect(),
            DataVector::I16(v) => v.into_iter().map(f64::from).collect(),
            DataVector::I32(v) => v.into_iter().map(f64::from).collect(),
            DataVector::F32(v) => v.into_iter().map(f64::from).collect(),
            DataVector::F64(v) => v,
        })
    }

    pub fn read_f32(&mut self, var: &str) -> Result<Vec<f32>> {
        Ok(match self.read(var)? {
            DataVector::F32(v) => v,
            DataVector::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            DataVector::I8(v) => v.into_iter().map(f32::from).collect(),
            DataVector::U8(v) => v.into_iter().map(f32::from).collect(),
            DataVector::I16(v) => v.into_iter().map(f32::from).collect(),
            DataVector::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        })
    }

    /// Integer variables only; identifiers stored as floats are rejected.
    pub fn read_i64(&mut self, var: &str) -> Result<Vec<i64>> {
        match self.read(var)? {
            DataVector::I8(v) => Ok(v.into_iter().map(i64::from).collect()),
            DataVector::U8(v) => Ok(v.into_iter().map(i64::from).collect()),
            DataVector::I16(v) => Ok(v.into_iter().map(i64::from).collect()),
            DataVector::I32(v) => Ok(v.into_iter().map(i64::from).collect()),
            _ => Err(PipelineError::netcdf(&self.path, format!("{var} is not an integer variable"))),
        }
    }

    pub fn var_text_attr(&self, var: &str, attr: &str) -> Option<String> {
        self.data_set().get_var_attr(var, attr)?.get_as_string()
    }

    pub fn global_text_attr(&self, attr: &str) -> Option<String> {
        self.data_set().get_global_attr(attr)?.get_as_string()
    }
}

/// Writes `ds` as a classic file, then fills its variables through `fill`.
pub fn write_classic<F>(path: &Path, ds: &DataSet, fill: F) -> Result<()>
where
    F: FnOnce(&mut FileWriter) -> std::result::Result<(), netcdf3::WriteError>,
{
    let mut file = FileWriter::open(path).map_err(nc_error(path))?;
    file.set_def(ds, Version::Classic, 0).map_err(nc_error(path))?;
    fill(&mut file).map_err(nc_error(path))?;
    file.close().map_err(nc_error(path))
}

