//! Initial-condition handoff: the ensemble-mean state at the start of the
//! next cycle, as a classic netCDF file the routing model reads as `Qinit`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime, Utc};
use netcdf3::{DataSet, InvalidDataSet};
use tracing::{info, warn};

use crate::config::Paths;
use crate::cycle::ForecastCycle;
use crate::error::{PipelineError, Result};
use crate::ids::VpuId;
use crate::mean::{EnsembleMean, MeanSeries};
use crate::netcdf::write_classic;
use crate::store::ConsolidatedStore;

pub struct InitialConditionExtractor {
    paths: Paths,
    cycle: ForecastCycle,
}

impl InitialConditionExtractor {
    pub fn new(paths: &Paths, cycle: ForecastCycle) -> Self {
        Self {
            paths: paths.clone(),
            cycle,
        }
    }

    /// Output path for `vpu`, dated the day after the cycle.
    pub fn init_path(&self, vpu: &VpuId) -> PathBuf {
        self.paths.init_file(vpu, self.cycle.date() + Duration::days(1))
    }

    /// Reads the VPU's mean series from `store` and writes its initial state.
    pub fn extract_vpu(&self, store: &ConsolidatedStore, vpu: &VpuId) -> Result<PathBuf> {
        let mean = EnsembleMean::new(store).for_vpu(vpu)?;
        self.extract(&mean)
    }

    pub fn extract(&self, mean: &MeanSeries) -> Result<PathBuf> {
        let state = build_initial_state(mean, self.cycle)?;
        let path = self.init_path(&mean.vpu);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(PipelineError::io(dir))?;
        }
        state.write(&path)?;
        info!(vpu = %mean.vpu, reaches = mean.n_reach(), path = %path.display(), "initial conditions written");
        Ok(path)
    }
}

/// Lays out the `Qinit` file for `mean` at the next cycle's start. Reaches
/// whose mean is NaN start from 0.
pub fn build_initial_state(mean: &MeanSeries, cycle: ForecastCycle) -> Result<InitialState> {
    let at = cycle.next_init_time();
    let t = mean.time_index(at).ok_or(PipelineError::MissingTimestep(at))?;

    let mut missing = 0usize;
    let qout: Vec<f64> = mean
        .row(t)
        .iter()
        .map(|&q| {
            if q.is_nan() {
                missing += 1;
                0.0
            } else {
                q
            }
        })
        .collect();
    if missing > 0 {
        warn!(vpu = %mean.vpu, missing, "reaches without a mean discharge start from 0");
    }
    let rivids = mean
        .rivids
        .iter()
        .map(|&r| {
            i32::try_from(r).map_err(|_| {
                PipelineError::StructuralMismatch(format!("reach id {r} does not fit a 32-bit integer"))
            })
        })
        .collect::<Result<Vec<i32>>>()?;
    let definition = qinit_definition(rivids.len(), at)
        .map_err(|e| PipelineError::StructuralMismatch(format!("Qinit layout rejected: {e:?}")))?;
    Ok(InitialState {
        definition,
        qout,
        rivids,
    })
}

fn qinit_definition(n: usize, at: NaiveDateTime) -> std::result::Result<DataSet, InvalidDataSet> {
    let mut ds = DataSet::new();
    ds.add_fixed_dim("time", 1)?;
    ds.add_fixed_dim("rivid", n)?;

    ds.add_var_f64("Qout", &["time", "rivid"])?;
    for (attr, value) in [
        ("long_name", "instantaneous river water discharge downstream of each river reach"),
        ("units", "m3 s-1"),
        ("coordinates", "lon lat"),
        ("grid_mapping", "crs"),
        ("cell_methods", "time: point"),
    ] {
        ds.add_var_attr_string("Qout", attr, value)?;
    }

    ds.add_var_i32("rivid", &["rivid"])?;
    ds.add_var_attr_string("rivid", "long_name", "unique identifier for each river reach")?;
    ds.add_var_attr_string("rivid", "units", "1")?;
    ds.add_var_attr_string("rivid", "cf_role", "timeseries_id")?;

    ds.add_var_i32("time", &["time"])?;
    ds.add_var_attr_string("time", "long_name", "time")?;
    ds.add_var_attr_string("time", "standard_name", "time")?;
    ds.add_var_attr_string("time", "units", format!("seconds since {}", at.format("%Y-%m-%d")))?;
    ds.add_var_attr_string("time", "axis", "T")?;
    ds.add_var_attr_string("time", "calendar", "gregorian")?;

    for (var, long_name, standard_name, units, axis) in [
        ("lon", "longitude of a point related to each river reach", "longitude", "degrees_east", "X"),
        ("lat", "latitude of a point related to each river reach", "latitude", "degrees_north", "Y"),
    ] {
        ds.add_var_f64(var, &["rivid"])?;
        ds.add_var_attr_string(var, "long_name", long_name)?;
        ds.add_var_attr_string(var, "standard_name", standard_name)?;
        ds.add_var_attr_string(var, "units", units)?;
        ds.add_var_attr_string(var, "axis", axis)?;
    }

    let scalar: [&str; 0] = [];
    ds.add_var_i32("crs", &scalar)?;
    ds.add_var_attr_string("crs", "grid_mapping_name", "latitude_longitude")?;
    ds.add_var_attr_string("crs", "epsg_code", "EPSG:4326")?;
    ds.add_var_attr_f64("crs", "semi_major_axis", vec![6378137.0])?;
    ds.add_var_attr_f64("crs", "inverse_flattening", vec![298.257223563])?;

    ds.add_global_attr_string("Conventions", "CF-1.6")?;
    ds.add_global_attr_string("featureType", "timeSeries")?;
    ds.add_global_attr_string(
        "history",
        format!("date_created: {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ")),
    )?;
    Ok(ds)
}

/// A `Qinit` file ready to be written.
pub struct InitialState {
    definition: DataSet,
    qout: Vec<f64>,
    rivids: Vec<i32>,
}

impl InitialState {
    pub fn write(&self, path: &Path) -> Result<()> {
        let zeros = vec![0.0; self.rivids.len()];
        write_classic(path, &self.definition, |f| {
            f.write_var_f64("Qout", &self.qout)?;
            f.write_var_i32("rivid", &self.rivids)?;
            f.write_var_i32("time", &[0])?;
            f.write_var_f64("lon", &zeros)?;
            f.write_var_f64("lat", &zeros)?;
            f.write_var_i32("crs", &[0])
        })
    }
}
