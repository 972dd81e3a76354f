//! Routed-discharge outputs: reading `Qout` files into a canonical layout.
//!
//! Routing writes `Qout(time, rivid)` per member; the merged perturbed file
//! carries an extra `ensemble` axis whose position varies between producers.
//! Everything here is normalised to `(member, time, reach)` C order.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{PipelineError, Result};
use crate::ids::EnsembleMember;
use crate::netcdf::NcReader;

pub const VAR_QOUT: &str = "Qout";
pub const VAR_TIME: &str = "time";
pub const VAR_RIVID: &str = "rivid";
pub const DIM_ENSEMBLE: &str = "ensemble";

/// The contents of one `Qout` file, before ensemble numbers are assigned.
#[derive(Debug, Clone)]
pub struct DischargeFile {
    /// Seconds since 1970-01-01.
    pub times: Vec<i64>,
    pub rivids: Vec<i64>,
    /// Length of the ensemble axis; 1 for single-member files.
    pub n_members: usize,
    /// `(member, time, reach)` C order.
    pub values: Vec<f32>,
}

impl DischargeFile {
    pub fn read(path: &Path) -> Result<Self> {
        let mut nc = NcReader::open(path)?;
        let rivids = nc.read_i64(VAR_RIVID)?;
        let times = read_epoch_seconds(&mut nc)?;

        let dims = nc.dim_names(VAR_QOUT)?;
        let shape = nc.shape(VAR_QOUT)?;
        let axis = |name: &str| dims.iter().position(|d| d == name);
        let (Some(t_axis), Some(r_axis)) = (axis(VAR_TIME), axis(VAR_RIVID)) else {
            return Err(PipelineError::netcdf(path, format!("Qout dimensions {dims:?} lack time or rivid")));
        };
        let e_axis = axis(DIM_ENSEMBLE);
        let expected_rank = 2 + usize::from(e_axis.is_some());
        if dims.len() != expected_rank {
            return Err(PipelineError::netcdf(path, format!("unexpected Qout dimensions {dims:?}")));
        }
        if shape[t_axis] != times.len() || shape[r_axis] != rivids.len() {
            return Err(PipelineError::netcdf(
                path,
                format!(
                    "Qout shape {shape:?} disagrees with time({}) and rivid({})",
                    times.len(),
                    rivids.len()
                ),
            ));
        }

        let raw = nc.read_f32(VAR_QOUT)?;
        let values = to_member_time_reach(&raw, &shape, e_axis, t_axis, r_axis);
        Ok(Self {
            n_members: e_axis.map_or(1, |e| shape[e]),
            times,
            rivids,
            values,
        })
    }

    /// Reads only the `(time, rivid)` coordinates and the ensemble axis
    /// length, without touching `Qout` data.
    pub fn read_axes(path: &Path) -> Result<FileAxes> {
        let mut nc = NcReader::open(path)?;
        let rivids = nc.read_i64(VAR_RIVID)?;
        let times = read_epoch_seconds(&mut nc)?;
        let dims = nc.dim_names(VAR_QOUT)?;
        let shape = nc.shape(VAR_QOUT)?;
        let n_members = dims
            .iter()
            .position(|d| d == DIM_ENSEMBLE)
            .map_or(1, |e| shape[e]);
        Ok(FileAxes {
            times,
            rivids,
            n_members,
        })
    }

    /// Attaches ensemble numbers, one per position on the ensemble axis.
    pub fn into_series(self, members: Vec<EnsembleMember>) -> Result<DischargeSeries> {
        if members.len() != self.n_members {
            return Err(PipelineError::StructuralMismatch(format!(
                "{} ensemble members assigned to a file with {} on its ensemble axis",
                members.len(),
                self.n_members
            )));
        }
        Ok(DischargeSeries {
            times: self.times,
            rivids: self.rivids,
            members,
            values: self.values,
        })
    }
}

/// Coordinates of a `Qout` file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAxes {
    pub times: Vec<i64>,
    pub rivids: Vec<i64>,
    pub n_members: usize,
}

/// Discharge of one VPU over (member, time, reach).
#[derive(Debug, Clone)]
pub struct DischargeSeries {
    pub times: Vec<i64>,
    pub rivids: Vec<i64>,
    pub members: Vec<EnsembleMember>,
    /// `(member, time, reach)` C order.
    pub values: Vec<f32>,
}

impl DischargeSeries {
    pub fn n_time(&self) -> usize {
        self.times.len()
    }

    pub fn n_reach(&self) -> usize {
        self.rivids.len()
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn value(&self, member: usize, time: usize, reach: usize) -> f32 {
        self.values[(member * self.n_time() + time) * self.n_reach() + reach]
    }

    /// Concatenates along the ensemble axis. Every part must share the time
    /// axis and the reach set in the same order.
    pub fn concat_members(parts: Vec<DischargeSeries>) -> Result<DischargeSeries> {
        let mut parts = parts.into_iter();
        let Some(mut merged) = parts.next() else {
            return Err(PipelineError::MissingInput("no discharge to concatenate".into()));
        };
        for part in parts {
            if part.times != merged.times {
                return Err(PipelineError::StructuralMismatch(format!(
                    "time axis of member {} differs from member {}",
                    describe(&part.members),
                    describe(&merged.members)
                )));
            }
            if part.rivids != merged.rivids {
                return Err(PipelineError::StructuralMismatch(format!(
                    "reach set or order of member {} differs from member {}",
                    describe(&part.members),
                    describe(&merged.members)
                )));
            }
            merged.members.extend(part.members);
            merged.values.extend(part.values);
        }
        Ok(merged)
    }
}

fn describe(members: &[EnsembleMember]) -> String {
    match members {
        [one] => one.to_string(),
        [first, .., last] => format!("{first}..{last}"),
        [] => "(none)".to_string(),
    }
}

/// Reorders a 2- or 3-axis array to `(member, time, reach)`.
fn to_member_time_reach(raw: &[f32], shape: &[usize], e_axis: Option<usize>, t_axis: usize, r_axis: usize) -> Vec<f32> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    let (n_e, s_e) = e_axis.map_or((1, 0), |e| (shape[e], strides[e]));
    let (n_t, s_t) = (shape[t_axis], strides[t_axis]);
    let (n_r, s_r) = (shape[r_axis], strides[r_axis]);

    let mut out = Vec::with_capacity(n_e * n_t * n_r);
    for e in 0..n_e {
        for t in 0..n_t {
            let base = e * s_e + t * s_t;
            out.extend((0..n_r).map(|r| raw[base + r * s_r]));
        }
    }
    out
}

// ── Time axis ─────────────────────────────────────────────────────────────────

fn read_epoch_seconds(nc: &mut NcReader) -> Result<Vec<i64>> {
    let units = nc
        .var_text_attr(VAR_TIME, "units")
        .ok_or_else(|| PipelineError::netcdf(nc.path(), "time variable has no units"))?;
    let (scale, origin) =
        parse_time_units(&units).ok_or_else(|| PipelineError::netcdf(nc.path(), format!("unsupported time units {units:?}")))?;
    let raw = nc.read_f64(VAR_TIME)?;
    Ok(raw
        .into_iter()
        .map(|v| origin + (v * scale as f64).round() as i64)
        .collect())
}

/// Parses CF units such as `seconds since 1970-01-01 00:00:00` into
/// (seconds per unit, origin as epoch seconds).
pub fn parse_time_units(units: &str) -> Option<(i64, i64)> {
    let (unit, origin) = units.trim().split_once(" since ")?;
    let scale = match unit.trim() {
        "seconds" | "second" | "s" => 1,
        "minutes" | "minute" => 60,
        "hours" | "hour" | "h" => 3600,
        "days" | "day" | "d" => 86_400,
        _ => return None,
    };
    let origin = origin.trim().trim_end_matches(" UTC").trim_end_matches('Z');
    let parsed = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(origin, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(origin, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })?;
    Some((scale, parsed.and_utc().timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::write_qout;

    #[test]
    fn time_units() {
        assert_eq!(parse_time_units("seconds since 1970-01-01 00:00:00"), Some((1, 0)));
        assert_eq!(parse_time_units("hours since 1970-01-02"), Some((3600, 86_400)));
        assert_eq!(parse_time_units("fortnights since 1970-01-01"), None);
        assert_eq!(parse_time_units("seconds"), None);
    }

    #[test]
    fn single_member_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Qout_101_52.nc");
        write_qout(&path, &["time", "rivid"], &[2, 3], vec![1., 2., 3., 4., 5., 6.], &[7, 8, 9], &[0, 3]);
        let file = DischargeFile::read(&path).unwrap();
        assert_eq!(file.n_members, 1);
        assert_eq!(file.rivids, vec![7, 8, 9]);
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        assert_eq!(file.times, vec![t0, t0 + 3 * 3600]);
        assert_eq!(file.values, vec![1., 2., 3., 4., 5., 6.]);
    }

    #[test]
    fn ensemble_axis_in_any_position() {
        let dir = tempfile::tempdir().unwrap();
        // (time=2, rivid=2, ensemble=3), value = 100*t + 10*r + e
        let mut values = Vec::new();
        for t in 0..2 {
            for r in 0..2 {
                for e in 0..3 {
                    values.push((100 * t + 10 * r + e) as f32);
                }
            }
        }
        let path = dir.path().join("Qout_101.nc");
        write_qout(&path, &["time", "rivid", "ensemble"], &[2, 2, 3], values, &[1, 2], &[0, 1]);
        let file = DischargeFile::read(&path).unwrap();
        assert_eq!(file.n_members, 3);
        let members = ["1", "2", "3"].iter().map(|m| EnsembleMember::parse(m).unwrap()).collect();
        let series = file.into_series(members).unwrap();
        assert_eq!(series.value(2, 1, 0), 102.0);
        assert_eq!(series.value(0, 0, 1), 10.0);
        assert_eq!(series.value(1, 1, 1), 111.0);
    }

    #[test]
    fn member_count_must_match_axis() {
        let file = DischargeFile {
            times: vec![0],
            rivids: vec![1],
            n_members: 2,
            values: vec![0.0, 0.0],
        };
        assert!(file.into_series(vec![EnsembleMember::CONTROL]).is_err());
    }

    #[test]
    fn concat_rejects_reordered_reaches() {
        let a = DischargeSeries {
            times: vec![0],
            rivids: vec![1, 2],
            members: vec![EnsembleMember::new(1).unwrap()],
            values: vec![0.0, 0.0],
        };
        let mut b = a.clone();
        b.members = vec![EnsembleMember::CONTROL];
        b.rivids = vec![2, 1];
        let err = DischargeSeries::concat_members(vec![a.clone(), b]).unwrap_err();
        assert!(matches!(err, PipelineError::StructuralMismatch(_)));

        let mut c = a.clone();
        c.members = vec![EnsembleMember::CONTROL];
        let merged = DischargeSeries::concat_members(vec![a, c]).unwrap();
        assert_eq!(merged.n_members(), 2);
        assert_eq!(merged.values.len(), 4);
    }
}
