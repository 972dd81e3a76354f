//! Forecast cycle identity and its directory namespace.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{PipelineError, Result};
use crate::ids::{EnsembleMember, OutputFile, VpuId};

/// One forecast run, identified by its reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForecastCycle {
    date: NaiveDate,
}

impl ForecastCycle {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }

    /// Parses a `YYYYMMDD` cycle date.
    pub fn parse(ymd: &str) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidId {
            kind: "cycle date",
            value: ymd.to_string(),
            reason: reason.to_string(),
        };
        if ymd.len() != 8 || !ymd.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("expected YYYYMMDD"));
        }
        let date = NaiveDate::parse_from_str(ymd, "%Y%m%d").map_err(|_| invalid("not a calendar date"))?;
        Ok(Self { date })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn ymd(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Midnight of the reference day.
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(chrono::NaiveTime::MIN)
    }

    /// The instant whose discharge initialises the next cycle.
    pub fn next_init_time(&self) -> NaiveDateTime {
        self.start() + Duration::hours(24)
    }
}

impl fmt::Display for ForecastCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ymd())
    }
}

/// Paths of one cycle under the forecasts directory.
#[derive(Debug, Clone)]
pub struct CycleLayout {
    cycle: ForecastCycle,
    root: PathBuf,
}

impl CycleLayout {
    pub fn new(forecasts_dir: &Path, cycle: ForecastCycle) -> Self {
        Self {
            root: forecasts_dir.join(cycle.ymd()),
            cycle,
        }
    }

    pub fn cycle(&self) -> ForecastCycle {
        self.cycle
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    pub fn maptables_dir(&self) -> PathBuf {
        self.root.join("maptables")
    }

    pub fn namelists_dir(&self) -> PathBuf {
        self.root.join("namelists")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn store_path(&self) -> PathBuf {
        self.outputs_dir().join(format!("{}.zarr", self.cycle.ymd()))
    }

    pub fn perturbed_output(&self, vpu: &VpuId) -> PathBuf {
        self.output(&OutputFile::Perturbed { vpu: vpu.clone() })
    }

    pub fn member_output(&self, vpu: &VpuId, member: EnsembleMember) -> PathBuf {
        self.output(&OutputFile::Member {
            vpu: vpu.clone(),
            member,
        })
    }

    pub fn output(&self, file: &OutputFile) -> PathBuf {
        self.outputs_dir().join(file.file_name())
    }

    pub fn map_table(&self, vpu: &VpuId) -> PathBuf {
        self.maptables_dir()
            .join(format!("map_{vpu}_{}.parquet", self.cycle.ymd()))
    }

    /// Global per-timestamp table, e.g. `mapstyletable_2024-01-01-03.csv`.
    pub fn global_table(&self, timestamp: NaiveDateTime) -> PathBuf {
        self.maptables_dir()
            .join(format!("mapstyletable_{}.csv", timestamp.format("%Y-%m-%d-%H")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ymd() {
        let c = ForecastCycle::parse("20240101").unwrap();
        assert_eq!(c.ymd(), "20240101");
        assert_eq!(c.next_init_time().format("%Y%m%d%H").to_string(), "2024010200");
    }

    #[test]
    fn rejects_bad_dates() {
        assert!(ForecastCycle::parse("2024011").is_err());
        assert!(ForecastCycle::parse("20241301").is_err());
        assert!(ForecastCycle::parse("2024-1-1").is_err());
    }

    #[test]
    fn layout_paths() {
        let c = ForecastCycle::parse("20240101").unwrap();
        let l = CycleLayout::new(Path::new("/fc"), c);
        assert_eq!(l.store_path(), PathBuf::from("/fc/20240101/outputs/20240101.zarr"));
        assert_eq!(
            l.member_output(&VpuId::from(101), EnsembleMember::CONTROL),
            PathBuf::from("/fc/20240101/outputs/Qout_101_52.nc")
        );
        assert_eq!(
            l.map_table(&VpuId::from(101)),
            PathBuf::from("/fc/20240101/maptables/map_101_20240101.parquet")
        );
        assert_eq!(
            l.global_table(c.start() + Duration::hours(3)),
            PathBuf::from("/fc/20240101/maptables/mapstyletable_2024-01-01-03.csv")
        );
    }
}
