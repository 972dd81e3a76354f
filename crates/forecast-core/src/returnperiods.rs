//! Per-reach return-period flow thresholds.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::netcdf::NcReader;

/// Return periods in years, ascending; threshold arrays follow this order.
pub const RETURN_PERIODS: [i32; 6] = [2, 5, 10, 25, 50, 100];

const THRESHOLD_VARS: [&str; 6] = ["rp2", "rp5", "rp10", "rp25", "rp50", "rp100"];

#[derive(Debug, Clone, Default)]
pub struct ReturnPeriodTable {
    thresholds: HashMap<i64, [f64; 6]>,
}

impl ReturnPeriodTable {
    /// Reads `rivid` and `rp2`..`rp100` from a reference file.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::MissingInput(format!(
                "return-period table {} does not exist",
                path.display()
            )));
        }
        let mut nc = NcReader::open(path)?;
        let rivids = nc.read_i64("rivid")?;
        let mut columns = Vec::with_capacity(THRESHOLD_VARS.len());
        for name in THRESHOLD_VARS {
            let column = nc.read_f64(name)?;
            if column.len() != rivids.len() {
                return Err(PipelineError::netcdf(
                    path,
                    format!("{name} has {} values for {} reaches", column.len(), rivids.len()),
                ));
            }
            columns.push(column);
        }
        let rows = rivids.iter().enumerate().map(|(i, &rivid)| {
            let mut t = [0.0; 6];
            for (slot, column) in t.iter_mut().zip(&columns) {
                *slot = column[i];
            }
            (rivid, t)
        });
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (i64, [f64; 6])>) -> Self {
        Self {
            thresholds: rows.into_iter().collect(),
        }
    }

    pub fn get(&self, rivid: i64) -> Option<&[f64; 6]> {
        self.thresholds.get(&rivid)
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
