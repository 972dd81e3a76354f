//! Folding per-VPU classified tables into one CSV per timestamp.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, TimestampSecondArray};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, info};

use crate::cycle::CycleLayout;
use crate::error::{PipelineError, Result};
use crate::ids::{MapTableFile, VpuId};
use crate::maptable::{read_map_table, tmp_path, COL_COMID, COL_MEAN, COL_RET_PER, COL_THICKNESS, COL_TIMESTAMP};

/// One written per-timestamp table.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// VPUs whose tables were merged, in merge order.
    pub vpus: Vec<VpuId>,
    /// Partitions in timestamp order.
    pub partitions: Vec<Partition>,
}

/// Rows of one timestamp, columnar.
#[derive(Debug, Default)]
struct Rows {
    comid: Vec<i64>,
    mean: Vec<f64>,
    thickness: Vec<i32>,
    ret_per: Vec<i32>,
}

pub struct GlobalTableMerger {
    layout: CycleLayout,
}

impl GlobalTableMerger {
    pub fn new(layout: CycleLayout) -> Self {
        Self { layout }
    }

    /// Classified tables of this cycle, in natural VPU order.
    pub fn tables(&self) -> Result<Vec<(VpuId, PathBuf)>> {
        let dir = self.layout.maptables_dir();
        let ymd = self.layout.cycle().ymd();
        let mut tables = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir).map_err(PipelineError::io(&dir))? {
                let entry = entry.map_err(PipelineError::io(&dir))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                match MapTableFile::parse_name(&name)? {
                    Some(table) if table.ymd == ymd => tables.push((table.vpu, entry.path())),
                    Some(table) => debug!(file = %name, cycle = %table.ymd, "ignoring table of another cycle"),
                    None => {}
                }
            }
        }
        tables.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(tables)
    }

    /// Writes `mapstyletable_{%Y-%m-%d-%H}.csv` for every timestamp and then
    /// removes the per-VPU tables. Null means are written as 0.
    pub fn merge(&self) -> Result<MergeReport> {
        let tables = self.tables()?;
        if tables.is_empty() {
            return Err(PipelineError::MissingInput(format!(
                "no classified tables for cycle {} in {}",
                self.layout.cycle(),
                self.layout.maptables_dir().display()
            )));
        }

        let mut by_time: BTreeMap<i64, Rows> = BTreeMap::new();
        for (vpu, path) in &tables {
            let mut rows = 0;
            for batch in read_map_table(path)? {
                rows += batch.num_rows();
                append_batch(&batch, path, &mut by_time)?;
            }
            debug!(vpu = %vpu, rows, "table loaded");
        }

        let mut partitions = Vec::with_capacity(by_time.len());
        for (secs, rows) in by_time {
            let timestamp = DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| PipelineError::StructuralMismatch(format!("timestamp {secs} is out of range")))?;
            let path = self.layout.global_table(timestamp);
            let n = rows.comid.len();
            write_csv(&path, rows)?;
            partitions.push(Partition {
                timestamp,
                path,
                rows: n,
            });
        }
        info!(tables = tables.len(), partitions = partitions.len(), "global tables written");

        for (_, path) in &tables {
            fs::remove_file(path).map_err(PipelineError::io(path))?;
        }
        Ok(MergeReport {
            vpus: tables.into_iter().map(|(vpu, _)| vpu).collect(),
            partitions,
        })
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PipelineError::MissingInput(format!("{} lacks a usable {name} column", path.display())))
}

fn append_batch(batch: &RecordBatch, path: &Path, by_time: &mut BTreeMap<i64, Rows>) -> Result<()> {
    let ts = column::<TimestampSecondArray>(batch, COL_TIMESTAMP, path)?;
    let comid = column::<Int64Array>(batch, COL_COMID, path)?;
    let mean = column::<Float64Array>(batch, COL_MEAN, path)?;
    let thickness = column::<Int32Array>(batch, COL_THICKNESS, path)?;
    let ret_per = column::<Int32Array>(batch, COL_RET_PER, path)?;
    for i in 0..batch.num_rows() {
        let rows = by_time.entry(ts.value(i)).or_default();
        rows.comid.push(comid.value(i));
        let m = if mean.is_null(i) { 0.0 } else { mean.value(i) };
        rows.mean.push(if m.is_nan() { 0.0 } else { m });
        rows.thickness.push(thickness.value(i));
        rows.ret_per.push(ret_per.value(i));
    }
    Ok(())
}

fn write_csv(path: &Path, rows: Rows) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(COL_COMID, DataType::Int64, false),
        Field::new(COL_MEAN, DataType::Float64, false),
        Field::new(COL_THICKNESS, DataType::Int32, false),
        Field::new(COL_RET_PER, DataType::Int32, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(rows.comid)),
        Arc::new(Float64Array::from(rows.mean)),
        Arc::new(Int32Array::from(rows.thickness)),
        Arc::new(Int32Array::from(rows.ret_per)),
    ];
    let batch = RecordBatch::try_new(schema, columns)?;

    let tmp = tmp_path(path);
    let file = File::create(&tmp).map_err(PipelineError::io(&tmp))?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(&batch)?;
    drop(writer);
    fs::rename(&tmp, path).map_err(PipelineError::io(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifiedRecord;
    use crate::cycle::ForecastCycle;
    use crate::maptable::write_map_table;
    use chrono::{Duration, NaiveDate};

    fn rec(hour: i64, comid: i64, mean: Option<f64>) -> ClassifiedRecord {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        ClassifiedRecord {
            timestamp: t0 + Duration::hours(hour),
            comid,
            mean,
            thickness: 2,
            ret_per: 5,
        }
    }

    fn layout(root: &Path) -> CycleLayout {
        let layout = CycleLayout::new(root, ForecastCycle::parse("20240101").unwrap());
        fs::create_dir_all(layout.maptables_dir()).unwrap();
        layout
    }

    #[test]
    fn partitions_by_timestamp_and_removes_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let a = layout.map_table(&VpuId::from(714));
        let b = layout.map_table(&VpuId::from(99));
        write_map_table(&a, &[rec(0, 7, Some(1.5)), rec(3, 7, None)]).unwrap();
        write_map_table(&b, &[rec(0, 1, Some(2.0)), rec(0, 2, Some(0.0)), rec(3, 1, Some(4.0))]).unwrap();

        let report = GlobalTableMerger::new(layout.clone()).merge().unwrap();
        assert_eq!(report.vpus, vec![VpuId::from(99), VpuId::from(714)]);
        let counts: Vec<usize> = report.partitions.iter().map(|p| p.rows).collect();
        assert_eq!(counts, [3, 2]);
        assert!(!a.exists() && !b.exists());

        let first = fs::read_to_string(&report.partitions[0].path).unwrap();
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines[0], "comid,mean,thickness,ret_per");
        // natural VPU order: 99 before 714
        assert!(lines[1].starts_with("1,"));
        assert!(lines[3].starts_with("7,1.5,2,5"));
        assert!(report.partitions[1].path.ends_with("mapstyletable_2024-01-01-03.csv"));

        let second = fs::read_to_string(&report.partitions[1].path).unwrap();
        let null_row = second.lines().find(|l| l.starts_with("7,")).unwrap();
        let mean: f64 = null_row.split(',').nth(1).unwrap().parse().unwrap();
        assert_eq!(mean, 0.0);
    }

    #[test]
    fn no_tables_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = GlobalTableMerger::new(layout(dir.path())).merge().unwrap_err();
        assert!(err.is_missing_input());
    }

    #[test]
    fn other_cycles_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let stale = layout.maptables_dir().join("map_101_20231231.parquet");
        write_map_table(&stale, &[rec(0, 1, Some(1.0))]).unwrap();
        assert!(GlobalTableMerger::new(layout).merge().unwrap_err().is_missing_input());
        assert!(stale.exists());
    }
}
