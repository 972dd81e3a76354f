//! Per-VPU classified tables: `maptables/map_{vpu}_{YYYYMMDD}.parquet`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use crate::classify::{classify, ClassifiedRecord};
use crate::config::Paths;
use crate::cycle::{CycleLayout, ForecastCycle};
use crate::error::{PipelineError, Result};
use crate::ids::VpuId;
use crate::mean::EnsembleMean;
use crate::returnperiods::ReturnPeriodTable;
use crate::store::ConsolidatedStore;

pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_COMID: &str = "comid";
pub const COL_MEAN: &str = "mean";
pub const COL_THICKNESS: &str = "thickness";
pub const COL_RET_PER: &str = "ret_per";

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COL_TIMESTAMP, DataType::Timestamp(TimeUnit::Second, None), false),
        Field::new(COL_COMID, DataType::Int64, false),
        Field::new(COL_MEAN, DataType::Float64, true),
        Field::new(COL_THICKNESS, DataType::Int32, false),
        Field::new(COL_RET_PER, DataType::Int32, false),
    ]))
}

pub fn to_record_batch(records: &[ClassifiedRecord]) -> Result<RecordBatch> {
    let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp.and_utc().timestamp()).collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampSecondArray::from(timestamps)),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.comid))),
        Arc::new(Float64Array::from_iter(records.iter().map(|r| r.mean))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.thickness))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.ret_per))),
    ];
    Ok(RecordBatch::try_new(schema(), columns)?)
}

/// Writes `records` as zstd-compressed Parquet. The file appears at `path`
/// only once complete.
pub fn write_map_table(path: &Path, records: &[ClassifiedRecord]) -> Result<()> {
    let batch = to_record_batch(records)?;
    let tmp = tmp_path(path);
    let file = File::create(&tmp).map_err(PipelineError::io(&tmp))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    fs::rename(&tmp, path).map_err(PipelineError::io(path))
}

/// Reads a classified table back as record batches.
pub fn read_map_table(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).map_err(PipelineError::io(path))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Per-VPU stage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    Written { rows: usize },
    /// The table already existed and no rebuild was requested.
    Skipped,
}

/// Classifies VPUs of one cycle against their return-period tables.
pub struct MapClassifier {
    paths: Paths,
    layout: CycleLayout,
    rebuild: bool,
}

impl MapClassifier {
    pub fn new(paths: &Paths, cycle: ForecastCycle, rebuild: bool) -> Self {
        Self {
            layout: paths.cycle(cycle),
            paths: paths.clone(),
            rebuild,
        }
    }

    pub fn classify_vpu(&self, store: &ConsolidatedStore, vpu: &VpuId) -> Result<MapOutcome> {
        let out = self.layout.map_table(vpu);
        if out.exists() && !self.rebuild {
            info!(vpu = %vpu, path = %out.display(), "map table exists, skipping");
            return Ok(MapOutcome::Skipped);
        }
        let table = ReturnPeriodTable::read(&self.paths.return_period_file(vpu))?;
        let mean = EnsembleMean::new(store).for_vpu(vpu)?;
        let records = classify(&mean, &table);
        debug!(vpu = %vpu, reaches = mean.n_reach(), rows = records.len(), "classified");

        let dir = self.layout.maptables_dir();
        fs::create_dir_all(&dir).map_err(PipelineError::io(&dir))?;
        write_map_table(&out, &records)?;
        info!(vpu = %vpu, rows = records.len(), "map table written");
        Ok(MapOutcome::Written { rows: records.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use chrono::{Duration, NaiveDate};

    fn records() -> Vec<ClassifiedRecord> {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        vec![
            ClassifiedRecord {
                timestamp: t0,
                comid: 11,
                mean: Some(12.5),
                thickness: 1,
                ret_per: 0,
            },
            ClassifiedRecord {
                timestamp: t0 + Duration::hours(3),
                comid: 11,
                mean: None,
                thickness: 1,
                ret_per: 0,
            },
        ]
    }

    #[test]
    fn parquet_table_keeps_nulls_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map_101_20240101.parquet");
        write_map_table(&path, &records()).unwrap();
        assert!(!tmp_path(&path).exists());

        let batches = read_map_table(&path).unwrap();
        let batch = &batches[0];
        assert_eq!(batch.schema().fields().len(), 5);
        assert_eq!(batch.num_rows(), 2);
        let mean = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(mean.value(0), 12.5);
        assert!(mean.is_null(1));
        let ts = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampSecondArray>()
            .unwrap();
        assert_eq!(ts.value(1) - ts.value(0), 3 * 3600);
    }
}
