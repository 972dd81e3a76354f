//! Map-style classification of ensemble-mean discharge.
//!
//! Each (timestep, reach) gets a line-thickness bucket from fixed flow
//! breaks and a return-period bucket from the reach's reference thresholds.
//! Both ladders are evaluated in ascending order and the last satisfied step
//! wins, so a non-monotonic threshold row still yields a defined bucket.

use chrono::{Duration, NaiveDateTime};
use tracing::warn;

use crate::mean::MeanSeries;
use crate::returnperiods::{ReturnPeriodTable, RETURN_PERIODS};

/// Classification covers `[t0, t0 + 10 days]`, both ends included.
pub const WINDOW_DAYS: i64 = 10;

/// `(minimum flow, thickness)`, ascending. Flows below the first break are 1.
pub const THICKNESS_BREAKS: [(f64, i32); 5] = [(20.0, 2), (250.0, 3), (1500.0, 4), (10000.0, 5), (30000.0, 6)];

/// One row of a classified table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub timestamp: NaiveDateTime,
    pub comid: i64,
    /// Clamped mean rounded to one decimal; `None` when the mean is NaN.
    pub mean: Option<f64>,
    pub thickness: i32,
    pub ret_per: i32,
}

pub fn thickness(flow: f64) -> i32 {
    let mut bucket = 1;
    for (min, t) in THICKNESS_BREAKS {
        if flow >= min {
            bucket = t;
        }
    }
    bucket
}

/// Largest return period whose threshold `flow` strictly exceeds, else 0.
pub fn return_period(flow: f64, thresholds: &[f64; 6]) -> i32 {
    let mut bucket = 0;
    for (threshold, years) in thresholds.iter().zip(RETURN_PERIODS) {
        if flow > *threshold {
            bucket = years;
        }
    }
    bucket
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Classifies the first ten days of `mean`, time-major then reach order.
/// The clamped mean is rounded to one decimal before either ladder runs.
/// Reaches missing from `table` get return period 0.
pub fn classify(mean: &MeanSeries, table: &ReturnPeriodTable) -> Vec<ClassifiedRecord> {
    let Some(&t0) = mean.times.first() else {
        return Vec::new();
    };
    let end = t0 + Duration::days(WINDOW_DAYS);
    let thresholds: Vec<Option<&[f64; 6]>> = mean.rivids.iter().map(|&r| table.get(r)).collect();
    let unmatched = thresholds.iter().filter(|t| t.is_none()).count();
    if unmatched > 0 {
        warn!(vpu = %mean.vpu, unmatched, "reaches without return-period thresholds classified as 0");
    }

    let mut records = Vec::new();
    for (t, &timestamp) in mean.times.iter().enumerate() {
        if timestamp > end {
            break;
        }
        for ((&comid, &raw), rp) in mean.rivids.iter().zip(mean.row(t)).zip(&thresholds) {
            let flow = if raw.is_nan() { raw } else { round1(raw.max(0.0)) };
            records.push(ClassifiedRecord {
                timestamp,
                comid,
                mean: (!raw.is_nan()).then_some(flow),
                thickness: thickness(flow),
                ret_per: rp.map_or(0, |rp| return_period(flow, rp)),
            });
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::VpuId;
    use chrono::NaiveDate;

    #[test]
    fn thickness_boundaries() {
        assert_eq!(thickness(20.0), 2);
        assert_eq!(thickness(19.999), 1);
        assert_eq!(thickness(30000.0), 6);
        assert_eq!(thickness(-5.0), 1);
        assert_eq!(thickness(249.9), 2);
        assert_eq!(thickness(1500.0), 4);
        assert_eq!(thickness(f64::NAN), 1);
    }

    #[test]
    fn thickness_is_monotonic() {
        let mut last = 0;
        for i in 0..4000 {
            let t = thickness(i as f64 * 10.0);
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn return_period_is_strict() {
        let rp = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        assert_eq!(return_period(10.0, &rp), 0);
        assert_eq!(return_period(10.1, &rp), 2);
        assert_eq!(return_period(30.0, &rp), 5);
        assert_eq!(return_period(60.5, &rp), 100);
    }

    #[test]
    fn last_satisfied_step_wins() {
        // rp25 above rp50: a flow between them lands on 50, not 10
        let rp = [1.0, 2.0, 3.0, 100.0, 4.0, 200.0];
        assert_eq!(return_period(5.0, &rp), 50);
    }

    fn series(hours: &[i64], rivids: Vec<i64>, values: Vec<f64>) -> MeanSeries {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        MeanSeries {
            vpu: VpuId::from(101),
            times: hours.iter().map(|&h| t0 + Duration::hours(h)).collect(),
            rivids,
            values,
        }
    }

    #[test]
    fn window_is_inclusive_of_day_ten() {
        let mean = series(&[0, 120, 240, 243], vec![1], vec![1.0, 2.0, 3.0, 4.0]);
        let records = classify(&mean, &ReturnPeriodTable::default());
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].mean, Some(3.0));
    }

    #[test]
    fn rows_are_time_major_and_clamped() {
        let table = ReturnPeriodTable::from_rows([(1, [5.0, 10.0, 15.0, 20.0, 25.0, 30.0])]);
        let mean = series(&[0, 3], vec![1, 2], vec![-4.0, 19.96, 26.04, f64::NAN]);
        let records = classify(&mean, &table);
        let comids: Vec<i64> = records.iter().map(|r| r.comid).collect();
        assert_eq!(comids, [1, 2, 1, 2]);
        assert_eq!(records[2].timestamp, mean.times[1]);

        assert_eq!(records[0].mean, Some(0.0));
        assert_eq!(records[0].thickness, 1);
        assert_eq!(records[1].mean, Some(20.0));
        assert_eq!(records[1].thickness, 2);
        assert_eq!(records[1].ret_per, 0, "reach 2 has no thresholds");
        assert_eq!(records[2].ret_per, 50);
        assert_eq!(records[3].mean, None);
        assert_eq!(records[3].thickness, 1);
    }

    #[test]
    fn buckets_follow_the_rounded_mean() {
        let table = ReturnPeriodTable::from_rows([(1, [10.0, 20.0, 30.0, 40.0, 50.0, 60.0])]);
        let mean = series(&[0], vec![1], vec![10.04]);
        let records = classify(&mean, &table);
        assert_eq!(records[0].mean, Some(10.0));
        assert_eq!(records[0].ret_per, 0);

        let mean = series(&[0], vec![1], vec![10.06]);
        let records = classify(&mean, &table);
        assert_eq!(records[0].mean, Some(10.1));
        assert_eq!(records[0].ret_per, 2);

        let mean = series(&[0], vec![1], vec![249.96]);
        assert_eq!(classify(&mean, &table)[0].thickness, 3);
    }
}
