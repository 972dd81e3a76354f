//! Synthetic pipeline inputs shared by the unit tests.

use std::path::Path;

use netcdf3::DataSet;

use crate::netcdf::write_classic;

/// Writes a `Qout` file with `hours since 2024-01-01` timestamps.
pub(crate) fn write_qout(path: &Path, dims: &[&str], shape: &[usize], values: Vec<f32>, rivids: &[i32], hours: &[i32]) {
    let mut ds = DataSet::new();
    for (d, n) in dims.iter().zip(shape) {
        ds.add_fixed_dim(d, *n).unwrap();
    }
    ds.add_var_f32("Qout", dims).unwrap();
    ds.add_var_i32("rivid", &["rivid"]).unwrap();
    ds.add_var_i32("time", &["time"]).unwrap();
    ds.add_var_attr_string("time", "units", "hours since 2024-01-01").unwrap();
    write_classic(path, &ds, |f| {
        f.write_var_f32("Qout", &values)?;
        f.write_var_i32("rivid", rivids)?;
        f.write_var_i32("time", hours)
    })
    .unwrap();
}

/// Writes one member's `Qout(time, rivid)` where every value is `f(t, r)`.
pub(crate) fn write_member(path: &Path, rivids: &[i32], hours: &[i32], f: impl Fn(usize, usize) -> f32) {
    let mut values = Vec::new();
    for t in 0..hours.len() {
        for r in 0..rivids.len() {
            values.push(f(t, r));
        }
    }
    write_qout(path, &["time", "rivid"], &[hours.len(), rivids.len()], values, rivids, hours);
}

/// Writes a merged perturbed file `Qout(ensemble, time, rivid)` where every
/// value is `f(e, t, r)` with `e` the position on the ensemble axis.
pub(crate) fn write_merged(path: &Path, n_members: usize, rivids: &[i32], hours: &[i32], f: impl Fn(usize, usize, usize) -> f32) {
    let mut values = Vec::new();
    for e in 0..n_members {
        for t in 0..hours.len() {
            for r in 0..rivids.len() {
                values.push(f(e, t, r));
            }
        }
    }
    write_qout(
        path,
        &["ensemble", "time", "rivid"],
        &[n_members, hours.len(), rivids.len()],
        values,
        rivids,
        hours,
    );
}

/// Writes a return-period reference table; `thresholds[i]` are rp2..rp100 of
/// reach `rivids[i]`.
pub(crate) fn write_return_periods(path: &Path, rivids: &[i32], thresholds: &[[f64; 6]]) {
    const NAMES: [&str; 6] = ["rp2", "rp5", "rp10", "rp25", "rp50", "rp100"];
    let mut ds = DataSet::new();
    ds.add_fixed_dim("rivid", rivids.len()).unwrap();
    ds.add_var_i32("rivid", &["rivid"]).unwrap();
    for name in NAMES {
        ds.add_var_f64(name, &["rivid"]).unwrap();
    }
    write_classic(path, &ds, |f| {
        f.write_var_i32("rivid", rivids)?;
        for (i, name) in NAMES.iter().enumerate() {
            let column: Vec<f64> = thresholds.iter().map(|t| t[i]).collect();
            f.write_var_f64(name, &column)?;
        }
        Ok(())
    })
    .unwrap();
}
