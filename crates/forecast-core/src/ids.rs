//! Validated identifiers and the file-name grammar of the pipeline directories.
//!
//! Every place that used to derive a VPU or member from a file name by splitting
//! on `_` goes through one of the `parse_name` functions here instead; an
//! unexpected shape is an error rather than a silently mis-keyed unit.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ── VPU ───────────────────────────────────────────────────────────────────────

/// Code of a sub-basin partition, e.g. `"101"` or `"714"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VpuId(String);

impl VpuId {
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(invalid("VPU code", s, "empty"));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("VPU code", s, "must be ASCII alphanumeric"));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the code, when it is purely numeric.
    pub fn number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for VpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VpuId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VpuId {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VpuId> for String {
    fn from(id: VpuId) -> Self {
        id.0
    }
}

impl From<u32> for VpuId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

/// Natural order: numeric codes compare by value, so `"99" < "101"`.
impl Ord for VpuId {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for VpuId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compares strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = a.iter().take_while(|c| c.is_ascii_digit()).count();
                let nb = b.iter().take_while(|c| c.is_ascii_digit()).count();
                let (da, db) = (trim_zeros(&a[..na]), trim_zeros(&b[..nb]));
                let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = &a[na..];
                b = &b[nb..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&c| c != b'0').unwrap_or(digits.len());
    &digits[first..]
}

// ── Ensemble member ───────────────────────────────────────────────────────────

/// Ensemble member number: 1–51 perturbed, 52 control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnsembleMember(u8);

impl EnsembleMember {
    pub const CONTROL: EnsembleMember = EnsembleMember(52);
    pub const PERTURBED_COUNT: u8 = 51;

    pub fn new(n: u32) -> Result<Self> {
        if (1..=52).contains(&n) {
            Ok(Self(n as u8))
        } else {
            Err(invalid("ensemble member", &n.to_string(), "must be within 1..=52"))
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let n: u32 = s
            .parse()
            .map_err(|_| invalid("ensemble member", s, "not an integer"))?;
        Self::new(n)
    }

    pub fn number(self) -> u32 {
        self.0 as u32
    }

    pub fn is_control(self) -> bool {
        self == Self::CONTROL
    }

    /// The full perturbed set `1..=51`.
    pub fn all_perturbed() -> Vec<EnsembleMember> {
        (1..=Self::PERTURBED_COUNT).map(EnsembleMember).collect()
    }
}

impl fmt::Display for EnsembleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── File names ────────────────────────────────────────────────────────────────

/// A routed-discharge output in a cycle's `outputs/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFile {
    /// `Qout_{vpu}.nc`: all perturbed members of one VPU in one file.
    Perturbed { vpu: VpuId },
    /// `Qout_{vpu}_{member}.nc`: a single member of one VPU.
    Member { vpu: VpuId, member: EnsembleMember },
}

impl OutputFile {
    /// Parses a file name. Returns `Ok(None)` for files that are not discharge
    /// outputs at all and an error for `Qout_*.nc` names with a bad shape.
    pub fn parse_name(name: &str) -> Result<Option<Self>> {
        let Some(stem) = name.strip_prefix("Qout_").and_then(|s| s.strip_suffix(".nc")) else {
            return Ok(None);
        };
        let parts: Vec<&str> = stem.split('_').collect();
        let bad = |reason: &str| PipelineError::BadFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match parts.as_slice() {
            [vpu] => Ok(Some(Self::Perturbed {
                vpu: VpuId::parse(vpu).map_err(|_| bad("invalid VPU code"))?,
            })),
            [vpu, member] => Ok(Some(Self::Member {
                vpu: VpuId::parse(vpu).map_err(|_| bad("invalid VPU code"))?,
                member: EnsembleMember::parse(member).map_err(|_| bad("invalid ensemble member"))?,
            })),
            _ => Err(bad("expected Qout_{vpu}.nc or Qout_{vpu}_{member}.nc")),
        }
    }

    pub fn vpu(&self) -> &VpuId {
        match self {
            Self::Perturbed { vpu } | Self::Member { vpu, .. } => vpu,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            Self::Perturbed { vpu } => format!("Qout_{vpu}.nc"),
            Self::Member { vpu, member } => format!("Qout_{vpu}_{member}.nc"),
        }
    }
}

/// A routing namelist: `namelist_{vpu}_{label}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namelist {
    pub vpu: VpuId,
    pub label: String,
}

impl Namelist {
    pub fn parse_name(name: &str) -> Result<Self> {
        let bad = |reason: &str| PipelineError::BadFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let rest = name
            .strip_prefix("namelist_")
            .ok_or_else(|| bad("expected namelist_{vpu}_{label}"))?;
        let (vpu, label) = rest
            .split_once('_')
            .ok_or_else(|| bad("missing label after VPU code"))?;
        if label.is_empty() {
            return Err(bad("empty label"));
        }
        Ok(Self {
            vpu: VpuId::parse(vpu).map_err(|_| bad("invalid VPU code"))?,
            label: label.to_string(),
        })
    }
}

/// A per-VPU classified table: `map_{vpu}_{YYYYMMDD}.parquet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTableFile {
    pub vpu: VpuId,
    pub ymd: String,
}

impl MapTableFile {
    pub fn parse_name(name: &str) -> Result<Option<Self>> {
        let Some(stem) = name.strip_prefix("map_").and_then(|s| s.strip_suffix(".parquet")) else {
            return Ok(None);
        };
        let bad = |reason: &str| PipelineError::BadFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let (vpu, ymd) = stem
            .rsplit_once('_')
            .ok_or_else(|| bad("expected map_{vpu}_{YYYYMMDD}.parquet"))?;
        if ymd.len() != 8 || !ymd.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad("cycle date must be YYYYMMDD"));
        }
        Ok(Some(Self {
            vpu: VpuId::parse(vpu).map_err(|_| bad("invalid VPU code"))?,
            ymd: ymd.to_string(),
        }))
    }
}

/// Ensemble number encoded in a runoff file name (`{member}.runoff.nc` and
/// similar: the integer before the first `.`).
pub fn runoff_member(name: &str) -> Result<EnsembleMember> {
    let head = name.split('.').next().unwrap_or_default();
    EnsembleMember::parse(head).map_err(|_| PipelineError::BadFileName {
        name: name.to_string(),
        reason: "runoff file must start with its ensemble number".to_string(),
    })
}

fn invalid(kind: &'static str, value: &str, reason: &str) -> PipelineError {
    PipelineError::InvalidId {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpu_codes_sort_naturally() {
        let mut ids: Vec<VpuId> = ["714", "101", "99", "1010", "102"]
            .iter()
            .map(|s| VpuId::parse(s).unwrap())
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, ["99", "101", "102", "714", "1010"]);
    }

    #[test]
    fn natural_cmp_handles_mixed_text() {
        assert_eq!(natural_cmp("map_2_x", "map_10_x"), Ordering::Less);
        assert_eq!(natural_cmp("a", "b"), Ordering::Less);
        assert_eq!(natural_cmp("007", "7"), Ordering::Equal);
    }

    #[test]
    fn vpu_rejects_separators() {
        assert!(VpuId::parse("").is_err());
        assert!(VpuId::parse("10_1").is_err());
        assert!(VpuId::parse("../x").is_err());
    }

    #[test]
    fn member_bounds() {
        assert!(EnsembleMember::new(0).is_err());
        assert!(EnsembleMember::new(53).is_err());
        assert!(EnsembleMember::new(52).unwrap().is_control());
        assert!(!EnsembleMember::new(51).unwrap().is_control());
        assert_eq!(EnsembleMember::all_perturbed().len(), 51);
    }

    #[test]
    fn members_sort_numerically() {
        let mut m: Vec<EnsembleMember> = ["10", "2", "1"]
            .iter()
            .map(|s| EnsembleMember::parse(s).unwrap())
            .collect();
        m.sort();
        let n: Vec<u32> = m.iter().map(|m| m.number()).collect();
        assert_eq!(n, [1, 2, 10]);
    }

    #[test]
    fn output_file_names() {
        assert_eq!(
            OutputFile::parse_name("Qout_101.nc").unwrap(),
            Some(OutputFile::Perturbed { vpu: VpuId::from(101) })
        );
        assert_eq!(
            OutputFile::parse_name("Qout_101_52.nc").unwrap(),
            Some(OutputFile::Member {
                vpu: VpuId::from(101),
                member: EnsembleMember::CONTROL
            })
        );
        assert_eq!(OutputFile::parse_name("20240101.zarr").unwrap(), None);
        assert!(OutputFile::parse_name("Qout_101_52_x.nc").is_err());
        assert!(OutputFile::parse_name("Qout_101_99.nc").is_err());
    }

    #[test]
    fn output_file_name_round_trips_through_parse() {
        let f = OutputFile::Member {
            vpu: VpuId::from(605),
            member: EnsembleMember::new(7).unwrap(),
        };
        assert_eq!(OutputFile::parse_name(&f.file_name()).unwrap(), Some(f));
    }

    #[test]
    fn namelist_names() {
        let n = Namelist::parse_name("namelist_605_52").unwrap();
        assert_eq!(n.vpu, VpuId::from(605));
        assert_eq!(n.label, "52");
        assert!(Namelist::parse_name("namelist_605").is_err());
        assert!(Namelist::parse_name("config_605_1").is_err());
    }

    #[test]
    fn map_table_names() {
        let t = MapTableFile::parse_name("map_101_20240101.parquet").unwrap().unwrap();
        assert_eq!(t.vpu, VpuId::from(101));
        assert_eq!(t.ymd, "20240101");
        assert!(MapTableFile::parse_name("map_101.parquet").is_err());
        assert_eq!(MapTableFile::parse_name("mapstyletable_2024.csv").unwrap(), None);
    }

    #[test]
    fn runoff_names() {
        assert_eq!(runoff_member("7.runoff.nc").unwrap().number(), 7);
        assert_eq!(runoff_member("52.nc").unwrap(), EnsembleMember::CONTROL);
        assert!(runoff_member("runoff.nc").is_err());
    }
}
