//! Process configuration, resolved once at startup and passed down explicitly.
//!
//! Directory roots come from the environment (a `.env` file is honoured);
//! tuning knobs come from an optional TOML file named by `FORECAST_SETTINGS`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::cycle::{CycleLayout, ForecastCycle};
use crate::ids::VpuId;

pub const ENV_CONFIGS_DIR: &str = "CONFIGS_DIR";
pub const ENV_RUNOFFS_DIR: &str = "RUNOFFS_DIR";
pub const ENV_FORECASTS_DIR: &str = "FORECASTS_DIR";
pub const ENV_INITS_DIR: &str = "INITS_DIR";
pub const ENV_RETURN_PERIODS_DIR: &str = "RETURN_PERIODS_DIR";
pub const ENV_SETTINGS: &str = "FORECAST_SETTINGS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("{var} points to {path}, which is not a directory")]
    NotADirectory { var: &'static str, path: PathBuf },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

// ── Directory roots ───────────────────────────────────────────────────────────

/// Base directories shared by every stage.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Static per-VPU routing topology and parameters.
    pub configs_dir: PathBuf,
    /// Land-surface runoff inputs, one sub-directory per cycle.
    pub runoffs_dir: PathBuf,
    /// Forecast working directory, one sub-directory per cycle.
    pub forecasts_dir: PathBuf,
    /// Initial-condition handoff files, one sub-directory per VPU.
    pub inits_dir: PathBuf,
    /// Static return-period reference tables.
    pub return_periods_dir: PathBuf,
}

impl Paths {
    /// Reads the directory roots from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the roots through `lookup`; every root must exist.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let dir = |var: &'static str| -> Result<PathBuf, ConfigError> {
            let value = lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingVar(var))?;
            let path = PathBuf::from(value);
            if !path.is_dir() {
                return Err(ConfigError::NotADirectory { var, path });
            }
            Ok(path)
        };
        Ok(Self {
            configs_dir: dir(ENV_CONFIGS_DIR)?,
            runoffs_dir: dir(ENV_RUNOFFS_DIR)?,
            forecasts_dir: dir(ENV_FORECASTS_DIR)?,
            inits_dir: dir(ENV_INITS_DIR)?,
            return_periods_dir: dir(ENV_RETURN_PERIODS_DIR)?,
        })
    }

    /// VPUs with a configuration directory, in natural order. Entries whose
    /// names are not VPU codes are skipped.
    pub fn configured_vpus(&self) -> std::io::Result<Vec<VpuId>> {
        let mut vpus = Vec::new();
        for entry in fs::read_dir(&self.configs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match VpuId::parse(&name) {
                Ok(vpu) => vpus.push(vpu),
                Err(_) => warn!(entry = %name, "skipping non-VPU entry in configs directory"),
            }
        }
        vpus.sort();
        Ok(vpus)
    }

    pub fn cycle(&self, cycle: ForecastCycle) -> CycleLayout {
        CycleLayout::new(&self.forecasts_dir, cycle)
    }

    pub fn runoff_dir(&self, cycle: ForecastCycle) -> PathBuf {
        self.runoffs_dir.join(cycle.ymd())
    }

    pub fn return_period_file(&self, vpu: &VpuId) -> PathBuf {
        self.return_periods_dir.join(format!("returnperiods_{vpu}.nc"))
    }

    /// `inits/{vpu}/Qinit_{vpu}_{YYYYMMDD}.nc` for the given initialisation day.
    pub fn init_file(&self, vpu: &VpuId, init_date: NaiveDate) -> PathBuf {
        self.inits_dir
            .join(vpu.as_str())
            .join(format!("Qinit_{vpu}_{}.nc", init_date.format("%Y%m%d")))
    }
}

// ── Tuning ────────────────────────────────────────────────────────────────────

/// Tunable knobs. Every field has a default, so the settings file is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Target uncompressed size of one store chunk, in bytes.
    pub chunk_target_bytes: usize,
    /// zstd level used for the discharge variable.
    pub zstd_level: i32,
    /// Upper bound on fan-out workers, on top of hardware parallelism.
    pub max_workers: Option<usize>,
    /// Routing model executable used by `run_routing`.
    pub routing_executable: PathBuf,
    /// Replacement for the built-in slowest-first VPU ranking.
    pub priority: Option<Vec<u32>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_target_bytes: 5_000_000,
            zstd_level: 3,
            max_workers: None,
            routing_executable: PathBuf::from("/home/rapid/src/rapid"),
            priority: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_target_bytes == 0 {
            return Err(ConfigError::ValidationError("chunk_target_bytes must be positive".into()));
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(ConfigError::ValidationError(format!(
                "zstd_level must be within 1..=22, got {}",
                self.zstd_level
            )));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::ValidationError("max_workers must be at least 1".into()));
        }
        if let Some(priority) = &self.priority {
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = priority.iter().find(|v| !seen.insert(**v)) {
                return Err(ConfigError::ValidationError(format!(
                    "VPU {dup} appears twice in the priority list"
                )));
            }
        }
        Ok(())
    }
}

// ── Combined ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paths: Paths,
    pub settings: Settings,
}

impl PipelineConfig {
    /// Resolves paths from the environment and loads the optional settings file.
    pub fn load() -> Result<Self, ConfigError> {
        let paths = Paths::from_env()?;
        let settings = match std::env::var(ENV_SETTINGS) {
            Ok(path) if !path.trim().is_empty() => Settings::load(Path::new(&path))?,
            _ => Settings::default(),
        };
        Ok(Self { paths, settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_for(root: &Path) -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        for var in [
            ENV_CONFIGS_DIR,
            ENV_RUNOFFS_DIR,
            ENV_FORECASTS_DIR,
            ENV_INITS_DIR,
            ENV_RETURN_PERIODS_DIR,
        ] {
            let dir = root.join(var.to_lowercase());
            fs::create_dir_all(&dir).unwrap();
            env.insert(var, dir.display().to_string());
        }
        env
    }

    #[test]
    fn paths_resolve_from_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env_for(tmp.path());
        let paths = Paths::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(paths.forecasts_dir, tmp.path().join("forecasts_dir"));
        let init = paths.init_file(&VpuId::from(101), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(init.ends_with("101/Qinit_101_20240102.nc"));
    }

    #[test]
    fn configured_vpus_in_natural_order() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env_for(tmp.path());
        let paths = Paths::from_lookup(|k| env.get(k).cloned()).unwrap();
        for dir in ["714", "101", "99", "__pycache__"] {
            fs::create_dir_all(paths.configs_dir.join(dir)).unwrap();
        }
        fs::write(paths.configs_dir.join("102"), b"not a directory").unwrap();
        let vpus: Vec<String> = paths.configured_vpus().unwrap().into_iter().map(String::from).collect();
        assert_eq!(vpus, ["99", "101", "714"]);
    }

    #[test]
    fn missing_var_is_startup_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut env = env_for(tmp.path());
        env.remove(ENV_INITS_DIR);
        let err = Paths::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_INITS_DIR)));
    }

    #[test]
    fn missing_directory_is_startup_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut env = env_for(tmp.path());
        env.insert(ENV_FORECASTS_DIR, tmp.path().join("nope").display().to_string());
        let err = Paths::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::NotADirectory { .. }));
    }

    #[test]
    fn settings_defaults_and_overrides() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s, Settings::default());

        let s = Settings::from_toml_str("chunk_target_bytes = 40000000\nmax_workers = 4\npriority = [605, 109]").unwrap();
        assert_eq!(s.chunk_target_bytes, 40_000_000);
        assert_eq!(s.max_workers, Some(4));
        assert_eq!(s.priority, Some(vec![605, 109]));
        assert_eq!(s.zstd_level, 3);
    }

    #[test]
    fn settings_validation() {
        assert!(matches!(
            Settings::from_toml_str("zstd_level = 40"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("priority = [1, 2, 1]"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("chunk_bytes = 1"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn settings_file_not_found() {
        let err = Settings::load(Path::new("/nonexistent/settings.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
