use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::SourceSystem;

pub const CONFIG_PATH_ENV: &str = "CLIMATE_CONFIG";
pub const DATA_DIR_ENV: &str = "CLIMATE_DATA_DIR";

/// Active and closed extracts published by each permitting system.
const PERMIT_FILES: &[(SourceSystem, &[&str])] = &[
    (SourceSystem::Legacy, &["set1_active.csv", "set1_closed.csv"]),
    (SourceSystem::Current, &["set2_active.csv", "set2_closed.csv"]),
];

/// Inclusive latitude/longitude box for the city.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: 32.5,
            max_lat: 33.3,
            min_lng: -117.7,
            max_lng: -116.8,
        }
    }
}

impl BoundingBox {
    /// Each coordinate that is present must fall inside the box; a missing
    /// coordinate never disqualifies a row.
    pub fn admits(&self, lat: Option<f64>, lng: Option<f64>) -> bool {
        let lat_ok = lat.map_or(true, |v| v >= self.min_lat && v <= self.max_lat);
        let lng_ok = lng.map_or(true, |v| v >= self.min_lng && v <= self.max_lng);
        lat_ok && lng_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub raw_dir: Option<PathBuf>,
    pub utility_dir: Option<PathBuf>,
    pub processed_dir: Option<PathBuf>,
    pub aggregated_dir: Option<PathBuf>,
    pub geofence: BoundingBox,
    pub utility_zip_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            raw_dir: None,
            utility_dir: None,
            processed_dir: None,
            aggregated_dir: None,
            geofence: BoundingBox::default(),
            utility_zip_prefix: "92".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults, then the TOML file (explicit path or `CLIMATE_CONFIG`), then
    /// `CLIMATE_DATA_DIR`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Some(dir) = env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fence = &self.geofence;
        if fence.min_lat > fence.max_lat || fence.min_lng > fence.max_lng {
            return Err(PipelineError::Config(format!(
                "geofence bounds are inverted: {fence:?}"
            )));
        }
        if self.utility_zip_prefix.is_empty()
            || !self.utility_zip_prefix.chars().all(|c| c.is_ascii_digit())
        {
            return Err(PipelineError::Config(format!(
                "utility_zip_prefix must be digits, got '{}'",
                self.utility_zip_prefix
            )));
        }
        Ok(())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.raw_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("raw"))
    }

    pub fn utility_dir(&self) -> PathBuf {
        self.utility_dir
            .clone()
            .unwrap_or_else(|| self.raw_dir().join("sdge"))
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("processed"))
    }

    pub fn aggregated_dir(&self) -> PathBuf {
        self.aggregated_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("aggregated"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join("run_report.json")
    }

    pub fn permit_sources(&self) -> Vec<(SourceSystem, Vec<PathBuf>)> {
        let raw = self.raw_dir();
        PERMIT_FILES
            .iter()
            .map(|(source, names)| (*source, names.iter().map(|name| raw.join(name)).collect()))
            .collect()
    }
}
