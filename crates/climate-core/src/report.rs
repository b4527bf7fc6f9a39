use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::consumption::ConsumptionStats;
use crate::derive::DeriveSummary;
use crate::normalize::NormalizeStats;
use crate::unify::DedupSummary;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Skipped,
    Success,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Skipped => "skipped",
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
        }
    }
}

/// Outcome for one output table.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub status: StageStatus,
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageSummary {
    pub fn success(name: &str, row_count: usize) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Success,
            row_count: Some(row_count),
            error: None,
        }
    }

    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Skipped,
            row_count: None,
            error: Some(reason.into()),
        }
    }

    pub fn failed(name: &str, error: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Failed,
            row_count: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub blake3: String,
}

impl InputFile {
    pub fn fingerprint(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Hasher::new();
        let mut buffer = [0u8; 64 * 1024];
        let mut bytes = 0u64;
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            bytes += read as u64;
        }
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            blake3: hasher.finalize().to_hex().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub inputs: Vec<InputFile>,
    pub permit_sources: Vec<NormalizeStats>,
    pub dedup: DedupSummary,
    pub derive: DeriveSummary,
    pub consumption: ConsumptionStats,
    pub stages: Vec<StageSummary>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            inputs: Vec::new(),
            permit_sources: Vec::new(),
            dedup: DedupSummary::default(),
            derive: DeriveSummary::default(),
            consumption: ConsumptionStats::default(),
            stages: Vec::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageSummary> {
        self.stages
            .iter()
            .filter(|stage| stage.status == StageStatus::Failed)
    }

    pub fn is_complete(&self) -> bool {
        self.failed_stages().next().is_none()
    }
}
