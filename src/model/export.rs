//! Export job types and the packaged artifact's manifest.

use std::fmt;
use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::spec::ResourceKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportFormat {
    /// A single tar archive, zstd-compressed unless compression is `none`.
    #[default]
    Archive,

    /// An unpacked HTML5 directory tree.
    Directory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompressionLevel {
    None,
    #[default]
    Standard,
    Maximum,
}

impl CompressionLevel {
    /// The zstd level, or `None` for an uncompressed stream.
    pub fn zstd_level(self) -> Option<i32> {
        match self {
            Self::None => None,
            Self::Standard => Some(3),
            Self::Maximum => Some(19),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Standard => "standard",
            Self::Maximum => "maximum",
        }
    }
}

/// What to package and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "include_assets_default")]
    pub include_assets: bool,
    #[serde(default)]
    pub compression_level: CompressionLevel,
}

fn include_assets_default() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            include_assets: true,
            compression_level: CompressionLevel::default(),
        }
    }
}

/// Forward-only: `Queued -> Running -> Completed | Failed`.
///
/// A queued job that is cancelled or expires goes straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Packaging step, used to name which stage ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStage {
    Render,
    Assets,
    Write,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Render => "render",
            Self::Assets => "assets",
            Self::Write => "write",
        })
    }
}

/// Why a job ended in `Failed`. The display form is shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FailureReason {
    #[error("cancelled")]
    Cancelled,

    #[error("expired before it finished")]
    Expired,

    #[error("the {stage} stage timed out")]
    TimedOut { stage: ExportStage },

    #[error("asset '{resource}' could not be bundled: {reason}")]
    AssetFailed { resource: String, reason: String },

    #[error("artifact is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: u64, limit: u64 },

    #[error("the specification could not be serialized: {reason}")]
    Serialization { reason: String },

    #[error("I/O failure while packaging: {reason}")]
    Io { reason: String },

    #[error("the export worker stopped unexpectedly")]
    WorkerLost,
}

impl FailureReason {
    /// Failures that may end a job before it ever ran.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// An asynchronous packaging of one pinned specification version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub spec_id: Uuid,

    /// The version being packaged. Later commits never change it.
    pub session_version: u64,
    pub format: ExportFormat,
    pub include_assets: bool,
    pub compression_level: CompressionLevel,
    pub status: ExportStatus,
    pub artifact_location: Option<PathBuf>,
    pub artifact_bytes: Option<u64>,
    pub failure: Option<FailureReason>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl ExportJob {
    pub(crate) fn queued(spec_id: Uuid, version: u64, options: ExportOptions, at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec_id,
            session_version: version,
            format: options.format,
            include_assets: options.include_assets,
            compression_level: options.compression_level,
            status: ExportStatus::Queued,
            artifact_location: None,
            artifact_bytes: None,
            failure: None,
            created_at: at,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            format: self.format,
            include_assets: self.include_assets,
            compression_level: self.compression_level,
        }
    }

    /// `Queued -> Running`. Returns false when the job is not queued.
    pub(crate) fn start(&mut self, at: Timestamp) -> bool {
        if self.status != ExportStatus::Queued {
            return false;
        }
        self.status = ExportStatus::Running;
        self.started_at = Some(at);
        true
    }

    /// `Running -> Completed`.
    pub(crate) fn complete(&mut self, location: PathBuf, bytes: u64, at: Timestamp) -> bool {
        if self.status != ExportStatus::Running {
            return false;
        }
        self.status = ExportStatus::Completed;
        self.artifact_location = Some(location);
        self.artifact_bytes = Some(bytes);
        self.finished_at = Some(at);
        true
    }

    /// `Running -> Failed`, or `Queued -> Failed` for cancellation.
    pub(crate) fn fail(&mut self, reason: FailureReason, at: Timestamp) -> bool {
        let allowed = match self.status {
            ExportStatus::Running => true,
            ExportStatus::Queued => reason.is_cancellation(),
            ExportStatus::Completed | ExportStatus::Failed => false,
        };
        if !allowed {
            return false;
        }
        self.status = ExportStatus::Failed;
        self.failure = Some(reason);
        self.finished_at = Some(at);
        true
    }
}

/// Listing of everything inside an artifact. Written as `manifest.json`.
///
/// Carries no timestamps: the same version and options give the same manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub spec_id: Uuid,
    pub version: u64,
    pub name: String,
    pub format: ExportFormat,
    pub compression_level: CompressionLevel,
    pub files: Vec<ManifestFile>,
    pub assets: Vec<ManifestAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    pub name: String,
    pub kind: ResourceKind,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExportJob {
        ExportJob::queued(Uuid::new_v4(), 3, ExportOptions::default(), Timestamp::now())
    }

    #[test]
    fn transitions_are_forward_only() {
        let mut job = job();
        assert!(!job.complete(PathBuf::from("a.tar"), 1, Timestamp::now()));
        assert!(job.start(Timestamp::now()));
        assert!(!job.start(Timestamp::now()));
        assert!(job.complete(PathBuf::from("a.tar"), 1, Timestamp::now()));
        assert!(!job.fail(FailureReason::Cancelled, Timestamp::now()));
        assert_eq!(job.status, ExportStatus::Completed);
    }

    #[test]
    fn queued_job_fails_only_by_cancellation() {
        let mut job = job();
        assert!(!job.fail(FailureReason::WorkerLost, Timestamp::now()));
        assert!(job.fail(FailureReason::Cancelled, Timestamp::now()));
        assert_eq!(job.status, ExportStatus::Failed);
        assert_eq!(job.failure, Some(FailureReason::Cancelled));
    }

    #[test]
    fn options_default_to_standard_archive_with_assets() {
        let options: ExportOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ExportOptions::default());
        assert!(options.include_assets);
        assert_eq!(options.compression_level, CompressionLevel::Standard);
    }
}
