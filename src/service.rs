//! Service facade: the inbound interface a chat or HTTP adapter talks to.
//!
//! Wires the session store, preview builder and export packager over one
//! home directory:
//!
//! ```text
//! <home>/
//!   sessions/<workspace>.sqlite
//!   previews/<bundle>/
//!   exports/<job>.tar.zst
//!   assets/<workspace>/...
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{AssetSource, DirectoryAssets};
use crate::config::Config;
use crate::edit::ErrorPayload;
use crate::export::{ExportError, ExportPackager};
use crate::mobile;
use crate::model::{
    EditOperation, ExportJob, ExportOptions, GameSpecification, MobileProfile, WorkspaceId,
};
use crate::preview::{PreviewBuilder, PreviewError, PreviewHandle};
use crate::session::{SessionError, SessionStore};
use crate::storage::Storage;
use crate::templates::Template;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("importing assets from {path}: {source}")]
    Import {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ServiceError {
    /// The `{ index, kind, reason }` shape returned to the chat layer.
    pub fn payload(&self) -> ErrorPayload {
        if let Self::Session(SessionError::Edit(e)) = self {
            return e.payload();
        }
        let kind = match self {
            Self::Session(e) => match e {
                SessionError::NotFound(_) | SessionError::UnknownVersion { .. } => "notFound",
                SessionError::AlreadyExists(_) => "alreadyExists",
                SessionError::Archived(_) => "archived",
                SessionError::InvalidSpec(_) | SessionError::DerivedSpec => "invalidSpec",
                SessionError::Conflict(_) => "conflict",
                SessionError::Edit(e) => e.payload().kind,
                SessionError::Storage(_) => "storage",
            },
            Self::Preview(e) => match e {
                PreviewError::Timeout(_) => "timeout",
                PreviewError::SerializationFailed(_) => "serializationFailed",
                PreviewError::ValidationFailed(_) => "validationFailed",
                PreviewError::Io(_) | PreviewError::WorkerLost => "internal",
            },
            Self::Export(e) => match e {
                ExportError::ValidationFailed(_) => "validationFailed",
                ExportError::UnknownJob(_) => "notFound",
                ExportError::ShuttingDown | ExportError::Io(_) => "internal",
            },
            Self::Import { .. } => "import",
        };
        ErrorPayload {
            index: None,
            kind,
            reason: self.to_string(),
        }
    }
}

/// A batch of edits from the chat layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub workspace_id: WorkspaceId,
    pub operations: Vec<EditOperation>,

    /// Commit only if the session is still at this version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub mobile_profile: Option<MobileProfile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub options: ExportOptions,
    #[serde(default)]
    pub mobile_profile: Option<MobileProfile>,
}

/// What a successful edit reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSummary {
    pub workspace_id: WorkspaceId,
    pub spec_id: Uuid,
    pub version: u64,
    pub name: String,
    pub scenes: usize,
    pub objects: usize,
    pub event_rules: usize,
}

impl SpecSummary {
    pub fn of(workspace: &WorkspaceId, spec: &GameSpecification) -> Self {
        Self {
            workspace_id: workspace.clone(),
            spec_id: spec.id(),
            version: spec.version(),
            name: spec.properties().name.clone(),
            scenes: spec.scenes().len(),
            objects: spec.object_count(),
            event_rules: spec.event_rule_count(),
        }
    }
}

pub struct GameService {
    sessions: SessionStore,
    previews: PreviewBuilder,
    exports: ExportPackager,
    assets_root: PathBuf,
    retention: Duration,
}

impl GameService {
    /// Opens every component under `home`, reading assets from `<home>/assets`.
    pub fn open(home: &Path, config: &Config) -> Result<Self> {
        let assets_root = home.join("assets");
        let assets = Arc::new(DirectoryAssets::new(&assets_root));
        Self::with_assets(home, config, assets)
    }

    /// Like [`open`](Self::open), with a caller-supplied asset source.
    pub fn with_assets(
        home: &Path,
        config: &Config,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Self> {
        let storage = Storage::new(home.join("sessions"))
            .map_err(SessionError::from)?
            .with_busy_timeout(config.storage.busy_timeout());
        let sessions = SessionStore::new(storage, config.limits);
        let previews =
            PreviewBuilder::new(home.join("previews"), config.limits, &config.preview)?;
        let exports = ExportPackager::new(
            home.join("exports"),
            config.limits,
            &config.export,
            assets,
        )?;
        Ok(Self {
            sessions,
            previews,
            exports,
            assets_root: home.join("assets"),
            retention: config.export.retention(),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Starts a workspace from a template.
    pub fn initialize(
        &self,
        workspace: &WorkspaceId,
        template: Template,
        name: &str,
    ) -> Result<SpecSummary> {
        let spec = template
            .build(name)
            .map_err(|e| ServiceError::Session(e.into()))?;
        let spec = self.sessions.initialize(workspace, spec)?;
        Ok(SpecSummary::of(workspace, &spec))
    }

    /// Applies a batch of edits and reports the new version.
    pub fn handle_edit(&self, request: &EditRequest) -> Result<SpecSummary> {
        let workspace = &request.workspace_id;
        let spec = match request.expected_version {
            Some(expected) => self
                .sessions
                .commit_at(workspace, expected, &request.operations)?,
            None => self.sessions.commit(workspace, &request.operations)?,
        };
        Ok(SpecSummary::of(workspace, &spec))
    }

    /// Builds a preview of the current version, adapted for mobile if asked.
    pub fn preview(&self, request: &PreviewRequest) -> Result<PreviewHandle> {
        let spec = self.current(&request.workspace_id, request.mobile_profile.as_ref())?;
        Ok(self.previews.build_preview(&spec)?)
    }

    /// Queues an export of the current version. Returns without waiting.
    pub fn export(&self, request: &ExportRequest) -> Result<ExportJob> {
        let spec = self.current(&request.workspace_id, request.mobile_profile.as_ref())?;
        Ok(self.exports.start_export(spec, request.options)?)
    }

    pub fn poll(&self, job: Uuid) -> Result<ExportJob> {
        Ok(self.exports.poll_status(job)?)
    }

    pub fn wait(&self, job: Uuid, timeout: Duration) -> Result<ExportJob> {
        Ok(self.exports.wait(job, timeout)?)
    }

    pub fn cancel(&self, job: Uuid) -> Result<ExportJob> {
        Ok(self.exports.cancel(job)?)
    }

    /// Copies the assets under `dir` into the workspace's asset folder and
    /// registers the ones the specification does not know yet.
    ///
    /// Returns the new summary, or the current one when nothing was new.
    /// Files copied by a failed import are removed again.
    pub fn import_assets(&self, workspace: &WorkspaceId, dir: &Path) -> Result<SpecSummary> {
        let current = self.sessions.get_current(workspace)?;
        let mut copied = Vec::new();
        let imported = self
            .copy_new_assets(workspace, &current, dir, &mut copied)
            .and_then(|ops| {
                if ops.is_empty() {
                    return Ok(Arc::clone(&current));
                }
                log::info!("importing {} asset(s) into {workspace}", ops.len());
                Ok(self.sessions.commit(workspace, &ops)?)
            });

        match imported {
            Ok(spec) => Ok(SpecSummary::of(workspace, &spec)),
            Err(e) => {
                for path in &copied {
                    if let Err(remove) = fs::remove_file(path) {
                        log::warn!("failed to remove {}: {remove}", path.display());
                    }
                }
                Err(e)
            }
        }
    }

    /// Copies assets not yet registered into the workspace's asset folder.
    ///
    /// Files this call created are pushed onto `copied`, even on error.
    fn copy_new_assets(
        &self,
        workspace: &WorkspaceId,
        current: &GameSpecification,
        dir: &Path,
        copied: &mut Vec<PathBuf>,
    ) -> Result<Vec<EditOperation>> {
        let target = self.assets_root.join(workspace.as_str());
        let import_err = |source: io::Error| ServiceError::Import {
            path: dir.to_path_buf(),
            source,
        };

        let mut ops = Vec::new();
        for mut resource in DirectoryAssets::new(dir).discover() {
            if current.resource(&resource.name).is_some() {
                log::debug!("{} already registered, skipping", resource.name);
                continue;
            }
            let destination = target.join(&resource.file);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(import_err)?;
            }
            let fresh = !destination.exists();
            fs::copy(dir.join(&resource.file), &destination).map_err(import_err)?;
            if fresh {
                copied.push(destination);
            }
            resource.file = format!("{workspace}/{}", resource.file);
            ops.push(EditOperation::AddResource { resource });
        }
        Ok(ops)
    }

    /// Drops expired preview bundles and export artifacts.
    ///
    /// Returns how many bundles and artifacts were removed.
    pub fn sweep(&self) -> Result<(usize, usize)> {
        let previews = self.previews.cleanup_expired(Timestamp::now())?;
        let exports = self.exports.expire(self.retention)?;
        Ok((previews, exports))
    }

    fn current(
        &self,
        workspace: &WorkspaceId,
        profile: Option<&MobileProfile>,
    ) -> Result<Arc<GameSpecification>> {
        let spec = self.sessions.get_current(workspace)?;
        Ok(match profile {
            Some(profile) => Arc::new(mobile::transform(&spec, profile)),
            None => spec,
        })
    }
}
