//! Session store: versioned, durable specifications with one writer per workspace.
//!
//! Commits for a workspace run under that workspace's writer lock, so two
//! batches never interleave. Different workspaces never contend. Readers go
//! through a cached `Arc` and never take the writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;
use parking_lot::{Mutex, RwLock};

use crate::edit::{self, EditError};
use crate::model::{
    EditOperation, GameSpecification, HistoryEntry, SessionRecord, SessionStatus, SessionSummary,
    WorkspaceId,
};
use crate::storage::{Storage, StorageError};
use crate::validate::{self, Limits, ValidationError, ValidationResult};

pub type Result<T> = std::result::Result<T, SessionError>;

/// The caller's version token no longer matches the stored version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("workspace '{workspace}' is at version {actual}, not {expected}")]
pub struct ConflictError {
    pub workspace: WorkspaceId,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session for workspace '{0}'")]
    NotFound(WorkspaceId),

    #[error("workspace '{0}' already has a session")]
    AlreadyExists(WorkspaceId),

    #[error("workspace '{0}' is archived; restore it before editing")]
    Archived(WorkspaceId),

    #[error("the initial specification is invalid: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidSpec(Vec<ValidationError>),

    #[error("a mobile-derived specification cannot be stored")]
    DerivedSpec,

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("workspace '{workspace}' has no retained version {version}")]
    UnknownVersion { workspace: WorkspaceId, version: u64 },

    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::SessionNotFound(ws) => Self::NotFound(ws),
            StorageError::SessionAlreadyExists(ws) => Self::AlreadyExists(ws),
            StorageError::VersionConflict {
                workspace,
                expected,
                found,
            } => Self::Conflict(ConflictError {
                workspace,
                expected,
                actual: found,
            }),
            other => {
                log::error!("session storage fault: {other}");
                Self::Storage(other)
            }
        }
    }
}

/// Per-workspace serialization point plus the last version this process saw.
#[derive(Default)]
struct Lane {
    writer: Mutex<()>,
    current: RwLock<Option<Arc<GameSpecification>>>,
}

pub struct SessionStore {
    storage: Storage,
    limits: Limits,
    lanes: Mutex<HashMap<WorkspaceId, Arc<Lane>>>,
}

impl SessionStore {
    pub fn new(storage: Storage, limits: Limits) -> Self {
        Self {
            storage,
            limits,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn lane(&self, workspace: &WorkspaceId) -> Arc<Lane> {
        let mut lanes = self.lanes.lock();
        Arc::clone(lanes.entry(workspace.clone()).or_default())
    }

    /// Forgets a workspace's lane once `lane` is its last outside holder.
    ///
    /// Clones are only handed out under the map lock, so the count cannot
    /// grow while it is checked.
    fn release_lane(&self, workspace: &WorkspaceId, lane: Arc<Lane>) {
        let mut lanes = self.lanes.lock();
        if Arc::strong_count(&lane) == 2
            && lanes
                .get(workspace)
                .is_some_and(|held| Arc::ptr_eq(held, &lane))
        {
            lanes.remove(workspace);
        }
    }

    /// Creates the session for a workspace from an initial specification.
    pub fn initialize(
        &self,
        workspace: &WorkspaceId,
        spec: GameSpecification,
    ) -> Result<Arc<GameSpecification>> {
        if spec.is_derived() {
            return Err(SessionError::DerivedSpec);
        }
        if let ValidationResult::Invalid(errors) = validate::validate(&spec, &self.limits) {
            return Err(SessionError::InvalidSpec(errors));
        }

        let lane = self.lane(workspace);
        let created = {
            let _writer = lane.writer.lock();
            self.storage
                .create_session(workspace, &spec, Timestamp::now())
        };
        if let Err(e) = created {
            self.release_lane(workspace, lane);
            return Err(e.into());
        }

        let spec = Arc::new(spec);
        *lane.current.write() = Some(Arc::clone(&spec));
        log::info!(
            "initialized {workspace} at version {} ({})",
            spec.version(),
            spec.properties().name
        );
        Ok(spec)
    }

    /// The latest committed specification.
    pub fn get_current(&self, workspace: &WorkspaceId) -> Result<Arc<GameSpecification>> {
        let stored = self.storage.load_version(workspace)?;
        let lane = self.lane(workspace);
        self.current_at(&lane, workspace, stored)
    }

    /// Returns the cached value when it matches `version`, else reloads it.
    fn current_at(
        &self,
        lane: &Lane,
        workspace: &WorkspaceId,
        version: u64,
    ) -> Result<Arc<GameSpecification>> {
        if let Some(cached) = lane.current.read().as_ref()
            && cached.version() == version
        {
            return Ok(Arc::clone(cached));
        }

        let loaded = Arc::new(self.storage.load_current(workspace)?);
        log::debug!("loaded {workspace} version {} from disk", loaded.version());
        *lane.current.write() = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Applies a batch to the current version and stores the result.
    pub fn commit(
        &self,
        workspace: &WorkspaceId,
        ops: &[EditOperation],
    ) -> Result<Arc<GameSpecification>> {
        self.commit_inner(workspace, None, ops)
    }

    /// Like [`commit`](Self::commit), but only if the current version is `expected`.
    pub fn commit_at(
        &self,
        workspace: &WorkspaceId,
        expected: u64,
        ops: &[EditOperation],
    ) -> Result<Arc<GameSpecification>> {
        self.commit_inner(workspace, Some(expected), ops)
    }

    fn commit_inner(
        &self,
        workspace: &WorkspaceId,
        expected: Option<u64>,
        ops: &[EditOperation],
    ) -> Result<Arc<GameSpecification>> {
        let lane = self.lane(workspace);
        let _writer = lane.writer.lock();

        let summary = self.storage.load_summary(workspace)?;
        if summary.status == SessionStatus::Archived {
            return Err(SessionError::Archived(workspace.clone()));
        }
        if let Some(expected) = expected
            && expected != summary.version
        {
            log::warn!(
                "stale version token for {workspace}: {expected}, stored {}",
                summary.version
            );
            return Err(ConflictError {
                workspace: workspace.clone(),
                expected,
                actual: summary.version,
            }
            .into());
        }

        let base = self.current_at(&lane, workspace, summary.version)?;
        let next = edit::apply(&base, ops, &self.limits)?;

        if let Err(e) =
            self.storage
                .record_commit(workspace, base.version(), &next, ops, Timestamp::now())
        {
            if matches!(e, StorageError::VersionConflict { .. }) {
                log::warn!("{e}");
            }
            return Err(e.into());
        }

        let next = Arc::new(next);
        *lane.current.write() = Some(Arc::clone(&next));
        log::info!(
            "committed {} operation(s) to {workspace}: version {}",
            ops.len(),
            next.version()
        );
        Ok(next)
    }

    /// Retained history, oldest first.
    pub fn get_history(&self, workspace: &WorkspaceId) -> Result<Vec<HistoryEntry>> {
        Ok(self.storage.load_history(workspace)?)
    }

    /// Everything needed to resume a session after a reconnect.
    pub fn load_record(&self, workspace: &WorkspaceId) -> Result<SessionRecord> {
        let summary = self.storage.load_summary(workspace)?;
        Ok(SessionRecord {
            workspace_id: summary.workspace_id,
            status: summary.status,
            created_at: summary.created_at,
            current_version: self.get_current(workspace)?,
            history: self.get_history(workspace)?,
        })
    }

    /// Reconstructs a past version by replaying history from the stored base.
    pub fn spec_at(&self, workspace: &WorkspaceId, version: u64) -> Result<GameSpecification> {
        let base = self.storage.load_base(workspace)?;
        let history = self.storage.load_history(workspace)?;
        replay(workspace, base, &history, version)
    }

    /// Keeps the newest `keep` history entries and folds older ones into the base.
    ///
    /// Returns the number of entries dropped.
    pub fn compact(&self, workspace: &WorkspaceId, keep: usize) -> Result<usize> {
        let lane = self.lane(workspace);
        let _writer = lane.writer.lock();

        let history = self.storage.load_history(workspace)?;
        let Some(dropped) = history.len().checked_sub(keep).filter(|&n| n > 0) else {
            return Ok(0);
        };
        let new_base_version = history[dropped - 1].version;

        let base = self.storage.load_base(workspace)?;
        let new_base = replay(workspace, base, &history, new_base_version)?;
        let removed = self.storage.rebase(workspace, &new_base)?;
        log::info!("compacted {workspace}: dropped {removed} history entries");
        Ok(removed)
    }

    /// Freezes a session. It stays readable.
    ///
    /// The workspace's lane and cached version are dropped; a restore
    /// starts a fresh one.
    pub fn archive(&self, workspace: &WorkspaceId) -> Result<()> {
        let lane = self.lane(workspace);
        let archived = self.set_status(&lane, workspace, SessionStatus::Archived);
        self.release_lane(workspace, lane);
        archived
    }

    pub fn restore(&self, workspace: &WorkspaceId) -> Result<()> {
        let lane = self.lane(workspace);
        self.set_status(&lane, workspace, SessionStatus::Active)
    }

    fn set_status(&self, lane: &Lane, workspace: &WorkspaceId, status: SessionStatus) -> Result<()> {
        let _writer = lane.writer.lock();
        self.storage.set_status(workspace, status)?;
        log::info!("{workspace} is now {}", status.as_str());
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.storage.list_sessions()?)
    }
}

/// Replays `history` onto `base` up to and including `version`.
///
/// Ceilings are not enforced: every entry was valid under the limits in force
/// when it was committed.
fn replay(
    workspace: &WorkspaceId,
    base: GameSpecification,
    history: &[HistoryEntry],
    version: u64,
) -> Result<GameSpecification> {
    let latest = history.last().map_or(base.version(), |e| e.version);
    if version < base.version() || version > latest {
        return Err(SessionError::UnknownVersion {
            workspace: workspace.clone(),
            version,
        });
    }

    let mut spec = base;
    for entry in history.iter().filter(|e| e.version <= version) {
        if entry.version <= spec.version() {
            continue;
        }
        spec = edit::apply(&spec, &entry.operations, &Limits::unbounded()).map_err(|e| {
            SessionError::Storage(StorageError::Corrupt(format!(
                "history entry {} does not replay: {e}",
                entry.version
            )))
        })?;
        if spec.version() != entry.version {
            return Err(SessionError::Storage(StorageError::Corrupt(format!(
                "history entry {} replays to version {}",
                entry.version,
                spec.version()
            ))));
        }
    }
    Ok(spec)
}
