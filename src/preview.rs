//! Preview builder: renders a specification into a runnable bundle on disk.
//!
//! Bundles are content-addressed directories (`<root>/<sha256>/`) holding
//! `index.html` and `game.json`. Builds run on their own thread and are bounded
//! by a timeout; a build that outlives it abandons its staging directory.
//! Handles are cached per `(spec id, version, overlay)`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{RecvTimeoutError, bounded};
use jiff::Timestamp;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::PreviewConfig;
use crate::model::{GameSpecification, MobileProfile};
use crate::project::{self, BundleFile};
use crate::validate::{self, Limits, ValidationError, ValidationResult};

pub type Result<T> = std::result::Result<T, PreviewError>;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    /// Retryable.
    #[error("preview build did not finish within {0:?}")]
    Timeout(Duration),

    /// A specification that passed validation could not be rendered.
    #[error("specification could not be serialized: {0}")]
    SerializationFailed(String),

    #[error("specification is invalid: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    ValidationFailed(Vec<ValidationError>),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("the preview build thread stopped unexpectedly")]
    WorkerLost,
}

/// Where to load a built preview from, and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewHandle {
    pub bundle_id: String,
    pub url: String,
    pub expires_at: Timestamp,
    pub path: PathBuf,
}

type CacheKey = (Uuid, u64, Option<MobileProfile>);

pub struct PreviewBuilder {
    root: PathBuf,
    limits: Limits,
    timeout: Duration,
    ttl: Duration,
    base_url: String,
    cache: Mutex<HashMap<CacheKey, PreviewHandle>>,
}

impl PreviewBuilder {
    /// Creates a builder writing bundles under `root`, created if missing.
    pub fn new(root: impl Into<PathBuf>, limits: Limits, config: &PreviewConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            limits,
            timeout: config.timeout(),
            ttl: config.ttl(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates, renders, and writes a preview bundle for `spec`.
    ///
    /// Repeated calls for the same version and overlay return the cached
    /// handle while it is live.
    pub fn build_preview(&self, spec: &Arc<GameSpecification>) -> Result<PreviewHandle> {
        if let ValidationResult::Invalid(errors) = validate::validate(spec, &self.limits) {
            return Err(PreviewError::ValidationFailed(errors));
        }

        let key = (spec.id(), spec.version(), spec.overlay().copied());
        let now = Timestamp::now();
        if let Some(handle) = self.cache.lock().get(&key)
            && handle.expires_at > now
            && handle.path.is_dir()
        {
            log::debug!("preview cache hit for {} v{}", key.0, key.1);
            return Ok(handle.clone());
        }

        let bundle_id = self.build_bounded(spec)?;
        let handle = PreviewHandle {
            url: format!("{}/{bundle_id}/index.html", self.base_url),
            path: self.root.join(&bundle_id),
            expires_at: now.checked_add(self.ttl).unwrap_or(Timestamp::MAX),
            bundle_id,
        };
        log::info!(
            "built preview {} for {} v{}",
            handle.bundle_id,
            spec.properties().name,
            spec.version()
        );
        self.cache.lock().insert(key, handle.clone());
        Ok(handle)
    }

    /// Runs the build on its own thread and waits at most `timeout`.
    fn build_bounded(&self, spec: &Arc<GameSpecification>) -> Result<String> {
        let (tx, rx) = bounded(1);
        let spec = Arc::clone(spec);
        let root = self.root.clone();
        let deadline = Instant::now() + self.timeout;

        thread::Builder::new()
            .name("gamewright-preview".into())
            .spawn(move || {
                let result = write_bundle(&root, &spec, deadline);
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(Err(PreviewError::Timeout(_))) => Err(PreviewError::Timeout(self.timeout)),
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("preview build timed out after {:?}", self.timeout);
                Err(PreviewError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PreviewError::WorkerLost),
        }
    }

    /// Forgets expired handles and deletes bundles nothing live points at.
    ///
    /// Bundles left by earlier processes are judged by modification time.
    /// Returns the number of directories removed.
    pub fn cleanup_expired(&self, now: Timestamp) -> Result<usize> {
        let live: Vec<String> = {
            let mut cache = self.cache.lock();
            cache.retain(|_, h| h.expires_at > now);
            cache.values().map(|h| h.bundle_id.clone()).collect()
        };

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&name) || !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if self.outlived(modified, now) {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("removed {removed} expired preview bundle(s)");
        }
        Ok(removed)
    }

    fn outlived(&self, modified: SystemTime, now: Timestamp) -> bool {
        let Ok(modified) = Timestamp::try_from(modified) else {
            return true;
        };
        modified
            .checked_add(self.ttl)
            .is_ok_and(|expiry| expiry <= now)
    }
}

/// Renders and writes a bundle, returning its content digest.
fn write_bundle(root: &Path, spec: &GameSpecification, deadline: Instant) -> Result<String> {
    let files = project::bundle_files(spec).map_err(|e| {
        log::error!(
            "preview serialization failed for {} v{}: {e}",
            spec.id(),
            spec.version()
        );
        PreviewError::SerializationFailed(e.to_string())
    })?;

    let bundle_id = digest(&files);
    let target = root.join(&bundle_id);
    if target.is_dir() {
        return Ok(bundle_id);
    }

    let staging = root.join(format!(".staging-{}", Uuid::new_v4()));
    let written = stage(&staging, &files, deadline).and_then(|()| {
        match fs::rename(&staging, &target) {
            // Another build of identical content won the race.
            Err(_) if target.is_dir() => Ok(()),
            other => other.map_err(PreviewError::from),
        }
    });
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    written.map(|()| bundle_id)
}

fn stage(dir: &Path, files: &[BundleFile], deadline: Instant) -> Result<()> {
    fs::create_dir_all(dir)?;
    for file in files {
        if Instant::now() >= deadline {
            return Err(PreviewError::Timeout(Duration::ZERO));
        }
        fs::write(dir.join(&file.path), &file.bytes)?;
    }
    Ok(())
}

/// SHA-256 over every path and its contents, hex-encoded.
fn digest(files: &[BundleFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update((file.bytes.len() as u64).to_le_bytes());
        hasher.update(&file.bytes);
    }
    hex::encode(hasher.finalize())
}
