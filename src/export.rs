//! Export packager: asynchronous packaging of a pinned specification version.
//!
//! Jobs go through a fixed pool of worker threads fed by a channel. Each job
//! runs three stages (render, assets, write), each with its own time budget.
//! Output is staged beside the export root and only moved into place once it
//! is complete, so a failed job never leaves an artifact behind.

mod archive;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use jiff::Timestamp;
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::assets::AssetSource;
use crate::config::ExportConfig;
use crate::model::{
    ExportFormat, ExportJob, ExportManifest, ExportOptions, ExportStage, ExportStatus,
    FailureReason, GameSpecification, ManifestAsset, ManifestFile,
};
use crate::project::{self, BundleFile};
use crate::validate::{self, Limits, ValidationError, ValidationResult};

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("specification is invalid: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    ValidationFailed(Vec<ValidationError>),

    #[error("no export job {0}")]
    UnknownJob(Uuid),

    #[error("the export packager is shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

const MANIFEST: &str = "manifest.json";
const STAGING_PREFIX: &str = ".staging-";

/// Stop request shared between the job table and the worker running the job.
#[derive(Debug, Default)]
struct StopFlag(AtomicU8);

impl StopFlag {
    const NONE: u8 = 0;
    const CANCELLED: u8 = 1;
    const EXPIRED: u8 = 2;

    fn raise(&self, reason: &FailureReason) {
        let code = match reason {
            FailureReason::Expired => Self::EXPIRED,
            _ => Self::CANCELLED,
        };
        let _ = self
            .0
            .compare_exchange(Self::NONE, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn reason(&self) -> Option<FailureReason> {
        match self.0.load(Ordering::SeqCst) {
            Self::CANCELLED => Some(FailureReason::Cancelled),
            Self::EXPIRED => Some(FailureReason::Expired),
            _ => None,
        }
    }
}

struct JobSlot {
    job: ExportJob,
    stop: Arc<StopFlag>,
}

struct Task {
    id: Uuid,
    spec: Arc<GameSpecification>,
    stop: Arc<StopFlag>,
}

struct Shared {
    root: PathBuf,
    assets: Arc<dyn AssetSource>,
    stage_timeout: Duration,
    max_artifact_bytes: u64,
    jobs: Mutex<HashMap<Uuid, JobSlot>>,
    changed: Condvar,
}

pub struct ExportPackager {
    shared: Arc<Shared>,
    limits: Limits,
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ExportPackager {
    /// Starts the worker pool. Artifacts are written under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        limits: Limits,
        config: &ExportConfig,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let shared = Arc::new(Shared {
            root,
            assets,
            stage_timeout: config.stage_timeout(),
            max_artifact_bytes: config.max_artifact_bytes,
            jobs: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
        });

        let (tx, rx) = unbounded::<Task>();
        let count = config.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for worker_id in 0..count {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("gamewright-export-{worker_id}"))
                .spawn(move || work(worker_id, &shared, &rx))?;
            workers.push(handle);
        }
        log::debug!("export pool started with {count} worker(s)");

        Ok(Self {
            shared,
            limits,
            sender: Some(tx),
            workers,
        })
    }

    /// Validates `spec` and queues a job for it. Returns without waiting.
    ///
    /// The job is pinned to `spec`'s version; later commits do not affect it.
    pub fn start_export(
        &self,
        spec: Arc<GameSpecification>,
        options: ExportOptions,
    ) -> Result<ExportJob> {
        if let ValidationResult::Invalid(errors) = validate::validate(&spec, &self.limits) {
            return Err(ExportError::ValidationFailed(errors));
        }
        let sender = self.sender.as_ref().ok_or(ExportError::ShuttingDown)?;

        let job = ExportJob::queued(spec.id(), spec.version(), options, Timestamp::now());
        let stop = Arc::new(StopFlag::default());
        self.shared.jobs.lock().insert(
            job.id,
            JobSlot {
                job: job.clone(),
                stop: Arc::clone(&stop),
            },
        );

        let task = Task {
            id: job.id,
            spec,
            stop,
        };
        if sender.send(task).is_err() {
            self.shared.jobs.lock().remove(&job.id);
            return Err(ExportError::ShuttingDown);
        }
        log::info!(
            "queued export {} of {} v{} ({:?}, {})",
            job.id,
            job.spec_id,
            job.session_version,
            job.format,
            job.compression_level.as_str()
        );
        Ok(job)
    }

    pub fn poll_status(&self, id: Uuid) -> Result<ExportJob> {
        self.shared
            .jobs
            .lock()
            .get(&id)
            .map(|slot| slot.job.clone())
            .ok_or(ExportError::UnknownJob(id))
    }

    /// Cancels a job. Queued jobs fail at once; running jobs fail at their
    /// next checkpoint. Finished jobs are left as they are.
    pub fn cancel(&self, id: Uuid) -> Result<ExportJob> {
        let mut jobs = self.shared.jobs.lock();
        let slot = jobs.get_mut(&id).ok_or(ExportError::UnknownJob(id))?;
        stop_job(slot, FailureReason::Cancelled);
        self.shared.changed.notify_all();
        Ok(slot.job.clone())
    }

    /// Blocks until the job is terminal or `timeout` passes, then returns it.
    pub fn wait(&self, id: Uuid, timeout: Duration) -> Result<ExportJob> {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.shared.jobs.lock();
        loop {
            let job = &jobs.get(&id).ok_or(ExportError::UnknownJob(id))?.job;
            if job.status.is_terminal() {
                return Ok(job.clone());
            }
            if self
                .shared
                .changed
                .wait_until(&mut jobs, deadline)
                .timed_out()
            {
                return jobs
                    .get(&id)
                    .map(|slot| slot.job.clone())
                    .ok_or(ExportError::UnknownJob(id));
            }
        }
    }

    /// Applies the retention window.
    ///
    /// Unfinished jobs older than `max_age` fail as expired. Finished jobs
    /// older than `max_age` are forgotten and their artifacts deleted, as are
    /// stray artifacts left by earlier processes. Returns the number of
    /// artifacts removed.
    pub fn expire(&self, max_age: Duration) -> Result<usize> {
        let now = Timestamp::now();
        let cutoff = now.checked_sub(max_age).unwrap_or(Timestamp::MIN);

        let mut doomed = Vec::new();
        let known: Vec<Uuid> = {
            let mut jobs = self.shared.jobs.lock();
            for slot in jobs.values_mut() {
                if !slot.job.status.is_terminal() && slot.job.created_at <= cutoff {
                    stop_job(slot, FailureReason::Expired);
                }
            }
            jobs.retain(|_, slot| {
                let old = slot.job.finished_at.is_some_and(|at| at <= cutoff);
                if old && let Some(location) = slot.job.artifact_location.take() {
                    doomed.push(location);
                }
                !old
            });
            self.shared.changed.notify_all();
            jobs.keys().copied().collect()
        };

        let mut removed = 0;
        for location in doomed {
            if remove_path(&location)? {
                removed += 1;
            }
        }

        for entry in fs::read_dir(&self.shared.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let artifact = name.strip_prefix(STAGING_PREFIX).unwrap_or(&name);
            let belongs_to_live_job = known
                .iter()
                .any(|id| artifact.starts_with(&id.to_string()));
            if belongs_to_live_job {
                continue;
            }
            let modified = Timestamp::try_from(entry.metadata()?.modified()?).unwrap_or(Timestamp::MIN);
            if modified <= cutoff && remove_path(&entry.path())? {
                removed += 1;
            }
        }

        if removed > 0 {
            log::info!("expired {removed} export artifact(s)");
        }
        Ok(removed)
    }
}

impl Drop for ExportPackager {
    fn drop(&mut self) {
        {
            let mut jobs = self.shared.jobs.lock();
            for slot in jobs.values_mut() {
                stop_job(slot, FailureReason::Cancelled);
            }
            self.shared.changed.notify_all();
        }
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("export worker panicked during shutdown");
            }
        }
    }
}

/// Marks a job stopped. A queued job fails immediately with `reason`.
fn stop_job(slot: &mut JobSlot, reason: FailureReason) {
    match slot.job.status {
        ExportStatus::Queued => {
            slot.stop.raise(&reason);
            log::warn!("export {} stopped before it ran: {reason}", slot.job.id);
            slot.job.fail(reason, Timestamp::now());
        }
        ExportStatus::Running => {
            log::warn!("stopping export {}: {reason}", slot.job.id);
            slot.stop.raise(&reason);
        }
        ExportStatus::Completed | ExportStatus::Failed => {}
    }
}

fn remove_path(path: &Path) -> io::Result<bool> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Worker loop: run tasks until the channel closes.
fn work(worker_id: usize, shared: &Shared, rx: &Receiver<Task>) {
    log::trace!("export worker {worker_id} started");
    while let Ok(task) = rx.recv() {
        run(shared, &task);
    }
    log::trace!("export worker {worker_id} stopped");
}

fn run(shared: &Shared, task: &Task) {
    let options = {
        let mut jobs = shared.jobs.lock();
        let Some(slot) = jobs.get_mut(&task.id) else {
            return;
        };
        if !slot.job.start(Timestamp::now()) {
            return;
        }
        shared.changed.notify_all();
        slot.job.options()
    };
    log::info!("export {} running", task.id);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| package(shared, task, options)))
        .unwrap_or(Err(FailureReason::WorkerLost));

    let mut jobs = shared.jobs.lock();
    let Some(slot) = jobs.get_mut(&task.id) else {
        return;
    };
    let now = Timestamp::now();
    match (outcome, task.stop.reason()) {
        (Ok((location, bytes)), None) => {
            log::info!("export {} completed: {} ({bytes} bytes)", task.id, location.display());
            slot.job.complete(location, bytes, now);
        }
        (Ok((location, _)), Some(reason)) => {
            let _ = remove_path(&location);
            slot.job.fail(reason, now);
        }
        (Err(reason), _) => {
            if matches!(reason, FailureReason::Serialization { .. }) {
                log::error!("export {} failed: {reason}", task.id);
            } else {
                log::warn!("export {} failed: {reason}", task.id);
            }
            slot.job.fail(reason, now);
        }
    }
    shared.changed.notify_all();
}

/// Budget and stop checks for one stage.
struct Checkpoint<'a> {
    stage: ExportStage,
    deadline: Instant,
    stop: &'a StopFlag,
}

impl<'a> Checkpoint<'a> {
    fn begin(stage: ExportStage, budget: Duration, stop: &'a StopFlag) -> Self {
        Self {
            stage,
            deadline: Instant::now() + budget,
            stop,
        }
    }

    fn check(&self) -> std::result::Result<(), FailureReason> {
        if let Some(reason) = self.stop.reason() {
            return Err(reason);
        }
        if Instant::now() >= self.deadline {
            return Err(FailureReason::TimedOut { stage: self.stage });
        }
        Ok(())
    }
}

/// Produces the artifact and returns its location and size.
fn package(
    shared: &Shared,
    task: &Task,
    options: ExportOptions,
) -> std::result::Result<(PathBuf, u64), FailureReason> {
    let spec = &task.spec;

    let render = Checkpoint::begin(ExportStage::Render, shared.stage_timeout, &task.stop);
    render.check()?;
    let mut files = project::bundle_files(spec).map_err(|e| FailureReason::Serialization {
        reason: e.to_string(),
    })?;
    render.check()?;

    let mut assets = Vec::new();
    if options.include_assets {
        let fetch = Checkpoint::begin(ExportStage::Assets, shared.stage_timeout, &task.stop);
        // Resources sharing a file are bundled once.
        let mut bundled = HashSet::new();
        for resource in spec.resources() {
            fetch.check()?;
            let path = project::asset_path(resource);
            if bundled.insert(path.clone()) {
                let bytes =
                    shared
                        .assets
                        .load(resource)
                        .map_err(|e| FailureReason::AssetFailed {
                            resource: resource.name.clone(),
                            reason: e.to_string(),
                        })?;
                files.push(BundleFile {
                    path: path.clone(),
                    bytes,
                });
            }
            assets.push(ManifestAsset {
                name: resource.name.clone(),
                kind: resource.kind,
                path,
            });
        }
        fetch.check()?;
    }

    let write = Checkpoint::begin(ExportStage::Write, shared.stage_timeout, &task.stop);
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let manifest = ExportManifest {
        spec_id: spec.id(),
        version: spec.version(),
        name: spec.properties().name.clone(),
        format: options.format,
        compression_level: options.compression_level,
        files: files.iter().map(manifest_entry).collect(),
        assets,
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).map_err(|e| FailureReason::Serialization {
            reason: e.to_string(),
        })?;
    files.insert(
        0,
        BundleFile {
            path: MANIFEST.into(),
            bytes: manifest_bytes,
        },
    );
    write.check()?;

    let name = match options.format {
        ExportFormat::Archive => format!(
            "{}.{}",
            task.id,
            archive::archive_extension(options.compression_level)
        ),
        ExportFormat::Directory => task.id.to_string(),
    };
    let staging = shared.root.join(format!("{STAGING_PREFIX}{name}"));
    let target = shared.root.join(&name);

    let written = write_staged(&staging, &files, options, shared.max_artifact_bytes)
        .and_then(|bytes| {
            write.check()?;
            fs::rename(&staging, &target).map_err(io_failure)?;
            Ok(bytes)
        });
    if written.is_err() {
        let _ = remove_path(&staging);
    }
    Ok((target, written?))
}

fn write_staged(
    staging: &Path,
    files: &[BundleFile],
    options: ExportOptions,
    limit: u64,
) -> std::result::Result<u64, FailureReason> {
    let bytes = match options.format {
        ExportFormat::Archive => archive::write_archive(staging, files, options.compression_level),
        ExportFormat::Directory => archive::write_directory(staging, files),
    }
    .map_err(io_failure)?;

    if bytes > limit {
        return Err(FailureReason::TooLarge { bytes, limit });
    }
    Ok(bytes)
}

fn io_failure(e: io::Error) -> FailureReason {
    FailureReason::Io {
        reason: e.to_string(),
    }
}

fn manifest_entry(file: &BundleFile) -> ManifestFile {
    ManifestFile {
        path: file.path.clone(),
        bytes: file.bytes.len() as u64,
        sha256: hex::encode(Sha256::digest(&file.bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::assets::{AssetError, MemoryAssets};
    use crate::edit;
    use crate::model::{CompressionLevel, EditOperation, ObjectKind, Resource, ResourceKind};

    const WAIT: Duration = Duration::from_secs(30);

    fn packager(dir: &TempDir, assets: MemoryAssets, config: &ExportConfig) -> ExportPackager {
        packager_with(dir, Arc::new(assets), config)
    }

    fn packager_with(
        dir: &TempDir,
        assets: Arc<dyn AssetSource>,
        config: &ExportConfig,
    ) -> ExportPackager {
        ExportPackager::new(dir.path().join("exports"), Limits::default(), config, assets)
            .unwrap()
    }

    fn leftovers(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path().join("exports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Holds every load until the test lets it through.
    struct GatedAssets {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl AssetSource for GatedAssets {
        fn load(&self, _resource: &Resource) -> std::result::Result<Vec<u8>, AssetError> {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(WAIT);
            Ok(b"pixels".to_vec())
        }
    }

    fn gated() -> (Arc<GatedAssets>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let assets = Arc::new(GatedAssets {
            entered: entered_tx,
            release: release_rx,
        });
        (assets, entered_rx, release_tx)
    }

    struct SlowAssets(Duration);

    impl AssetSource for SlowAssets {
        fn load(&self, _resource: &Resource) -> std::result::Result<Vec<u8>, AssetError> {
            thread::sleep(self.0);
            Ok(b"pixels".to_vec())
        }
    }

    struct PanickingAssets;

    impl AssetSource for PanickingAssets {
        fn load(&self, resource: &Resource) -> std::result::Result<Vec<u8>, AssetError> {
            panic!("asset store blew up loading {}", resource.name);
        }
    }

    fn empty_scene() -> Arc<GameSpecification> {
        Arc::new(
            edit::apply(
                &GameSpecification::new("Empty Level"),
                &[EditOperation::add_scene("Level1")],
                &Limits::default(),
            )
            .unwrap(),
        )
    }

    fn with_hero() -> Arc<GameSpecification> {
        Arc::new(
            edit::apply(
                &empty_scene(),
                &[
                    EditOperation::AddResource {
                        resource: Resource {
                            name: "hero".into(),
                            kind: ResourceKind::Image,
                            file: "hero.png".into(),
                        },
                    },
                    EditOperation::add_object("Level1", "Player", ObjectKind::Sprite),
                    EditOperation::set_property("Level1", "Player", "image", "hero"),
                ],
                &Limits::default(),
            )
            .unwrap(),
        )
    }

    fn hero_assets() -> MemoryAssets {
        let mut assets = MemoryAssets::default();
        assets.files.insert("hero.png".into(), b"pixels".to_vec());
        assets
    }

    fn options(format: ExportFormat, compression_level: CompressionLevel) -> ExportOptions {
        ExportOptions {
            format,
            include_assets: true,
            compression_level,
        }
    }

    #[test]
    fn maximum_compression_of_empty_scene_has_no_assets() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());

        let queued = exports
            .start_export(
                empty_scene(),
                options(ExportFormat::Archive, CompressionLevel::Maximum),
            )
            .unwrap();
        assert_eq!(queued.status, ExportStatus::Queued);

        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Completed, "{:?}", job.failure);
        let location = job.artifact_location.unwrap();
        assert!(location.to_string_lossy().ends_with(".tar.zst"));

        let entries = archive::read_archive(&location).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, [MANIFEST, "game.json", "index.html"]);

        let manifest: ExportManifest = serde_json::from_slice(&entries[0].bytes).unwrap();
        assert!(manifest.assets.is_empty());
        assert_eq!(manifest.compression_level, CompressionLevel::Maximum);
        assert_eq!(manifest.version, 1);
    }

    #[test]
    fn assets_are_bundled_and_listed() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, hero_assets(), &ExportConfig::default());

        let queued = exports
            .start_export(
                with_hero(),
                options(ExportFormat::Directory, CompressionLevel::None),
            )
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Completed, "{:?}", job.failure);

        let root = job.artifact_location.unwrap();
        assert_eq!(fs::read(root.join("assets/hero.png")).unwrap(), b"pixels");
        let manifest: ExportManifest =
            serde_json::from_slice(&fs::read(root.join(MANIFEST)).unwrap()).unwrap();
        assert_eq!(manifest.assets.len(), 1);
        assert!(manifest.files.iter().any(|f| f.path == "assets/hero.png"));
    }

    #[test]
    fn missing_asset_fails_the_whole_job() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());

        let queued = exports
            .start_export(with_hero(), ExportOptions::default())
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();

        assert_eq!(job.status, ExportStatus::Failed);
        assert!(matches!(job.failure, Some(FailureReason::AssetFailed { .. })));
        assert!(job.artifact_location.is_none());
        assert!(leftovers(&dir).is_empty());
    }

    #[test]
    fn cancelling_a_running_job_stops_it_at_the_next_checkpoint() {
        let dir = TempDir::new().unwrap();
        let (assets, entered, release) = gated();
        let exports = packager_with(&dir, assets, &ExportConfig::default());

        let queued = exports
            .start_export(with_hero(), ExportOptions::default())
            .unwrap();
        entered.recv_timeout(WAIT).unwrap();
        assert_eq!(exports.poll_status(queued.id).unwrap().status, ExportStatus::Running);

        let cancelled = exports.cancel(queued.id).unwrap();
        assert_eq!(cancelled.status, ExportStatus::Running);
        release.send(()).unwrap();

        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Failed);
        assert_eq!(job.failure, Some(FailureReason::Cancelled));
        assert!(job.started_at.is_some());
        assert!(job.artifact_location.is_none());
        assert!(leftovers(&dir).is_empty());
    }

    #[test]
    fn slow_stage_times_out() {
        let dir = TempDir::new().unwrap();
        let config = ExportConfig {
            stage_timeout_secs: 1,
            ..ExportConfig::default()
        };
        let assets = Arc::new(SlowAssets(Duration::from_millis(1200)));
        let exports = packager_with(&dir, assets, &config);

        let queued = exports
            .start_export(with_hero(), ExportOptions::default())
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();

        assert_eq!(job.status, ExportStatus::Failed);
        assert_eq!(
            job.failure,
            Some(FailureReason::TimedOut {
                stage: ExportStage::Assets
            })
        );
        assert!(leftovers(&dir).is_empty());
    }

    #[test]
    fn panicking_job_is_reported_and_the_pool_survives() {
        let dir = TempDir::new().unwrap();
        let config = ExportConfig {
            workers: 1,
            ..ExportConfig::default()
        };
        let exports = packager_with(&dir, Arc::new(PanickingAssets), &config);

        let queued = exports
            .start_export(with_hero(), ExportOptions::default())
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Failed);
        assert_eq!(job.failure, Some(FailureReason::WorkerLost));

        let queued = exports
            .start_export(
                with_hero(),
                ExportOptions {
                    include_assets: false,
                    ..ExportOptions::default()
                },
            )
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Completed, "{:?}", job.failure);
    }

    #[test]
    fn shared_asset_file_is_bundled_once() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, hero_assets(), &ExportConfig::default());
        let spec = Arc::new(
            edit::apply(
                &with_hero(),
                &[EditOperation::AddResource {
                    resource: Resource {
                        name: "hero_alt".into(),
                        kind: ResourceKind::Image,
                        file: "./hero.png".into(),
                    },
                }],
                &Limits::default(),
            )
            .unwrap(),
        );

        let queued = exports
            .start_export(spec, options(ExportFormat::Archive, CompressionLevel::None))
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();
        assert_eq!(job.status, ExportStatus::Completed, "{:?}", job.failure);

        let entries = archive::read_archive(&job.artifact_location.unwrap()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, [MANIFEST, "assets/hero.png", "game.json", "index.html"]);

        let manifest: ExportManifest = serde_json::from_slice(&entries[0].bytes).unwrap();
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.assets.len(), 2);
        assert!(manifest.assets.iter().all(|a| a.path == "assets/hero.png"));
    }

    #[test]
    fn expire_spares_a_running_jobs_staging_output() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());
        let mut running =
            ExportJob::queued(Uuid::new_v4(), 1, ExportOptions::default(), Timestamp::now());
        running.start(Timestamp::now());
        let id = running.id;
        let stop = Arc::new(StopFlag::default());
        exports.shared.jobs.lock().insert(
            id,
            JobSlot {
                job: running,
                stop: Arc::clone(&stop),
            },
        );
        let root = dir.path().join("exports");
        let staging = root.join(format!("{STAGING_PREFIX}{id}.tar.zst"));
        fs::write(&staging, b"partial").unwrap();
        let stray = root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        fs::create_dir_all(&stray).unwrap();

        assert_eq!(exports.expire(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(exports.expire(Duration::ZERO).unwrap(), 1);

        assert!(staging.is_file());
        assert!(!stray.exists());
        assert_eq!(stop.reason(), Some(FailureReason::Expired));
    }

    #[test]
    fn finished_jobs_are_immutable() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());
        let queued = exports
            .start_export(empty_scene(), ExportOptions::default())
            .unwrap();
        let done = exports.wait(queued.id, WAIT).unwrap();

        let after = exports.cancel(queued.id).unwrap();
        assert_eq!(after, done);
    }

    #[test]
    fn expire_removes_finished_artifacts() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());
        let queued = exports
            .start_export(empty_scene(), ExportOptions::default())
            .unwrap();
        let job = exports.wait(queued.id, WAIT).unwrap();
        let location = job.artifact_location.unwrap();

        assert_eq!(exports.expire(Duration::from_secs(3600)).unwrap(), 0);
        assert!(location.exists());

        assert_eq!(exports.expire(Duration::ZERO).unwrap(), 1);
        assert!(!location.exists());
        assert!(matches!(
            exports.poll_status(job.id),
            Err(ExportError::UnknownJob(_))
        ));
    }

    #[test]
    fn unknown_job_is_reported() {
        let dir = TempDir::new().unwrap();
        let exports = packager(&dir, MemoryAssets::default(), &ExportConfig::default());
        assert!(matches!(
            exports.poll_status(Uuid::new_v4()),
            Err(ExportError::UnknownJob(_))
        ));
    }
}
