//! Local persistence for game sessions.
//!
//! Each workspace lives in its own `SQLite` file under the storage root:
//!
//! ```text
//! <root>/<workspace>.sqlite
//!   session   # one row: ids, status, current version, base and current spec
//!   history   # one row per committed batch, keyed by the version it produced
//! ```
//!
//! Specification snapshots are stored as zstd-compressed JSON.

mod history;
mod session;

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::model::{GameSpecification, WorkspaceId};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("session not found: {0}")]
    SessionNotFound(WorkspaceId),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(WorkspaceId),

    #[error("session {workspace} is at version {found}, expected {expected}")]
    VersionConflict {
        workspace: WorkspaceId,
        expected: u64,
        found: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt session data: {0}")]
    Corrupt(String),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS session (
        workspace_id TEXT PRIMARY KEY,
        spec_id      TEXT NOT NULL,
        status       TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        version      INTEGER NOT NULL,
        base_spec    BLOB NOT NULL,
        current_spec BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS history (
        version      INTEGER PRIMARY KEY,
        operations   TEXT NOT NULL,
        committed_at TEXT NOT NULL
    );
";

/// zstd level for stored snapshots. Favors speed over ratio.
const SNAPSHOT_LEVEL: i32 = 3;

/// Local `SQLite`-backed storage for sessions and their history.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    busy_timeout: Duration,
}

impl Storage {
    /// Creates a new storage instance rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            busy_timeout: Duration::from_secs(5),
        })
    }

    /// Bounds how long a connection waits on another process's write lock.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn db_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.root.join(format!("{workspace}.sqlite"))
    }

    /// Scratch file a new workspace database is assembled in.
    ///
    /// The `.partial` extension keeps it out of [`list_sessions`](Self::list_sessions).
    fn partial_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.root
            .join(format!(".{workspace}.{}.partial", Uuid::new_v4().simple()))
    }

    /// Creates the schema in a fresh database file at `path`.
    fn create_db(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Opens an existing workspace database.
    fn open_db(&self, workspace: &WorkspaceId) -> Result<Connection> {
        let path = self.db_path(workspace);
        if !path.exists() {
            return Err(StorageError::SessionNotFound(workspace.clone()));
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

fn encode_spec(spec: &GameSpecification) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(spec)?;
    Ok(zstd::encode_all(json.as_slice(), SNAPSHOT_LEVEL)?)
}

fn decode_spec(blob: &[u8]) -> Result<GameSpecification> {
    let json = zstd::decode_all(blob)
        .map_err(|e| StorageError::Corrupt(format!("snapshot does not decompress: {e}")))?;
    let spec: GameSpecification = serde_json::from_slice(&json)?;
    if spec.is_derived() {
        return Err(StorageError::Corrupt(
            "stored snapshot carries a mobile overlay".into(),
        ));
    }
    Ok(spec)
}

/// Reads the stored version, or `SessionNotFound` when the file has no session row.
fn stored_version(conn: &Connection, workspace: &WorkspaceId) -> Result<u64> {
    let version: Option<i64> = conn
        .query_row("SELECT version FROM session LIMIT 1", [], |row| row.get(0))
        .optional()?;
    from_sql(version.ok_or_else(|| StorageError::SessionNotFound(workspace.clone()))?)
}

/// True for a database file without a session row, as an interrupted create leaves.
fn holds_no_session(path: &Path) -> bool {
    let Ok(conn) = Connection::open(path) else {
        return false;
    };
    match conn.query_row("SELECT COUNT(*) FROM session", [], |row| row.get::<_, i64>(0)) {
        Ok(rows) => rows == 0,
        Err(_) => fs::metadata(path).is_ok_and(|m| m.len() == 0),
    }
}

fn to_sql(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| StorageError::Corrupt(format!("version {version} overflows")))
}

fn from_sql(version: i64) -> Result<u64> {
    u64::try_from(version).map_err(|_| StorageError::Corrupt(format!("negative version {version}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn snapshots_survive_compression() {
        let spec = GameSpecification::new("Packed");
        let blob = encode_spec(&spec).unwrap();
        assert_eq!(decode_spec(&blob).unwrap(), spec);
    }

    #[test]
    fn garbage_snapshot_is_corrupt() {
        let err = decode_spec(b"not zstd").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn open_missing_workspace_fails() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("sessions")).unwrap();
        let ws: WorkspaceId = "nowhere".parse().unwrap();

        let err = storage.open_db(&ws).unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }

    #[test]
    fn empty_database_is_not_a_session() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("sessions")).unwrap();
        let path = dir.path().join("sessions").join("beta.sqlite");
        storage.create_db(&path).unwrap();

        assert!(holds_no_session(&path));
        let conn = Connection::open(&path).unwrap();
        let err = stored_version(&conn, &"beta".parse().unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }

    #[test]
    fn versions_convert_both_ways() {
        assert_eq!(from_sql(to_sql(42).unwrap()).unwrap(), 42);
        assert!(to_sql(u64::MAX).is_err());
        assert!(from_sql(-1).is_err());
    }
}
