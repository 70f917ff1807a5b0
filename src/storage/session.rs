//! Session storage: create, load, archive, and list sessions.

use std::{fs, io, path::Path};

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};

use crate::model::{GameSpecification, SessionStatus, SessionSummary, WorkspaceId};

use super::{
    Result, Storage, StorageError, decode_spec, encode_spec, from_sql, holds_no_session,
    stored_version, to_sql,
};

impl Storage {
    /// Creates a new session whose base and current snapshot are both `spec`.
    ///
    /// The database is assembled under a scratch name and hard-linked into
    /// place once its session row is written. A leftover file without a
    /// session row is replaced.
    pub fn create_session(
        &self,
        workspace: &WorkspaceId,
        spec: &GameSpecification,
        created_at: Timestamp,
    ) -> Result<()> {
        let path = self.db_path(workspace);
        if path.exists() {
            if !holds_no_session(&path) {
                return Err(StorageError::SessionAlreadyExists(workspace.clone()));
            }
            log::warn!("replacing incomplete session file {}", path.display());
            fs::remove_file(&path)?;
        }

        let partial = self.partial_path(workspace);
        let created = self
            .write_session(&partial, workspace, spec, created_at)
            .and_then(|()| match fs::hard_link(&partial, &path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Err(StorageError::SessionAlreadyExists(workspace.clone()))
                }
                Err(e) => Err(e.into()),
            });
        if let Err(e) = fs::remove_file(&partial)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!("failed to remove {}: {e}", partial.display());
        }
        created
    }

    fn write_session(
        &self,
        path: &Path,
        workspace: &WorkspaceId,
        spec: &GameSpecification,
        created_at: Timestamp,
    ) -> Result<()> {
        let blob = encode_spec(spec)?;
        let conn = self.create_db(path)?;
        conn.execute(
            "INSERT INTO session
                 (workspace_id, spec_id, status, created_at, version, base_spec, current_spec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                workspace.as_str(),
                spec.id().to_string(),
                SessionStatus::Active.as_str(),
                created_at.to_string(),
                to_sql(spec.version())?,
                blob,
            ],
        )?;
        conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    /// Loads a session's metadata without decoding its snapshots.
    pub fn load_summary(&self, workspace: &WorkspaceId) -> Result<SessionSummary> {
        let conn = self.open_db(workspace)?;
        load_summary_row(&conn)?.ok_or_else(|| StorageError::SessionNotFound(workspace.clone()))
    }

    /// Loads the stored current version number.
    pub fn load_version(&self, workspace: &WorkspaceId) -> Result<u64> {
        let conn = self.open_db(workspace)?;
        stored_version(&conn, workspace)
    }

    /// Loads the current specification.
    pub fn load_current(&self, workspace: &WorkspaceId) -> Result<GameSpecification> {
        self.load_snapshot(workspace, "current_spec")
    }

    /// Loads the specification that history is replayed from.
    pub fn load_base(&self, workspace: &WorkspaceId) -> Result<GameSpecification> {
        self.load_snapshot(workspace, "base_spec")
    }

    fn load_snapshot(&self, workspace: &WorkspaceId, column: &str) -> Result<GameSpecification> {
        let conn = self.open_db(workspace)?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                &format!("SELECT {column} FROM session LIMIT 1"),
                [],
                |row| row.get(0),
            )
            .optional()?;
        let blob = blob.ok_or_else(|| StorageError::SessionNotFound(workspace.clone()))?;
        decode_spec(&blob)
    }

    /// Updates a session's status.
    pub fn set_status(&self, workspace: &WorkspaceId, status: SessionStatus) -> Result<()> {
        let conn = self.open_db(workspace)?;
        let rows = conn.execute(
            "UPDATE session SET status = ?1 WHERE workspace_id = ?2",
            rusqlite::params![status.as_str(), workspace.as_str()],
        )?;
        if rows == 0 {
            return Err(StorageError::SessionNotFound(workspace.clone()));
        }
        Ok(())
    }

    /// Lists all sessions by reading each `.sqlite` file in the storage root.
    ///
    /// Unreadable or malformed files are skipped with a warning.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sqlite") {
                continue;
            }
            let Ok(conn) = Connection::open(&path) else {
                continue;
            };
            match load_summary_row(&conn) {
                Ok(Some(summary)) => sessions.push(summary),
                Ok(None) => log::warn!("skipping {}: no session row", path.display()),
                Err(e) => log::warn!("skipping {}: {e}", path.display()),
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }
}

/// Reads the single session row from an open connection, if there is one.
fn load_summary_row(conn: &Connection) -> Result<Option<SessionSummary>> {
    let row = conn
        .query_row(
            "SELECT workspace_id, status, created_at, version FROM session LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((workspace_str, status_str, created_at_str, version)) = row else {
        return Ok(None);
    };

    let workspace_id = workspace_str
        .parse::<WorkspaceId>()
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let created_at = created_at_str
        .parse::<Timestamp>()
        .map_err(|e| StorageError::Corrupt(format!("invalid created_at: {e}")))?;

    Ok(Some(SessionSummary {
        workspace_id,
        status: parse_status(&status_str)?,
        version: from_sql(version)?,
        created_at,
    }))
}

fn parse_status(status: &str) -> Result<SessionStatus> {
    match status {
        "active" => Ok(SessionStatus::Active),
        "archived" => Ok(SessionStatus::Archived),
        other => Err(StorageError::Corrupt(format!(
            "unknown session status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("sessions")).unwrap();
        (dir, storage)
    }

    fn ws(name: &str) -> WorkspaceId {
        name.parse().unwrap()
    }

    #[test]
    fn create_and_load_session() {
        let (_dir, storage) = test_storage();
        let spec = GameSpecification::new("Runner");

        storage
            .create_session(&ws("alpha"), &spec, Timestamp::now())
            .unwrap();

        assert_eq!(storage.load_current(&ws("alpha")).unwrap(), spec);
        assert_eq!(storage.load_base(&ws("alpha")).unwrap(), spec);
        let summary = storage.load_summary(&ws("alpha")).unwrap();
        assert_eq!(summary.version, 0);
        assert_eq!(summary.status, SessionStatus::Active);
    }

    #[test]
    fn create_duplicate_session_fails() {
        let (_dir, storage) = test_storage();
        let spec = GameSpecification::new("Runner");

        storage
            .create_session(&ws("alpha"), &spec, Timestamp::now())
            .unwrap();
        let err = storage
            .create_session(&ws("alpha"), &spec, Timestamp::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionAlreadyExists(_)));
    }

    #[test]
    fn interrupted_create_does_not_block_the_workspace() {
        let (dir, storage) = test_storage();
        let path = dir.path().join("sessions").join("beta.sqlite");
        storage.create_db(&path).unwrap();

        let err = storage.load_current(&ws("beta")).unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
        let err = storage.load_summary(&ws("beta")).unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
        assert!(storage.list_sessions().unwrap().is_empty());

        let spec = GameSpecification::new("Beta");
        storage
            .create_session(&ws("beta"), &spec, Timestamp::now())
            .unwrap();
        assert_eq!(storage.load_current(&ws("beta")).unwrap(), spec);
    }

    #[test]
    fn create_leaves_no_scratch_files() {
        let (dir, storage) = test_storage();
        storage
            .create_session(&ws("alpha"), &GameSpecification::new("A"), Timestamp::now())
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("sessions"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["alpha.sqlite"]);
    }

    #[test]
    fn load_nonexistent_session_fails() {
        let (_dir, storage) = test_storage();
        let err = storage.load_current(&ws("ghost")).unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }

    #[test]
    fn archive_and_restore() {
        let (_dir, storage) = test_storage();
        storage
            .create_session(&ws("alpha"), &GameSpecification::new("A"), Timestamp::now())
            .unwrap();

        storage
            .set_status(&ws("alpha"), SessionStatus::Archived)
            .unwrap();
        assert_eq!(
            storage.load_summary(&ws("alpha")).unwrap().status,
            SessionStatus::Archived
        );
        storage.set_status(&ws("alpha"), SessionStatus::Active).unwrap();
        assert_eq!(
            storage.load_summary(&ws("alpha")).unwrap().status,
            SessionStatus::Active
        );
    }

    #[test]
    fn list_sessions_sorted_and_skips_strays() {
        let (dir, storage) = test_storage();
        assert!(storage.list_sessions().unwrap().is_empty());

        let first = Timestamp::from_second(1_700_000_000).unwrap();
        let second = Timestamp::from_second(1_700_000_100).unwrap();
        storage
            .create_session(&ws("later"), &GameSpecification::new("B"), second)
            .unwrap();
        storage
            .create_session(&ws("earlier"), &GameSpecification::new("A"), first)
            .unwrap();
        fs::write(dir.path().join("sessions").join("notes.txt"), "hi").unwrap();

        let names: Vec<_> = storage
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.workspace_id.to_string())
            .collect();
        assert_eq!(names, ["earlier", "later"]);
    }
}
