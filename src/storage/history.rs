//! History storage: record commits, load the log, and rebase it.

use jiff::Timestamp;
use rusqlite::TransactionBehavior;

use crate::model::{EditOperation, GameSpecification, HistoryEntry, WorkspaceId};

use super::{Result, Storage, StorageError, encode_spec, from_sql, stored_version, to_sql};

impl Storage {
    /// Replaces the current snapshot and appends a history row, atomically.
    ///
    /// The write only lands if the stored version still equals `expected`;
    /// otherwise another writer got there first and nothing changes.
    pub fn record_commit(
        &self,
        workspace: &WorkspaceId,
        expected: u64,
        spec: &GameSpecification,
        operations: &[EditOperation],
        committed_at: Timestamp,
    ) -> Result<()> {
        let mut conn = self.open_db(workspace)?;
        let blob = encode_spec(spec)?;
        let operations = serde_json::to_string(operations)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = tx.execute(
            "UPDATE session SET version = ?1, current_spec = ?2 WHERE version = ?3",
            rusqlite::params![to_sql(spec.version())?, blob, to_sql(expected)?],
        )?;
        if rows == 0 {
            return Err(StorageError::VersionConflict {
                workspace: workspace.clone(),
                expected,
                found: stored_version(&tx, workspace)?,
            });
        }
        tx.execute(
            "INSERT INTO history (version, operations, committed_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![to_sql(spec.version())?, operations, committed_at.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Loads all retained history entries, oldest first.
    pub fn load_history(&self, workspace: &WorkspaceId) -> Result<Vec<HistoryEntry>> {
        let conn = self.open_db(workspace)?;
        let mut stmt =
            conn.prepare("SELECT version, operations, committed_at FROM history ORDER BY version")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (version, operations, committed_at) = row?;
            entries.push(HistoryEntry {
                version: from_sql(version)?,
                operations: serde_json::from_str(&operations)?,
                committed_at: committed_at
                    .parse()
                    .map_err(|e| StorageError::Corrupt(format!("invalid committed_at: {e}")))?,
            });
        }
        Ok(entries)
    }

    /// Makes `base` the replay starting point and drops the history it covers.
    ///
    /// Returns the number of history rows removed.
    pub fn rebase(&self, workspace: &WorkspaceId, base: &GameSpecification) -> Result<usize> {
        let mut conn = self.open_db(workspace)?;
        let blob = encode_spec(base)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = stored_version(&tx, workspace)?;
        if base.version() > current {
            return Err(StorageError::Corrupt(format!(
                "cannot rebase onto version {} past current {current}",
                base.version()
            )));
        }

        tx.execute("UPDATE session SET base_spec = ?1", rusqlite::params![blob])?;
        let removed = tx.execute(
            "DELETE FROM history WHERE version <= ?1",
            rusqlite::params![to_sql(base.version())?],
        )?;
        tx.commit()?;
        Ok(removed)
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

    fn ws() -> WorkspaceId {
        "alpha".parse().unwrap()
    }

    fn next(spec: &GameSpecification) -> GameSpecification {
        let mut next = spec.clone();
        next.version += 1;
        next
    }

    #[test]
    fn commit_appends_history() {
        let (_dir, storage) = test_storage();
        let v0 = GameSpecification::new("Runner");
        storage.create_session(&ws(), &v0, Timestamp::now()).unwrap();

        let v1 = next(&v0);
        let ops = [EditOperation::add_scene("Level1")];
        storage
            .record_commit(&ws(), 0, &v1, &ops, Timestamp::now())
            .unwrap();

        let history = storage.load_history(&ws()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].operations, ops);
        assert_eq!(storage.load_version(&ws()).unwrap(), 1);
    }

    #[test]
    fn stale_expected_version_conflicts() {
        let (_dir, storage) = test_storage();
        let v0 = GameSpecification::new("Runner");
        storage.create_session(&ws(), &v0, Timestamp::now()).unwrap();
        let v1 = next(&v0);
        storage
            .record_commit(&ws(), 0, &v1, &[EditOperation::add_scene("A")], Timestamp::now())
            .unwrap();

        let err = storage
            .record_commit(&ws(), 0, &v1, &[EditOperation::add_scene("B")], Timestamp::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert_eq!(storage.load_history(&ws()).unwrap().len(), 1);
    }

    #[test]
    fn rebase_drops_covered_history() {
        let (_dir, storage) = test_storage();
        let v0 = GameSpecification::new("Runner");
        storage.create_session(&ws(), &v0, Timestamp::now()).unwrap();
        let v1 = next(&v0);
        let v2 = next(&v1);
        let ops = [EditOperation::add_scene("A")];
        storage.record_commit(&ws(), 0, &v1, &ops, Timestamp::now()).unwrap();
        storage.record_commit(&ws(), 1, &v2, &ops, Timestamp::now()).unwrap();

        assert_eq!(storage.rebase(&ws(), &v1).unwrap(), 1);
        assert_eq!(storage.load_base(&ws()).unwrap().version(), 1);
        let history = storage.load_history(&ws()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 2);
    }
}
