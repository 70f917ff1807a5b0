//! Output formatting for CLI display.

use crate::model::{ExportJob, ExportStatus, HistoryEntry, SessionStatus, SessionSummary};
use crate::service::SpecSummary;

pub(super) fn format_summary(summary: &SpecSummary) -> String {
    format!(
        "{} v{}: \"{}\" ({} scene(s), {} object(s), {} event rule(s))",
        summary.workspace_id,
        summary.version,
        summary.name,
        summary.scenes,
        summary.objects,
        summary.event_rules
    )
}

pub(super) fn format_session(session: &SessionSummary) -> String {
    let status = match session.status {
        SessionStatus::Active => "active",
        SessionStatus::Archived => "archived",
    };
    format!(
        "{}  [{status}]  v{}  created {}",
        session.workspace_id,
        session.version,
        session.created_at.strftime("%Y-%m-%d %H:%M")
    )
}

/// `v3  2026-05-01 12:00  addScene Boss, addObject Boss/Dragon`
pub(super) fn format_history_entry(entry: &HistoryEntry) -> String {
    let ops = entry
        .operations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "v{}  {}  {ops}",
        entry.version,
        entry.committed_at.strftime("%Y-%m-%d %H:%M")
    )
}

pub(super) fn format_job(job: &ExportJob) -> String {
    let short_id = &job.id.to_string()[..8];
    let detail = match job.status {
        ExportStatus::Queued => "queued".to_string(),
        ExportStatus::Running => "running".to_string(),
        ExportStatus::Completed => match (&job.artifact_location, job.artifact_bytes) {
            (Some(path), Some(bytes)) => format!("completed: {} ({bytes} bytes)", path.display()),
            _ => "completed".to_string(),
        },
        ExportStatus::Failed => match &job.failure {
            Some(reason) => format!("failed: {reason}"),
            None => "failed".to_string(),
        },
    };
    format!("export {short_id} of v{}: {detail}", job.session_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use jiff::Timestamp;
    use uuid::Uuid;

    use crate::model::{EditOperation, ExportOptions, FailureReason, ObjectKind};

    fn at() -> Timestamp {
        "2026-05-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn format_history_lists_operations() {
        let entry = HistoryEntry {
            version: 3,
            operations: vec![
                EditOperation::add_scene("Boss"),
                EditOperation::add_object("Boss", "Dragon", ObjectKind::Sprite),
            ],
            committed_at: at(),
        };
        assert_eq!(
            format_history_entry(&entry),
            "v3  2026-05-01 12:00  addScene Boss, addObject Boss/Dragon"
        );
    }

    #[test]
    fn format_session_line() {
        let session = SessionSummary {
            workspace_id: "team-1".parse().unwrap(),
            status: SessionStatus::Archived,
            version: 7,
            created_at: at(),
        };
        assert_eq!(
            format_session(&session),
            "team-1  [archived]  v7  created 2026-05-01 12:00"
        );
    }

    #[test]
    fn format_job_states() {
        let mut job = ExportJob::queued(Uuid::nil(), 2, ExportOptions::default(), at());
        let short_id = job.id.to_string()[..8].to_string();
        assert_eq!(format_job(&job), format!("export {short_id} of v2: queued"));

        job.start(at());
        job.complete(PathBuf::from("/tmp/out.tar.zst"), 512, at());
        assert_eq!(
            format_job(&job),
            format!("export {short_id} of v2: completed: /tmp/out.tar.zst (512 bytes)")
        );
    }

    #[test]
    fn format_failed_job_shows_reason() {
        let mut job = ExportJob::queued(Uuid::nil(), 1, ExportOptions::default(), at());
        job.fail(FailureReason::Cancelled, at());
        assert!(format_job(&job).ends_with("failed: cancelled"));
    }

    #[test]
    fn format_summary_line() {
        let summary = SpecSummary {
            workspace_id: "w1".parse().unwrap(),
            spec_id: Uuid::nil(),
            version: 4,
            name: "Coin Jumper".into(),
            scenes: 1,
            objects: 3,
            event_rules: 1,
        };
        assert_eq!(
            format_summary(&summary),
            "w1 v4: \"Coin Jumper\" (1 scene(s), 3 object(s), 1 event rule(s))"
        );
    }
}
