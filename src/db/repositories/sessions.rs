use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use crate::db::{
    helpers::{
        parse_datetime, parse_mode, parse_optional_datetime, parse_outcome, parse_status, to_i64,
        to_u64,
    },
    Database,
};
use crate::models::{OutcomeKind, Session, SessionMode, SessionRecord, SessionStatus};
use crate::session::SessionLog;

const SESSION_COLUMNS: &str = "id, mode, status, started_at, stopped_at, elapsed_secs, \
                               frame_count, artifact, outcome, created_at, updated_at";

/// A session row as persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    pub frame_count: u64,
    pub artifact: Option<String>,
    pub outcome: Option<OutcomeKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_session(row: &Row) -> Result<StoredSession> {
    let mode: String = row.get("mode")?;
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let elapsed_secs: i64 = row.get("elapsed_secs")?;
    let frame_count: i64 = row.get("frame_count")?;
    let outcome: Option<String> = row.get("outcome")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(StoredSession {
        id: row.get("id")?,
        mode: parse_mode(&mode)?,
        status: parse_status(&status)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        elapsed_secs: to_u64(elapsed_secs, "elapsed_secs")?,
        frame_count: to_u64(frame_count, "frame_count")?,
        artifact: row.get("artifact")?,
        outcome: parse_outcome(outcome)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        let now = Utc::now();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, mode, status, started_at, stopped_at, elapsed_secs,
                                       frame_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7)",
                params![
                    record.id,
                    record.mode.as_str(),
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        elapsed_secs: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET elapsed_secs = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![to_i64(elapsed_secs)?, updated_at.to_rfc3339(), session_id],
            )
            .with_context(|| "failed to update session progress")?;
            Ok(())
        })
        .await
    }

    pub async fn finalize_session(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        let now = Utc::now();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions
                     SET status = ?1,
                         stopped_at = ?2,
                         elapsed_secs = ?3,
                         frame_count = ?4,
                         artifact = ?5,
                         outcome = ?6,
                         updated_at = ?7
                     WHERE id = ?8",
                    params![
                        record.status.as_str(),
                        record.stopped_at.to_rfc3339(),
                        to_i64(record.elapsed_secs)?,
                        to_i64(record.frame_count as u64)?,
                        record.artifact,
                        record.outcome.as_str(),
                        now.to_rfc3339(),
                        record.session_id,
                    ],
                )
                .with_context(|| "failed to finalize session")?;

            // The start row may be missing if the start write failed; keep
            // the duration anyway.
            if updated == 0 {
                conn.execute(
                    "INSERT INTO sessions (id, mode, status, started_at, stopped_at, elapsed_secs,
                                           frame_count, artifact, outcome, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        record.session_id,
                        record.mode.as_str(),
                        record.status.as_str(),
                        record.started_at.to_rfc3339(),
                        record.stopped_at.to_rfc3339(),
                        to_i64(record.elapsed_secs)?,
                        to_i64(record.frame_count as u64)?,
                        record.artifact,
                        record.outcome.as_str(),
                        now.to_rfc3339(),
                    ],
                )
                .with_context(|| "failed to insert finalized session")?;
            }
            Ok(())
        })
        .await
    }

    /// Marks sessions a previous process left mid-capture as failed and
    /// interrupted, keeping their last checkpointed duration.
    pub async fn recover_interrupted_sessions(&self) -> Result<Vec<StoredSession>> {
        let now = Utc::now();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let stale = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE status IN ('Capturing', 'Stopping', 'Synthesizing')"
                ))?;
                let mut rows = stmt.query([])?;
                let mut stale = Vec::new();
                while let Some(row) = rows.next()? {
                    stale.push(row_to_session(row)?);
                }
                stale
            };

            for session in &stale {
                tx.execute(
                    "UPDATE sessions
                     SET status = ?1,
                         outcome = ?2,
                         stopped_at = COALESCE(stopped_at, updated_at),
                         updated_at = ?3
                     WHERE id = ?4",
                    params![
                        SessionStatus::Failed.as_str(),
                        OutcomeKind::Interrupted.as_str(),
                        now.to_rfc3339(),
                        session.id,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(stale)
        })
        .await
    }
}

#[async_trait]
impl SessionLog for Database {
    async fn begin(&self, session: &Session) -> Result<()> {
        self.insert_session(session).await
    }

    async fn checkpoint(&self, session_id: &str, elapsed_secs: u64) -> Result<()> {
        self.update_session_progress(session_id, elapsed_secs, Utc::now())
            .await
    }

    async fn complete(&self, record: SessionRecord) -> Result<()> {
        self.finalize_session(&record).await
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::OptionalExtension;

    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("focuslapse.db")).unwrap();
        (dir, db)
    }

    async fn get_session(db: &Database, session_id: &str) -> Option<StoredSession> {
        let session_id = session_id.to_string();
        db.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
        .unwrap()
    }

    fn capturing(id: &str) -> Session {
        let mut session = Session::new(id.into(), SessionMode::Timelapse, Utc::now());
        session.advance(SessionStatus::Capturing).unwrap();
        session
    }

    #[tokio::test]
    async fn begin_checkpoint_complete_round_trip() {
        let (_dir, db) = open();
        let session = capturing("a");
        db.begin(&session).await.unwrap();
        db.checkpoint("a", 42).await.unwrap();

        let stored = get_session(&db, "a").await.unwrap();
        assert_eq!(stored.elapsed_secs, 42);
        assert_eq!(stored.status, SessionStatus::Capturing);

        db.complete(SessionRecord {
            session_id: "a".into(),
            mode: SessionMode::Timelapse,
            status: SessionStatus::Complete,
            started_at: session.started_at,
            stopped_at: Utc::now(),
            elapsed_secs: 60,
            frame_count: 15,
            artifact: None,
            outcome: OutcomeKind::CapabilityUnavailable,
        })
        .await
        .unwrap();

        let stored = get_session(&db, "a").await.unwrap();
        assert_eq!(stored.status, SessionStatus::Complete);
        assert_eq!(stored.elapsed_secs, 60);
        assert_eq!(stored.frame_count, 15);
        assert_eq!(stored.outcome, Some(OutcomeKind::CapabilityUnavailable));
        assert!(stored.artifact.is_none());
    }

    #[tokio::test]
    async fn complete_without_begin_still_records_duration() {
        let (_dir, db) = open();
        let now = Utc::now();
        db.complete(SessionRecord {
            session_id: "orphan".into(),
            mode: SessionMode::Stopwatch,
            status: SessionStatus::Complete,
            started_at: now,
            stopped_at: now,
            elapsed_secs: 7,
            frame_count: 0,
            artifact: None,
            outcome: OutcomeKind::Skipped,
        })
        .await
        .unwrap();

        let stored = get_session(&db, "orphan").await.unwrap();
        assert_eq!(stored.elapsed_secs, 7);
    }

    #[tokio::test]
    async fn recovery_marks_stale_captures_interrupted() {
        let (_dir, db) = open();
        db.begin(&capturing("stale")).await.unwrap();
        db.checkpoint("stale", 300).await.unwrap();

        let recovered = db.recover_interrupted_sessions().await.unwrap();
        assert_eq!(recovered.len(), 1);

        let stored = get_session(&db, "stale").await.unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.outcome, Some(OutcomeKind::Interrupted));
        assert_eq!(stored.elapsed_secs, 300);
        assert!(stored.stopped_at.is_some());

        assert!(db.recover_interrupted_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let (_dir, db) = open();
        assert!(get_session(&db, "missing").await.is_none());
    }
}
