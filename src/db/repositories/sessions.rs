use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{
        helpers::{format_datetime, parse_datetime, parse_uuid, to_i64},
        Database,
    },
    models::{PostureSession, SessionHistoryStats},
    store::SessionStore,
};

const SESSION_COLUMNS: &str = "id, start_time, end_time, poor_posture_duration";

fn row_to_session(row: &Row) -> Result<PostureSession> {
    let id: String = row.get("id")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;

    Ok(PostureSession {
        id: parse_uuid(&id, "id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        poor_posture_duration: row.get("poor_posture_duration")?,
    })
}

impl Database {
    pub async fn insert_posture_session(&self, session: &PostureSession) -> Result<()> {
        if session.end_time < session.start_time {
            bail!("session {} ends before it starts", session.id);
        }

        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO posture_sessions (id, start_time, end_time, poor_posture_duration, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    record.poor_posture_duration,
                    format_datetime(&Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_posture_sessions(&self) -> Result<Vec<PostureSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM posture_sessions
                 ORDER BY start_time DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn list_posture_sessions_paginated(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PostureSession>> {
        let limit = to_i64(limit)?;
        let offset = to_i64(offset)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM posture_sessions
                 ORDER BY start_time DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn count_posture_sessions(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM posture_sessions", [], |row| row.get(0))?;
            Ok(usize::try_from(count)?)
        })
        .await
    }

    /// Remove every stored session. Returns how many were deleted.
    pub async fn clear_posture_sessions(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn.execute("DELETE FROM posture_sessions", [])?;
            Ok(deleted)
        })
        .await
    }

    pub async fn session_history_stats(&self) -> Result<SessionHistoryStats> {
        let sessions = self.list_posture_sessions().await?;
        Ok(SessionHistoryStats::from_sessions(&sessions))
    }
}

impl SessionStore for Database {
    async fn append_session(&self, session: PostureSession) -> Result<()> {
        self.insert_posture_session(&session).await
    }

    async fn list_sessions(&self) -> Result<Vec<PostureSession>> {
        self.list_posture_sessions().await
    }

    async fn clear_all(&self) -> Result<()> {
        self.clear_posture_sessions().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use uuid::Uuid;

    fn session(start: DateTime<Utc>, secs: i64, poor: f64) -> PostureSession {
        PostureSession {
            id: Uuid::new_v4(),
            start_time: start,
            end_time: start + Duration::seconds(secs),
            poor_posture_duration: poor,
        }
    }

    #[tokio::test]
    async fn round_trips_sessions_newest_first() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();
        let first = session(base, 60, 30.0);
        let second = session(base + Duration::minutes(5), 120, 12.5);

        db.append_session(first.clone()).await.unwrap();
        db.append_session(second.clone()).await.unwrap();

        let listed = db.list_sessions().await.unwrap();
        assert_eq!(listed, vec![second, first.clone()]);
        assert_eq!(listed[1].poor_posture_percentage(), 50);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let db = Database::in_memory().unwrap();
        let record = session(Utc::now(), 10, 0.0);
        db.append_session(record.clone()).await.unwrap();
        assert!(db.append_session(record).await.is_err());
        assert_eq!(db.count_posture_sessions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn paginates_in_recency_order() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();
        let mut inserted = Vec::new();
        for i in 0..5 {
            let record = session(base + Duration::minutes(i), 30, 1.0);
            db.append_session(record.clone()).await.unwrap();
            inserted.push(record);
        }
        inserted.reverse();

        let page = db.list_posture_sessions_paginated(2, 1).await.unwrap();
        assert_eq!(page, inserted[1..3].to_vec());
    }

    #[tokio::test]
    async fn clear_all_empties_store() {
        let db = Database::in_memory().unwrap();
        db.append_session(session(Utc::now(), 10, 2.0)).await.unwrap();
        db.append_session(session(Utc::now(), 20, 4.0)).await.unwrap();

        assert_eq!(db.clear_posture_sessions().await.unwrap(), 2);
        assert!(db.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_stats_cover_stored_sessions() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();
        db.append_session(session(base, 100, 50.0)).await.unwrap();
        db.append_session(session(base + Duration::minutes(3), 100, 10.0))
            .await
            .unwrap();

        let stats = db.session_history_stats().await.unwrap();
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.total_duration, 200.0);
        assert!((stats.average_poor_posture_percentage - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejects_inverted_session() {
        let db = Database::in_memory().unwrap();
        let base = Utc::now();
        let mut record = session(base, 10, 0.0);
        record.end_time = base - Duration::seconds(1);
        assert!(db.append_session(record).await.is_err());
    }
}
