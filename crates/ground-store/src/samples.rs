use chrono::Utc;
use ground_core::{NewSample, Sample, SessionId};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SAMPLE_COLUMNS: &str = "id, session_id, timestamp, velocity, air_pressure, recorded_at";

/// Durable, append-only record of samples.
///
/// `append` must only return once the sample is visible to `recent`/`since`
/// from the same caller.
pub trait SampleStore: Send + Sync {
    /// Persist a sample and assign its sequence number.
    fn append(&self, sample: &NewSample) -> Result<Sample, StoreError>;

    /// Up to `limit` most recent samples of a session, newest first.
    fn recent(&self, session_id: &SessionId, limit: u32) -> Result<Vec<Sample>, StoreError>;

    /// Samples of a session with `sequence_no > after`, oldest first.
    fn since(&self, session_id: &SessionId, after: i64, limit: u32)
        -> Result<Vec<Sample>, StoreError>;

    /// Newest-first history, optionally restricted to one session.
    fn history(&self, session_id: Option<&SessionId>, limit: u32)
        -> Result<Vec<Sample>, StoreError>;

    /// Every session that has samples, most recently active first.
    fn distinct_sessions(&self) -> Result<Vec<SessionId>, StoreError>;
}

/// SQLite-backed [`SampleStore`].
#[derive(Clone)]
pub struct SqliteSampleStore {
    db: Database,
}

impl SqliteSampleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query_samples(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<Sample>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_sample(row)?);
            }
            Ok(results)
        })
    }
}

impl SampleStore for SqliteSampleStore {
    #[instrument(skip(self, sample), fields(session_id = %sample.session_id))]
    fn append(&self, sample: &NewSample) -> Result<Sample, StoreError> {
        self.db.with_conn(|conn| {
            let recorded_at = Utc::now();
            conn.execute(
                "INSERT INTO samples (session_id, timestamp, velocity, air_pressure, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    sample.session_id.as_str(),
                    sample.timestamp,
                    sample.velocity,
                    sample.air_pressure,
                    recorded_at.to_rfc3339(),
                ],
            )?;

            Ok(Sample {
                sequence_no: conn.last_insert_rowid(),
                timestamp: sample.timestamp.clone(),
                session_id: sample.session_id.clone(),
                velocity: sample.velocity,
                air_pressure: sample.air_pressure,
                recorded_at,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    fn recent(&self, session_id: &SessionId, limit: u32) -> Result<Vec<Sample>, StoreError> {
        self.query_samples(
            &format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2"
            ),
            rusqlite::params![session_id.as_str(), limit],
        )
    }

    #[instrument(skip(self), fields(session_id = %session_id, after))]
    fn since(
        &self,
        session_id: &SessionId,
        after: i64,
        limit: u32,
    ) -> Result<Vec<Sample>, StoreError> {
        self.query_samples(
            &format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE session_id = ?1 AND id > ?2
                 ORDER BY id ASC LIMIT ?3"
            ),
            rusqlite::params![session_id.as_str(), after, limit],
        )
    }

    #[instrument(skip(self))]
    fn history(
        &self,
        session_id: Option<&SessionId>,
        limit: u32,
    ) -> Result<Vec<Sample>, StoreError> {
        match session_id {
            Some(session_id) => self.recent(session_id, limit),
            None => self.query_samples(
                &format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY id DESC LIMIT ?1"),
                rusqlite::params![limit],
            ),
        }
    }

    #[instrument(skip(self))]
    fn distinct_sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM samples
                 GROUP BY session_id
                 ORDER BY MAX(id) DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "samples", "session_id")?;
                sessions.push(SessionId::from_raw(raw));
            }
            Ok(sessions)
        })
    }
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> Result<Sample, StoreError> {
    let session_id: String = row_helpers::get(row, 1, "samples", "session_id")?;
    let recorded_at: String = row_helpers::get(row, 5, "samples", "recorded_at")?;
    Ok(Sample {
        sequence_no: row_helpers::get(row, 0, "samples", "id")?,
        timestamp: row_helpers::get(row, 2, "samples", "timestamp")?,
        session_id: SessionId::from_raw(session_id),
        velocity: row_helpers::get(row, 3, "samples", "velocity")?,
        air_pressure: row_helpers::get(row, 4, "samples", "air_pressure")?,
        recorded_at: row_helpers::parse_timestamp(&recorded_at, "samples", "recorded_at")?,
    })
}
