//! Tracked-file registry.
//!
//! One row per discoverable event in `importedlenexfile`, keyed by the
//! results site's `OnlineEventId`. Stages never write `status` directly: every
//! change goes through [`transition`], a single conditional update that only
//! applies when the row is still in the status the caller read. Work that has
//! external side effects first [`claim`]s the row, which takes a row lock that
//! concurrent runs skip instead of waiting on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::error::{IngestError, Result};

mod status;

pub use status::FileStatus;

/// A registry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedFile {
    pub event_id: i64,
    pub event_name: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub checksum: Option<String>,
    pub status: FileStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TrackedFileRow {
    onlineeventid: i64,
    eventname: Option<String>,
    eventdatefrom: Option<NaiveDate>,
    eventdateto: Option<NaiveDate>,
    url: Option<String>,
    filename: Option<String>,
    checksum: Option<String>,
    status: String,
    lasterror: Option<String>,
    createdat: DateTime<Utc>,
    updatedat: DateTime<Utc>,
}

impl TryFrom<TrackedFileRow> for TrackedFile {
    type Error = IngestError;

    fn try_from(row: TrackedFileRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .map_err(|e: anyhow::Error| IngestError::Config(e.to_string()))?;
        Ok(Self {
            event_id: row.onlineeventid,
            event_name: row.eventname,
            date_from: row.eventdatefrom,
            date_to: row.eventdateto,
            url: row.url,
            filename: row.filename,
            checksum: row.checksum,
            status,
            last_error: row.lasterror,
            created_at: row.createdat,
            updated_at: row.updatedat,
        })
    }
}

const SELECT_COLUMNS: &str = "onlineeventid, eventname, eventdatefrom, eventdateto, url, \
     filename, checksum, status, lasterror, createdat, updatedat";

/// An event found on the results site index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub event_id: i64,
    pub event_name: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub source_url: Option<String>,
}

/// Columns written together with a status change.
///
/// `None` leaves the stored value alone, except `last_error` which is always
/// replaced so a successful transition clears an earlier failure message.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub filename: Option<String>,
    pub url: Option<String>,
    pub checksum: Option<String>,
    pub last_error: Option<String>,
}

impl EntryUpdate {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            last_error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Insert a newly discovered event as `pending`, or refresh the descriptive
/// columns of a known one. Status is never touched. Returns `true` on insert.
///
/// The source URL is refreshed only while the entry is `pending`; once fetch
/// has run the column holds the results file URL it recorded.
pub async fn upsert_discovered(conn: &mut PgConnection, entry: &NewEntry) -> Result<bool> {
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO importedlenexfile (onlineeventid, eventname, eventdatefrom, eventdateto, url, status)
        VALUES ($1, $2, $3, $4, $5, 'pending')
        ON CONFLICT (onlineeventid) DO UPDATE SET
            eventname = EXCLUDED.eventname,
            eventdatefrom = COALESCE(EXCLUDED.eventdatefrom, importedlenexfile.eventdatefrom),
            eventdateto = COALESCE(EXCLUDED.eventdateto, importedlenexfile.eventdateto),
            url = CASE WHEN importedlenexfile.status = 'pending'
                       THEN COALESCE(EXCLUDED.url, importedlenexfile.url)
                       ELSE importedlenexfile.url END,
            updatedat = now()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(entry.event_id)
    .bind(&entry.event_name)
    .bind(entry.date_from)
    .bind(entry.date_to)
    .bind(&entry.source_url)
    .fetch_one(&mut *conn)
    .await?;

    Ok(inserted)
}

pub async fn get(conn: &mut PgConnection, event_id: i64) -> Result<Option<TrackedFile>> {
    let row: Option<TrackedFileRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM importedlenexfile WHERE onlineeventid = $1"
    ))
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TrackedFile::try_from).transpose()
}

/// Entries in `status`, oldest meets first.
pub async fn list_by_status(
    conn: &mut PgConnection,
    status: FileStatus,
    limit: Option<i64>,
) -> Result<Vec<TrackedFile>> {
    let rows: Vec<TrackedFileRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM importedlenexfile \
         WHERE status = $1 \
         ORDER BY eventdatefrom NULLS LAST, onlineeventid \
         LIMIT $2"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TrackedFile::try_from).collect()
}

/// Lock the entry for the rest of the caller's transaction, provided it is
/// still `expected` and no other run holds it.
///
/// Both "status moved on" and "locked by someone else" surface as
/// [`IngestError::StaleState`]; a fresh read through [`get`] tells them apart.
pub async fn claim(
    conn: &mut PgConnection,
    event_id: i64,
    expected: FileStatus,
) -> Result<TrackedFile> {
    let row: Option<TrackedFileRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM importedlenexfile \
         WHERE onlineeventid = $1 AND status = $2 \
         FOR UPDATE SKIP LOCKED"
    ))
    .bind(event_id)
    .bind(expected.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => TrackedFile::try_from(row),
        None => Err(IngestError::StaleState { event_id, expected }),
    }
}

/// Move an entry along a forward edge of the state machine.
pub async fn transition(
    conn: &mut PgConnection,
    event_id: i64,
    from: FileStatus,
    to: FileStatus,
    update: &EntryUpdate,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(IngestError::IllegalTransition { from, to });
    }

    compare_and_set(conn, event_id, from, to, update).await?;
    debug!(event_id, %from, %to, "Registry entry advanced");
    Ok(())
}

/// Apply the operator reset for the entry's current status.
///
/// Returns the `(from, to)` pair that was applied.
pub async fn reset(conn: &mut PgConnection, event_id: i64) -> Result<(FileStatus, FileStatus)> {
    let entry = get(conn, event_id)
        .await?
        .ok_or(IngestError::UnknownEntry(event_id))?;

    let from = entry.status;
    let to = from.reset_target().ok_or(IngestError::IllegalTransition {
        from,
        to: FileStatus::Pending,
    })?;

    compare_and_set(conn, event_id, from, to, &EntryUpdate::default()).await?;
    info!(event_id, %from, %to, "Registry entry reset");
    Ok((from, to))
}

/// Entry counts per status, in state machine order, including zero counts.
pub async fn status_counts(conn: &mut PgConnection) -> Result<Vec<(FileStatus, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM importedlenexfile GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;

    Ok(FileStatus::ALL
        .into_iter()
        .map(|status| {
            let count = rows
                .iter()
                .find(|(name, _)| name == status.as_str())
                .map(|(_, count)| *count)
                .unwrap_or(0);
            (status, count)
        })
        .collect())
}

async fn compare_and_set(
    conn: &mut PgConnection,
    event_id: i64,
    from: FileStatus,
    to: FileStatus,
    update: &EntryUpdate,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE importedlenexfile SET
            status = $3,
            filename = COALESCE($4, filename),
            url = COALESCE($5, url),
            checksum = COALESCE($6, checksum),
            lasterror = $7,
            updatedat = now()
        WHERE onlineeventid = $1 AND status = $2
        "#,
    )
    .bind(event_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(&update.filename)
    .bind(&update.url)
    .bind(&update.checksum)
    .bind(&update.last_error)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(IngestError::StaleState {
            event_id,
            expected: from,
        });
    }

    Ok(())
}
