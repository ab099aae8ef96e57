//! Writes a normalized result set into the analytics schema.
//!
//! [`apply_meet`] replaces one meet's subtree: the meet row is upserted by its
//! external id, every child row is deleted and reinserted, and clubs and
//! athletes are upserted by their natural keys. It must run inside the
//! caller's transaction so a failure leaves the previous version intact.

use std::collections::{BTreeSet, HashMap};

use sqlx::{PgConnection, Postgres, QueryBuilder};
use swim_common::DataSource;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::normalized::{
    AthleteRecord, ClubRecord, EventRecord, MeetInfo, MeetResults, RelayRecord, ResultRecord,
    SessionRecord,
};

/// Rows per multi-row INSERT; keeps bind parameters well under the 65535 limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// What one call to [`apply_meet`] wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub sessions: usize,
    pub events: usize,
    pub results: usize,
    pub splits: usize,
    pub relays: usize,
    pub relay_swimmers: usize,
    /// Athletes referenced by the new subtree or by the one it replaced
    pub affected_athletes: Vec<i64>,
}

pub async fn apply_meet(
    conn: &mut PgConnection,
    results: &MeetResults,
    source: DataSource,
) -> Result<ApplySummary> {
    results.validate()?;
    let meet_id = results.meet.id;

    upsert_meet(conn, &results.meet, source).await?;
    let previous_athletes = evidence_athletes(conn, meet_id).await?;
    delete_children(conn, meet_id).await?;

    let clubs = upsert_clubs(conn, &results.clubs).await?;
    upsert_athletes(conn, &results.athletes).await?;
    let sessions = insert_sessions(conn, meet_id, &results.sessions).await?;
    let events = insert_events(conn, meet_id, &results.events, &sessions).await?;
    let (result_count, split_count) =
        insert_results(conn, &results.results, &events, &clubs).await?;
    let (relay_count, swimmer_count) =
        insert_relays(conn, &results.relays, &events, &clubs).await?;
    insert_evidence(conn, meet_id, results, &clubs).await?;

    let affected: BTreeSet<i64> = previous_athletes
        .into_iter()
        .chain(results.evidence.iter().map(|e| e.athlete_id))
        .collect();

    let summary = ApplySummary {
        sessions: results.sessions.len(),
        events: events.len(),
        results: result_count,
        splits: split_count,
        relays: relay_count,
        relay_swimmers: swimmer_count,
        affected_athletes: affected.into_iter().collect(),
    };

    info!(
        meet_id,
        source = %source,
        events = summary.events,
        results = summary.results,
        splits = summary.splits,
        relays = summary.relays,
        "Meet subtree replaced"
    );

    Ok(summary)
}

/// Current data source of a meet, locking the row when it exists.
pub async fn lock_meet_source(conn: &mut PgConnection, meet_id: i64) -> Result<Option<DataSource>> {
    let source: Option<String> =
        sqlx::query_scalar("SELECT datasource FROM lx_meet WHERE id = $1 FOR UPDATE")
            .bind(meet_id)
            .fetch_optional(&mut *conn)
            .await?;

    source
        .map(|s| s.parse::<DataSource>().map_err(IngestError::from))
        .transpose()
}

async fn upsert_meet(conn: &mut PgConnection, meet: &MeetInfo, source: DataSource) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lx_meet (id, name, startdate, enddate, course, datasource)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            startdate = EXCLUDED.startdate,
            enddate = EXCLUDED.enddate,
            course = EXCLUDED.course,
            datasource = EXCLUDED.datasource,
            updatedat = now()
        "#,
    )
    .bind(meet.id)
    .bind(&meet.name)
    .bind(meet.start_date)
    .bind(meet.end_date)
    .bind(&meet.course)
    .bind(source.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn evidence_athletes(conn: &mut PgConnection, meet_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT athleteid FROM lx_athletemeetclub WHERE meetid = $1",
    )
    .bind(meet_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

// Splits and relay swimmers go with their parents through ON DELETE CASCADE.
async fn delete_children(conn: &mut PgConnection, meet_id: i64) -> Result<()> {
    const STATEMENTS: &[&str] = &[
        "DELETE FROM lx_result WHERE eventid IN (SELECT id FROM lx_event WHERE meetid = $1)",
        "DELETE FROM lx_relayresult WHERE eventid IN (SELECT id FROM lx_event WHERE meetid = $1)",
        "DELETE FROM lx_event WHERE meetid = $1",
        "DELETE FROM lx_session WHERE meetid = $1",
        "DELETE FROM lx_athletemeetclub WHERE meetid = $1",
    ];

    for statement in STATEMENTS {
        let deleted = sqlx::query(statement)
            .bind(meet_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        debug!(meet_id, deleted, statement, "Cleared previous meet rows");
    }

    Ok(())
}

async fn upsert_clubs(
    conn: &mut PgConnection,
    clubs: &[ClubRecord],
) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::with_capacity(clubs.len());

    // Rows are locked in key order so concurrent imports sharing clubs
    // cannot deadlock on each other.
    let mut ordered: Vec<&ClubRecord> = clubs.iter().collect();
    ordered.sort_by(|a, b| a.code.cmp(&b.code));

    for club in ordered {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lx_club (lenexclubcode, name, nation)
            VALUES ($1, $2, $3)
            ON CONFLICT (lenexclubcode) DO UPDATE SET
                name = EXCLUDED.name,
                nation = COALESCE(EXCLUDED.nation, lx_club.nation)
            RETURNING id
            "#,
        )
        .bind(&club.code)
        .bind(&club.name)
        .bind(&club.nation)
        .fetch_one(&mut *conn)
        .await?;

        ids.insert(club.code.clone(), id);
    }

    Ok(ids)
}

async fn upsert_athletes(conn: &mut PgConnection, athletes: &[AthleteRecord]) -> Result<()> {
    let mut ordered: Vec<&AthleteRecord> = athletes.iter().collect();
    ordered.sort_by_key(|athlete| athlete.id);

    for chunk in ordered.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO lx_athlete (id, firstname, lastname, birthdate, gender) ",
        );
        builder.push_values(chunk.iter().copied(), |mut row, athlete| {
            row.push_bind(athlete.id)
                .push_bind(&athlete.first_name)
                .push_bind(&athlete.last_name)
                .push_bind(athlete.birth_date)
                .push_bind(athlete.gender.map(|g| g.as_str()));
        });
        builder.push(
            r#"
            ON CONFLICT (id) DO UPDATE SET
                firstname = COALESCE(NULLIF(EXCLUDED.firstname, ''), lx_athlete.firstname),
                lastname = COALESCE(NULLIF(EXCLUDED.lastname, ''), lx_athlete.lastname),
                birthdate = COALESCE(EXCLUDED.birthdate, lx_athlete.birthdate),
                gender = COALESCE(EXCLUDED.gender, lx_athlete.gender)
            "#,
        );
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn insert_sessions(
    conn: &mut PgConnection,
    meet_id: i64,
    sessions: &[SessionRecord],
) -> Result<HashMap<i32, i64>> {
    let mut ids = HashMap::with_capacity(sessions.len());

    for session in sessions {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO lx_session (meetid, sessionnumber, sessiondate) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(meet_id)
        .bind(session.number)
        .bind(session.date)
        .fetch_one(&mut *conn)
        .await?;
        ids.insert(session.number, id);
    }

    Ok(ids)
}

async fn insert_events(
    conn: &mut PgConnection,
    meet_id: i64,
    events: &[EventRecord],
    sessions: &HashMap<i32, i64>,
) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::with_capacity(events.len());

    for event in events {
        let session_id = event.session_number.and_then(|n| sessions.get(&n).copied());
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lx_event (meetid, sessionid, eventnumber, stroke, distance, relaycount, round, gender)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(meet_id)
        .bind(session_id)
        .bind(event.number)
        .bind(event.stroke.as_str())
        .bind(event.distance)
        .bind(event.relay_count)
        .bind(&event.round)
        .bind(event.gender.as_str())
        .fetch_one(&mut *conn)
        .await?;
        ids.insert(event.key.clone(), id);
    }

    Ok(ids)
}

fn lookup<K, Q>(map: &HashMap<K, i64>, key: &Q, what: &str) -> Result<i64>
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + std::fmt::Debug + ?Sized,
{
    map.get(key)
        .copied()
        .ok_or_else(|| IngestError::parse(format!("unresolved {what} {key:?}")))
}

async fn insert_results(
    conn: &mut PgConnection,
    results: &[ResultRecord],
    events: &HashMap<String, i64>,
    clubs: &HashMap<String, i64>,
) -> Result<(usize, usize)> {
    let mut splits: Vec<(i64, i32, i32)> = Vec::new();

    for result in results {
        let event_id = lookup(events, result.event_key.as_str(), "event")?;
        let club_id = lookup(clubs, result.club_code.as_str(), "club")?;

        let result_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lx_result (
                eventid, heatnumber, athleteid, clubid, lane, timehundredths,
                status, rank, reactiontimehundredths, finapoints
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(result.heat_number)
        .bind(result.athlete_id)
        .bind(club_id)
        .bind(result.lane)
        .bind(result.time)
        .bind(&result.status)
        .bind(result.rank)
        .bind(result.reaction_time)
        .bind(result.points)
        .fetch_one(&mut *conn)
        .await?;

        splits.extend(result.splits.iter().map(|s| (result_id, s.distance, s.time)));
    }

    for chunk in splits.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO lx_split (resultid, distance, timehundredths) ");
        builder.push_values(chunk, |mut row, (result_id, distance, time)| {
            row.push_bind(*result_id).push_bind(*distance).push_bind(*time);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok((results.len(), splits.len()))
}

async fn insert_relays(
    conn: &mut PgConnection,
    relays: &[RelayRecord],
    events: &HashMap<String, i64>,
    clubs: &HashMap<String, i64>,
) -> Result<(usize, usize)> {
    let mut swimmers: Vec<(i64, i64, i32, Option<i32>)> = Vec::new();

    for relay in relays {
        let event_id = lookup(events, relay.event_key.as_str(), "event")?;
        let club_id = lookup(clubs, relay.club_code.as_str(), "club")?;

        let relay_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lx_relayresult (
                eventid, heatnumber, clubid, relaynumber, lane, timehundredths,
                status, rank, finapoints
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(relay.heat_number)
        .bind(club_id)
        .bind(relay.relay_number)
        .bind(relay.lane)
        .bind(relay.time)
        .bind(&relay.status)
        .bind(relay.rank)
        .bind(relay.points)
        .fetch_one(&mut *conn)
        .await?;

        swimmers.extend(
            relay
                .swimmers
                .iter()
                .map(|s| (relay_id, s.athlete_id, s.swim_order, s.reaction_time)),
        );
    }

    for chunk in swimmers.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO lx_relayswimmer (relayresultid, athleteid, swimorder, reactiontimehundredths) ",
        );
        builder.push_values(chunk, |mut row, (relay_id, athlete_id, order, reaction)| {
            row.push_bind(*relay_id)
                .push_bind(*athlete_id)
                .push_bind(*order)
                .push_bind(*reaction);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok((relays.len(), swimmers.len()))
}

async fn insert_evidence(
    conn: &mut PgConnection,
    meet_id: i64,
    results: &MeetResults,
    clubs: &HashMap<String, i64>,
) -> Result<()> {
    let rows = results
        .evidence
        .iter()
        .map(|e| Ok((e.athlete_id, lookup(clubs, e.club_code.as_str(), "club")?)))
        .collect::<Result<Vec<(i64, i64)>>>()?;

    for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO lx_athletemeetclub (athleteid, meetid, clubid) ");
        builder.push_values(chunk, |mut row, (athlete_id, club_id)| {
            row.push_bind(*athlete_id).push_bind(meet_id).push_bind(*club_id);
        });
        builder.push(" ON CONFLICT DO NOTHING");
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}
