//! Athlete club affiliation timelines.
//!
//! A timeline is derived, never edited: for each affected athlete the whole
//! interval sequence is recomputed from the `(meet, club)` evidence recorded
//! by imports and written over the previous one. Intervals are half-open
//! `[valid_from, valid_to)`; the last one is open (`valid_to = None`).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::Result;

/// One athlete appearing for one club at one meet
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MeetEvidence {
    pub meet_id: i64,
    pub meet_date: NaiveDate,
    /// Last time the meet's subtree was written
    pub meet_ingested_at: DateTime<Utc>,
    pub club_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationInterval {
    pub club_id: i64,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub source_meet_id: i64,
}

/// Derive the interval sequence from one athlete's evidence.
///
/// Evidence is ordered by meet start date. When several meets share a date the
/// most recently ingested meet decides the club for that date (meet id, then
/// club id, break remaining ties). A meet re-imported later counts from its
/// latest write, not its first. The losing evidence stays recorded against
/// its meet; it simply does not shape the timeline.
pub fn build_timeline(evidence: &[MeetEvidence]) -> Vec<AffiliationInterval> {
    let mut by_date: BTreeMap<NaiveDate, &MeetEvidence> = BTreeMap::new();
    for item in evidence {
        by_date
            .entry(item.meet_date)
            .and_modify(|current| {
                if precedence(item) > precedence(current) {
                    *current = item;
                }
            })
            .or_insert(item);
    }

    let mut intervals: Vec<AffiliationInterval> = Vec::new();
    for (date, item) in by_date {
        match intervals.last_mut() {
            Some(open) if open.club_id == item.club_id => {},
            Some(open) => {
                open.valid_to = Some(date);
                intervals.push(open_interval(date, item));
            },
            None => intervals.push(open_interval(date, item)),
        }
    }

    intervals
}

fn precedence(item: &MeetEvidence) -> (DateTime<Utc>, i64, i64) {
    (item.meet_ingested_at, item.meet_id, item.club_id)
}

fn open_interval(date: NaiveDate, item: &MeetEvidence) -> AffiliationInterval {
    AffiliationInterval {
        club_id: item.club_id,
        valid_from: date,
        valid_to: None,
        source_meet_id: item.meet_id,
    }
}

/// Recompute and replace the timelines of `athlete_ids`.
///
/// Returns the number of intervals written.
pub async fn rebuild_timelines(conn: &mut PgConnection, athlete_ids: &[i64]) -> Result<usize> {
    let mut written = 0;

    for &athlete_id in athlete_ids {
        let evidence: Vec<MeetEvidence> = sqlx::query_as(
            r#"
            SELECT amc.meetid AS meet_id,
                   m.startdate AS meet_date,
                   m.updatedat AS meet_ingested_at,
                   amc.clubid AS club_id
            FROM lx_athletemeetclub amc
            JOIN lx_meet m ON m.id = amc.meetid
            WHERE amc.athleteid = $1 AND m.startdate IS NOT NULL
            "#,
        )
        .bind(athlete_id)
        .fetch_all(&mut *conn)
        .await?;

        let intervals = build_timeline(&evidence);

        sqlx::query("DELETE FROM lx_athleteclubaffiliation WHERE athleteid = $1")
            .bind(athlete_id)
            .execute(&mut *conn)
            .await?;

        if !intervals.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO lx_athleteclubaffiliation (athleteid, clubid, validfrom, validto, sourcemeetid) ",
            );
            builder.push_values(&intervals, |mut row, interval| {
                row.push_bind(athlete_id)
                    .push_bind(interval.club_id)
                    .push_bind(interval.valid_from)
                    .push_bind(interval.valid_to)
                    .push_bind(interval.source_meet_id);
            });
            builder.build().execute(&mut *conn).await?;
        }

        debug!(athlete_id, intervals = intervals.len(), "Affiliation timeline rebuilt");
        written += intervals.len();
    }

    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CLUB_A: i64 = 1;
    const CLUB_B: i64 = 2;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn evidence(meet_id: i64, meet_date: NaiveDate, ingested_minute: u32, club_id: i64) -> MeetEvidence {
        MeetEvidence {
            meet_id,
            meet_date,
            meet_ingested_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, ingested_minute, 0).unwrap(),
            club_id,
        }
    }

    fn assert_well_formed(intervals: &[AffiliationInterval]) {
        assert!(intervals.iter().filter(|i| i.valid_to.is_none()).count() <= 1);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].valid_to, Some(pair[1].valid_from));
            assert!(pair[0].valid_from < pair[1].valid_from);
        }
        if let Some(last) = intervals.last() {
            assert_eq!(last.valid_to, None);
        }
    }

    #[test]
    fn test_club_change_closes_interval() {
        let intervals = build_timeline(&[
            evidence(10, date(2023, 1, 1), 0, CLUB_A),
            evidence(11, date(2023, 6, 1), 0, CLUB_B),
        ]);

        assert_eq!(
            intervals,
            vec![
                AffiliationInterval {
                    club_id: CLUB_A,
                    valid_from: date(2023, 1, 1),
                    valid_to: Some(date(2023, 6, 1)),
                    source_meet_id: 10,
                },
                AffiliationInterval {
                    club_id: CLUB_B,
                    valid_from: date(2023, 6, 1),
                    valid_to: None,
                    source_meet_id: 11,
                },
            ]
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let items = vec![
            evidence(11, date(2023, 6, 1), 0, CLUB_B),
            evidence(12, date(2023, 9, 1), 0, CLUB_B),
            evidence(10, date(2023, 1, 1), 0, CLUB_A),
        ];
        let mut reversed = items.clone();
        reversed.reverse();

        let intervals = build_timeline(&items);
        assert_eq!(intervals, build_timeline(&reversed));
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[1].source_meet_id, 11);
        assert_well_formed(&intervals);
    }

    #[test]
    fn test_same_club_extends_open_interval() {
        let intervals = build_timeline(&[
            evidence(10, date(2023, 1, 1), 0, CLUB_A),
            evidence(11, date(2023, 3, 1), 0, CLUB_A),
            evidence(12, date(2023, 5, 1), 0, CLUB_A),
        ]);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].valid_to, None);
        assert_eq!(intervals[0].source_meet_id, 10);
    }

    #[test]
    fn test_same_date_latest_ingested_meet_wins() {
        let intervals = build_timeline(&[
            evidence(10, date(2023, 1, 1), 0, CLUB_A),
            evidence(20, date(2023, 6, 1), 5, CLUB_B),
            evidence(21, date(2023, 6, 1), 1, CLUB_A),
        ]);

        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[1].club_id, CLUB_B);
        assert_eq!(intervals[1].source_meet_id, 20);
        assert_well_formed(&intervals);
    }

    #[test]
    fn test_switch_back_opens_new_interval() {
        let intervals = build_timeline(&[
            evidence(10, date(2022, 1, 1), 0, CLUB_A),
            evidence(11, date(2022, 6, 1), 0, CLUB_B),
            evidence(12, date(2023, 1, 1), 0, CLUB_A),
        ]);
        let clubs: Vec<_> = intervals.iter().map(|i| i.club_id).collect();
        assert_eq!(clubs, vec![CLUB_A, CLUB_B, CLUB_A]);
        assert_well_formed(&intervals);
    }

    #[test]
    fn test_no_evidence_no_intervals() {
        assert!(build_timeline(&[]).is_empty());
    }
}
