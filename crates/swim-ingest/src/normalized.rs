//! Normalized result set.
//!
//! Both adapters (results file and result pages) produce a [`MeetResults`];
//! [`crate::store::apply_meet`] is the only code that writes one to the
//! database. Events are addressed by a key local to the meet, results by
//! `(event, heat number)`, clubs by their natural code and athletes by their
//! natural id.

use std::collections::HashSet;

use chrono::NaiveDate;
use swim_common::{Gender, Stroke};

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetInfo {
    /// External event id; also the registry key
    pub id: i64,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub course: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub number: i32,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Identifier of the event within this meet only
    pub key: String,
    pub session_number: Option<i32>,
    pub number: Option<i32>,
    pub stroke: Stroke,
    pub distance: i32,
    pub relay_count: i32,
    pub round: Option<String>,
    pub gender: Gender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubRecord {
    pub code: String,
    pub name: String,
    pub nation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AthleteRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    pub distance: i32,
    pub time: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub event_key: String,
    pub heat_number: i32,
    pub athlete_id: i64,
    pub club_code: String,
    pub lane: Option<i32>,
    /// Hundredths of a second
    pub time: Option<i32>,
    pub status: Option<String>,
    pub rank: Option<i32>,
    pub reaction_time: Option<i32>,
    pub points: Option<i32>,
    pub splits: Vec<SplitRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySwimmerRecord {
    pub athlete_id: i64,
    pub swim_order: i32,
    pub reaction_time: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub event_key: String,
    pub heat_number: i32,
    pub club_code: String,
    pub relay_number: Option<i32>,
    pub lane: Option<i32>,
    pub time: Option<i32>,
    pub status: Option<String>,
    pub rank: Option<i32>,
    pub points: Option<i32>,
    pub swimmers: Vec<RelaySwimmerRecord>,
}

/// An athlete represented a club at this meet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Evidence {
    pub athlete_id: i64,
    pub club_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetResults {
    pub meet: MeetInfo,
    pub sessions: Vec<SessionRecord>,
    pub events: Vec<EventRecord>,
    pub clubs: Vec<ClubRecord>,
    pub athletes: Vec<AthleteRecord>,
    pub results: Vec<ResultRecord>,
    pub relays: Vec<RelayRecord>,
    pub evidence: Vec<Evidence>,
    /// Results dropped because their event or heat could not be resolved
    pub skipped: usize,
}

impl MeetResults {
    pub fn new(meet: MeetInfo) -> Self {
        Self {
            meet,
            sessions: Vec::new(),
            events: Vec::new(),
            clubs: Vec::new(),
            athletes: Vec::new(),
            results: Vec::new(),
            relays: Vec::new(),
            evidence: Vec::new(),
            skipped: 0,
        }
    }

    /// Derive the meet date range from session dates where the source did
    /// not give one.
    pub fn fill_dates_from_sessions(&mut self) {
        let dates = self.sessions.iter().filter_map(|s| s.date);
        let (min, max) = dates.fold((None, None), |(min, max): (Option<NaiveDate>, Option<NaiveDate>), d| {
            (
                Some(min.map_or(d, |m| m.min(d))),
                Some(max.map_or(d, |m| m.max(d))),
            )
        });
        if self.meet.start_date.is_none() {
            self.meet.start_date = min;
        }
        if self.meet.end_date.is_none() {
            self.meet.end_date = max;
        }
    }

    /// Record evidence for every result and relay leg, deduplicated.
    pub fn collect_evidence(&mut self) {
        let mut seen: HashSet<Evidence> = self.evidence.drain(..).collect();
        let individual = self.results.iter().map(|r| Evidence {
            athlete_id: r.athlete_id,
            club_code: r.club_code.clone(),
        });
        let relay = self.relays.iter().flat_map(|relay| {
            relay.swimmers.iter().map(move |s| Evidence {
                athlete_id: s.athlete_id,
                club_code: relay.club_code.clone(),
            })
        });
        for evidence in individual.chain(relay) {
            seen.insert(evidence);
        }
        let mut evidence: Vec<Evidence> = seen.into_iter().collect();
        evidence.sort_by(|a, b| (a.athlete_id, &a.club_code).cmp(&(b.athlete_id, &b.club_code)));
        self.evidence = evidence;
    }

    /// Every reference inside the set resolves to a record in the set.
    ///
    /// Catching this here turns a would-be foreign key failure into a parse
    /// error that names the offending record.
    pub fn validate(&self) -> Result<()> {
        let events: HashSet<&str> = self.events.iter().map(|e| e.key.as_str()).collect();
        let clubs: HashSet<&str> = self.clubs.iter().map(|c| c.code.as_str()).collect();
        let athletes: HashSet<i64> = self.athletes.iter().map(|a| a.id).collect();
        let sessions: HashSet<i32> = self.sessions.iter().map(|s| s.number).collect();

        if events.len() != self.events.len() {
            return Err(IngestError::parse("duplicate event key in meet"));
        }

        for event in &self.events {
            if let Some(number) = event.session_number {
                if !sessions.contains(&number) {
                    return Err(IngestError::parse(format!(
                        "event {} references unknown session {}",
                        event.key, number
                    )));
                }
            }
        }

        for result in &self.results {
            if !events.contains(result.event_key.as_str()) {
                return Err(IngestError::parse(format!(
                    "result references unknown event {}",
                    result.event_key
                )));
            }
            if !clubs.contains(result.club_code.as_str()) {
                return Err(IngestError::parse(format!(
                    "result references unknown club {}",
                    result.club_code
                )));
            }
            if !athletes.contains(&result.athlete_id) {
                return Err(IngestError::parse(format!(
                    "result references unknown athlete {}",
                    result.athlete_id
                )));
            }
        }

        for relay in &self.relays {
            if !events.contains(relay.event_key.as_str()) {
                return Err(IngestError::parse(format!(
                    "relay references unknown event {}",
                    relay.event_key
                )));
            }
            if !clubs.contains(relay.club_code.as_str()) {
                return Err(IngestError::parse(format!(
                    "relay references unknown club {}",
                    relay.club_code
                )));
            }
            if let Some(swimmer) = relay.swimmers.iter().find(|s| !athletes.contains(&s.athlete_id)) {
                return Err(IngestError::parse(format!(
                    "relay swimmer references unknown athlete {}",
                    swimmer.athlete_id
                )));
            }
        }

        Ok(())
    }

    pub fn split_count(&self) -> usize {
        self.results.iter().map(|r| r.splits.len()).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn sample_meet() -> MeetResults {
        let mut meet = MeetResults::new(MeetInfo {
            id: 42,
            name: "Spring Open".into(),
            start_date: None,
            end_date: None,
            course: "LCM".into(),
        });
        meet.sessions = vec![
            SessionRecord { number: 1, date: Some(date(2023, 6, 2)) },
            SessionRecord { number: 2, date: Some(date(2023, 6, 1)) },
        ];
        meet.events.push(EventRecord {
            key: "1".into(),
            session_number: Some(1),
            number: Some(1),
            stroke: Stroke::Free,
            distance: 100,
            relay_count: 1,
            round: Some("TIM".into()),
            gender: Gender::Male,
        });
        meet.clubs.push(ClubRecord {
            code: "BVSC".into(),
            name: "BVSC-Zugló".into(),
            nation: Some("HUN".into()),
        });
        meet.athletes.push(AthleteRecord {
            id: 1001,
            first_name: "Anna".into(),
            last_name: "Kiss".into(),
            birth_date: None,
            gender: Some(Gender::Female),
        });
        meet.results.push(ResultRecord {
            event_key: "1".into(),
            heat_number: 1,
            athlete_id: 1001,
            club_code: "BVSC".into(),
            lane: Some(4),
            time: Some(5912),
            status: None,
            rank: Some(1),
            reaction_time: Some(65),
            points: Some(700),
            splits: vec![SplitRecord { distance: 50, time: 2850 }],
        });
        meet
    }

    #[test]
    fn test_dates_from_sessions() {
        let mut meet = sample_meet();
        meet.fill_dates_from_sessions();
        assert_eq!(meet.meet.start_date, Some(date(2023, 6, 1)));
        assert_eq!(meet.meet.end_date, Some(date(2023, 6, 2)));
    }

    #[test]
    fn test_source_dates_win() {
        let mut meet = sample_meet();
        meet.meet.start_date = Some(date(2023, 5, 31));
        meet.fill_dates_from_sessions();
        assert_eq!(meet.meet.start_date, Some(date(2023, 5, 31)));
        assert_eq!(meet.meet.end_date, Some(date(2023, 6, 2)));
    }

    #[test]
    fn test_evidence_is_deduplicated() {
        let mut meet = sample_meet();
        let mut second = meet.results[0].clone();
        second.heat_number = 2;
        meet.results.push(second);
        meet.collect_evidence();
        assert_eq!(
            meet.evidence,
            vec![Evidence { athlete_id: 1001, club_code: "BVSC".into() }]
        );
    }

    #[test]
    fn test_validate_catches_dangling_club() {
        let mut meet = sample_meet();
        assert!(meet.validate().is_ok());
        meet.results[0].club_code = "NOPE".into();
        let err = meet.validate().unwrap_err();
        assert!(err.marks_failed());
        assert!(err.to_string().contains("NOPE"));
    }
}
