//! LENEX results file adapter.
//!
//! Accepts a plain `.lef` XML document or a zipped `.lxf` container and
//! produces the normalized result set for one meet. Only the first `MEET` of a
//! document is read; the site publishes one meet per file.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use swim_common::time::{parse_date, parse_reaction_time, parse_swim_time};
use swim_common::{Gender, Stroke};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::normalized::{
    AthleteRecord, ClubRecord, EventRecord, MeetInfo, MeetResults, RelayRecord,
    RelaySwimmerRecord, ResultRecord, SessionRecord, SplitRecord,
};

mod model;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Largest unpacked `.lef` accepted from a container.
const MAX_LEF_SIZE: u64 = 256 * 1024 * 1024;

/// Upper bound on the buffer reserved from the size a zip header claims.
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

/// Club codes are truncated to the column width used for name-derived codes.
const MAX_CLUB_CODE_LEN: usize = 32;

const DEFAULT_COURSE: &str = "LCM";

/// Parse a stored results file into the normalized set for meet `meet_id`.
pub fn parse_lenex(bytes: &[u8], meet_id: i64) -> Result<MeetResults> {
    let xml = decode(bytes)?;
    let document: model::Lenex = quick_xml::de::from_str(&xml)?;

    let meet = document
        .meets
        .and_then(|meets| meets.meets.into_iter().next())
        .ok_or_else(|| IngestError::parse("results file contains no MEET"))?;

    let mut builder = Builder::new(meet_id, &meet);
    builder.read_sessions(&meet)?;
    builder.read_clubs(&meet)?;
    let results = builder.finish()?;

    debug!(
        meet_id,
        events = results.events.len(),
        results = results.results.len(),
        relays = results.relays.len(),
        skipped = results.skipped,
        "Parsed results file"
    );

    Ok(results)
}

/// Unpack a zipped container if needed and return the XML text.
fn decode(bytes: &[u8]) -> Result<String> {
    let raw = if bytes.starts_with(ZIP_MAGIC) {
        unzip_first_lef(bytes, MAX_LEF_SIZE)?
    } else {
        bytes.to_vec()
    };

    match String::from_utf8(raw) {
        Ok(text) => Ok(text),
        Err(err) => {
            warn!("Results file is not valid UTF-8, decoding lossily");
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        },
    }
}

fn unzip_first_lef(bytes: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|f| f.is_file() && f.name().to_lowercase().ends_with(".lef"))
                .unwrap_or(false)
        })
        .ok_or_else(|| IngestError::parse("results archive contains no .lef entry"))?;

    let entry = archive.by_index(index)?;
    let hint = entry.size().min(PREALLOC_LIMIT).min(limit);
    let mut out = Vec::with_capacity(usize::try_from(hint).unwrap_or_default());
    entry
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::parse(format!("results archive: {}", e)))?;
    if out.len() as u64 > limit {
        return Err(IngestError::parse(format!(
            "results archive entry exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

fn attr(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn attr_int(value: &Option<String>) -> Option<i32> {
    attr(value).and_then(|v| v.parse().ok())
}

struct Builder {
    results: MeetResults,
    /// (event key, heat key) -> heat number
    heats: HashMap<(String, String), i32>,
    event_keys: HashSet<String>,
    club_codes: HashSet<String>,
    athlete_ids: HashSet<i64>,
}

impl Builder {
    fn new(meet_id: i64, meet: &model::Meet) -> Self {
        let info = MeetInfo {
            id: meet_id,
            name: attr(&meet.name).unwrap_or("Unknown").to_string(),
            start_date: None,
            end_date: None,
            course: attr(&meet.course)
                .map(str::to_uppercase)
                .unwrap_or_else(|| DEFAULT_COURSE.to_string()),
        };
        Self {
            results: MeetResults::new(info),
            heats: HashMap::new(),
            event_keys: HashSet::new(),
            club_codes: HashSet::new(),
            athlete_ids: HashSet::new(),
        }
    }

    fn read_sessions(&mut self, meet: &model::Meet) -> Result<()> {
        let Some(sessions) = &meet.sessions else {
            return Ok(());
        };

        for (index, session) in sessions.sessions.iter().enumerate() {
            let number = attr_int(&session.number).unwrap_or(index as i32 + 1);
            self.results.sessions.push(SessionRecord {
                number,
                date: attr(&session.date).and_then(parse_date),
            });

            let Some(events) = &session.events else {
                continue;
            };
            for event in &events.events {
                self.read_event(number, event);
            }
        }

        Ok(())
    }

    fn read_event(&mut self, session_number: i32, event: &model::Event) {
        let Some(key) = attr(&event.event_id).or(attr(&event.number)) else {
            debug!(session_number, "Event without eventid or number ignored");
            return;
        };
        if !self.event_keys.insert(key.to_string()) {
            debug!(event = key, "Duplicate event ignored");
            return;
        }

        let style = event.swim_style.as_ref();
        let stroke = style
            .and_then(|s| attr(&s.stroke))
            .map(Stroke::from_code)
            .unwrap_or(Stroke::Free);
        let distance = style.and_then(|s| attr_int(&s.distance)).unwrap_or(0);
        let relay_count = style.and_then(|s| attr_int(&s.relay_count)).unwrap_or(1);

        self.results.events.push(EventRecord {
            key: key.to_string(),
            session_number: Some(session_number),
            number: attr_int(&event.number),
            stroke,
            distance,
            relay_count,
            round: attr(&event.round).map(str::to_uppercase),
            gender: attr(&event.gender)
                .and_then(|g| g.parse().ok())
                .unwrap_or(Gender::Mixed),
        });

        if let Some(heats) = &event.heats {
            for (index, heat) in heats.heats.iter().enumerate() {
                let number = attr_int(&heat.number).unwrap_or(index as i32 + 1);
                if let Some(heat_key) = attr(&heat.heat_id).or(attr(&heat.number)) {
                    self.heats
                        .insert((key.to_string(), heat_key.to_string()), number);
                }
            }
        }
    }

    fn read_clubs(&mut self, meet: &model::Meet) -> Result<()> {
        let Some(clubs) = &meet.clubs else {
            return Ok(());
        };

        for club in &clubs.clubs {
            let code = club_code(club);
            if self.club_codes.insert(code.clone()) {
                self.results.clubs.push(ClubRecord {
                    code: code.clone(),
                    name: attr(&club.name).unwrap_or(&code).to_string(),
                    nation: attr(&club.nation).map(|n| n.chars().take(3).collect()),
                });
            }

            if let Some(athletes) = &club.athletes {
                for athlete in &athletes.athletes {
                    self.read_athlete(&code, athlete)?;
                }
            }

            if let Some(relays) = &club.relays {
                for relay in &relays.relays {
                    self.read_relay(&code, relay)?;
                }
            }
        }

        Ok(())
    }

    fn read_athlete(&mut self, club_code: &str, athlete: &model::Athlete) -> Result<()> {
        let first_name = attr(&athlete.first_name).unwrap_or_default();
        let last_name = attr(&athlete.last_name).unwrap_or_default();

        let raw_id = attr(&athlete.athlete_id).ok_or_else(|| {
            IngestError::parse(format!(
                "athlete {first_name} {last_name} has no athleteid"
            ))
        })?;
        let id: i64 = raw_id.parse().map_err(|_| {
            IngestError::parse(format!(
                "athleteid {raw_id:?} of {first_name} {last_name} is not numeric"
            ))
        })?;

        if self.athlete_ids.insert(id) {
            self.results.athletes.push(AthleteRecord {
                id,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                birth_date: attr(&athlete.birth_date).and_then(parse_date),
                gender: attr(&athlete.gender).and_then(|g| g.parse().ok()),
            });
        }

        let Some(results) = &athlete.results else {
            return Ok(());
        };
        for entry in &results.results {
            let Some((event_key, heat_number)) = self.resolve_heat(entry) else {
                self.results.skipped += 1;
                continue;
            };
            let (time, status) = time_and_status(entry)?;

            self.results.results.push(ResultRecord {
                event_key,
                heat_number,
                athlete_id: id,
                club_code: club_code.to_string(),
                lane: attr_int(&entry.lane),
                time,
                status,
                rank: attr_int(&entry.place),
                reaction_time: attr(&entry.reaction_time)
                    .and_then(|r| parse_reaction_time(r).ok().flatten()),
                points: attr_int(&entry.points),
                splits: read_splits(entry)?,
            });
        }

        Ok(())
    }

    // Relay swimmers reference athletes of the same club, which are listed
    // before the relays in every file the site publishes.
    fn read_relay(&mut self, club_code: &str, relay: &model::Relay) -> Result<()> {
        let Some(results) = &relay.results else {
            return Ok(());
        };

        for entry in &results.results {
            let Some((event_key, heat_number)) = self.resolve_heat(entry) else {
                self.results.skipped += 1;
                continue;
            };
            let (time, status) = time_and_status(entry)?;

            let mut swimmers = Vec::new();
            if let Some(positions) = &entry.relay_positions {
                for (index, position) in positions.positions.iter().enumerate() {
                    let Some(athlete_id) = attr(&position.athlete_id).and_then(|a| a.parse().ok())
                    else {
                        continue;
                    };
                    if !self.athlete_ids.contains(&athlete_id) {
                        debug!(athlete_id, "Relay position for unlisted athlete ignored");
                        continue;
                    }
                    swimmers.push(RelaySwimmerRecord {
                        athlete_id,
                        swim_order: attr_int(&position.number).unwrap_or(index as i32 + 1),
                        reaction_time: attr(&position.reaction_time)
                            .and_then(|r| parse_reaction_time(r).ok().flatten()),
                    });
                }
            }

            self.results.relays.push(RelayRecord {
                event_key,
                heat_number,
                club_code: club_code.to_string(),
                relay_number: attr_int(&relay.number),
                lane: attr_int(&entry.lane),
                time,
                status,
                rank: attr_int(&entry.place),
                points: attr_int(&entry.points),
                swimmers,
            });
        }

        Ok(())
    }

    fn resolve_heat(&self, entry: &model::ResultEntry) -> Option<(String, i32)> {
        let event_key = attr(&entry.event_id)?;
        let heat_key = attr(&entry.heat_id)?;
        let number = self
            .heats
            .get(&(event_key.to_string(), heat_key.to_string()))?;
        Some((event_key.to_string(), *number))
    }

    fn finish(mut self) -> Result<MeetResults> {
        self.results.fill_dates_from_sessions();
        self.results.collect_evidence();
        self.results.validate()?;
        Ok(self.results)
    }
}

fn club_code(club: &model::Club) -> String {
    attr(&club.code)
        .map(str::to_string)
        .or_else(|| attr(&club.name).map(|n| n.chars().take(MAX_CLUB_CODE_LEN).collect()))
        .unwrap_or_else(|| "UNK".to_string())
}

/// Time in hundredths plus the status, which falls back to a status token
/// written in the time field.
fn time_and_status(entry: &model::ResultEntry) -> Result<(Option<i32>, Option<String>)> {
    let raw_time = attr(&entry.swim_time);
    let time = match raw_time {
        Some(raw) => parse_swim_time(raw)?,
        None => None,
    };

    let status = attr(&entry.status)
        .map(|s| s.to_uppercase())
        .or_else(|| match (raw_time, time) {
            (Some(raw), None) => Some(raw.to_uppercase()),
            _ => None,
        })
        .map(|s| s.chars().take(10).collect());

    Ok((time, status))
}

fn read_splits(entry: &model::ResultEntry) -> Result<Vec<SplitRecord>> {
    let Some(splits) = &entry.splits else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(splits.splits.len());
    for split in &splits.splits {
        let (Some(distance), Some(raw)) = (attr_int(&split.distance), attr(&split.swim_time)) else {
            continue;
        };
        if let Some(time) = parse_swim_time(raw)? {
            out.push(SplitRecord { distance, time });
        }
    }
    Ok(out)
}
