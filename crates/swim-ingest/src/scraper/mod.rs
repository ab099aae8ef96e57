//! Fallback path: rebuild a meet from the live results pages.
//!
//! Used for events whose results file never appeared. The pages are walked
//! in a fixed order:
//!
//! 1. `/event/eventdata` for the meet name, dates and course
//! 2. `/event/program` for sessions, session dates and event titles
//! 3. `/event/result` per event for the heat list, then once per heat for the
//!    result table and splits
//!
//! The outcome is the same [`MeetResults`] the results-file parser produces.
//! Relay results are not published on these pages; relay events are recorded
//! without results.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use swim_common::Gender;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};
use crate::http::SourceClient;
use crate::normalized::{
    AthleteRecord, ClubRecord, EventRecord, MeetInfo, MeetResults, ResultRecord, SessionRecord,
};

pub mod pages;

use pages::{HeatRow, ProgramEvent};

const ROUND: &str = "TIM";
const DEFAULT_NATION: &str = "HUN";
const UNKNOWN_CLUB: &str = "UNK";
const CLUB_CODE_MAX_CHARS: usize = 32;

pub struct Scraper {
    client: SourceClient,
}

impl Scraper {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    /// Scrape one meet into a normalized result set.
    ///
    /// A missing page is a [`IngestError::Parse`]: the event exists in the
    /// registry, so the site not serving it means the pages are unusable.
    #[instrument(skip(self))]
    pub async fn scrape_meet(&self, event_id: i64) -> Result<MeetResults> {
        let eventdata = self.page(&format!("/event/eventdata?OnlineEventId={}", event_id)).await?;
        let meet_page = pages::parse_eventdata(&eventdata)?;

        let program = self.page(&format!("/event/program?OnlineEventId={}", event_id)).await?;
        let program = pages::parse_program(&program, self.client.base_url())?;
        info!(event_id, events = program.events.len(), "Program parsed");

        let mut results = MeetResults::new(MeetInfo {
            id: event_id,
            name: meet_page.name,
            start_date: meet_page.start_date,
            end_date: meet_page.end_date,
            course: meet_page.course,
        });

        let session_ids: BTreeSet<i32> = program.events.iter().map(|e| e.session_id).collect();
        results.sessions = session_ids
            .into_iter()
            .map(|number| SessionRecord {
                number,
                date: program.session_dates.get(&number).copied(),
            })
            .collect();

        let mut assembler = Assembler::default();
        for event in &program.events {
            let title = pages::parse_event_title(&event.title)?;
            let key = event_key(event);

            results.events.push(EventRecord {
                key: key.clone(),
                session_number: Some(event.session_id),
                number: Some(event.event_id),
                stroke: title.stroke,
                distance: title.distance,
                relay_count: title.relay_count,
                round: Some(ROUND.to_string()),
                gender: title.gender,
            });

            if title.relay_count > 1 {
                debug!(event_id, event = event.event_id, "Relay event, no individual results");
                continue;
            }

            let athlete_gender = match title.gender {
                Gender::Male | Gender::Female => Some(title.gender),
                Gender::Mixed => None,
            };

            let base = format!(
                "/event/result?OnlineEventId={}&SessionId={}&EventId={}",
                event_id, event.session_id, event.event_id
            );
            let heat_ids = pages::parse_heat_ids(&self.page(&base).await?)?;

            for (index, heat_id) in heat_ids.iter().enumerate() {
                let heat_number = index as i32 + 1;
                let html = self.page(&format!("{}&HeatId={}", base, heat_id)).await?;
                let rows = pages::parse_heat_results(&html, self.client.base_url())?;
                debug!(event = event.event_id, heat_number, rows = rows.len(), "Heat parsed");

                for row in rows {
                    let birth_date = match row.birth_year {
                        Some(year) => NaiveDate::from_ymd_opt(year, 1, 1),
                        None => self
                            .birth_year(event_id, row.athlete_id, &mut assembler.birth_years)
                            .await?
                            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
                    };
                    assembler.add(&mut results, &key, heat_number, row, birth_date, athlete_gender);
                }
            }
        }

        results.fill_dates_from_sessions();
        results.collect_evidence();

        info!(
            event_id,
            events = results.events.len(),
            results = results.results.len(),
            splits = results.split_count(),
            athletes = results.athletes.len(),
            "Meet scraped"
        );
        Ok(results)
    }

    async fn page(&self, path: &str) -> Result<String> {
        let url = self.client.join(path)?;
        match self.client.get_text(&url).await {
            Err(IngestError::NotFound(what)) => Err(IngestError::parse(format!("page missing: {}", what))),
            other => other,
        }
    }

    /// Birth year from the athlete page, looked up once per athlete per run.
    /// A failed lookup leaves the year unknown.
    async fn birth_year(
        &self,
        event_id: i64,
        athlete_id: i64,
        cache: &mut HashMap<i64, Option<i32>>,
    ) -> Result<Option<i32>> {
        if let Some(year) = cache.get(&athlete_id) {
            return Ok(*year);
        }

        let url = self
            .client
            .join(&format!("/event/swimmer?OnlineEventId={}&UMK={}", event_id, athlete_id))?;
        let year = match self.client.get_text(&url).await {
            Ok(html) => pages::parse_birth_year(&html)?,
            Err(e) => {
                debug!(athlete_id, error = %e, "Birth year lookup failed");
                None
            },
        };

        cache.insert(athlete_id, year);
        Ok(year)
    }
}

fn event_key(event: &ProgramEvent) -> String {
    format!("{}:{}", event.session_id, event.event_id)
}

/// Club code used for a club known only by its display name.
pub fn club_code(club: &str) -> String {
    let code: String = club.trim().chars().take(CLUB_CODE_MAX_CHARS).collect();
    if code.is_empty() {
        UNKNOWN_CLUB.to_string()
    } else {
        code
    }
}

#[derive(Default)]
struct Assembler {
    clubs: HashSet<String>,
    athletes: HashSet<i64>,
    seen: HashSet<(String, i32, i64)>,
    birth_years: HashMap<i64, Option<i32>>,
}

impl Assembler {
    fn add(
        &mut self,
        results: &mut MeetResults,
        event_key: &str,
        heat_number: i32,
        row: HeatRow,
        birth_date: Option<NaiveDate>,
        gender: Option<Gender>,
    ) {
        if !self.seen.insert((event_key.to_string(), heat_number, row.athlete_id)) {
            return;
        }

        let code = club_code(&row.club);
        if self.clubs.insert(code.clone()) {
            let name = if row.club.trim().is_empty() { code.clone() } else { row.club.trim().to_string() };
            results.clubs.push(ClubRecord {
                code: code.clone(),
                name,
                nation: Some(DEFAULT_NATION.to_string()),
            });
        }

        if self.athletes.insert(row.athlete_id) {
            results.athletes.push(AthleteRecord {
                id: row.athlete_id,
                first_name: row.first_name,
                last_name: row.last_name,
                birth_date,
                gender,
            });
        }

        results.results.push(ResultRecord {
            event_key: event_key.to_string(),
            heat_number,
            athlete_id: row.athlete_id,
            club_code: code,
            lane: row.lane,
            time: row.time,
            status: row.status,
            rank: row.rank,
            reaction_time: row.reaction_time,
            points: row.points,
            splits: row.splits,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use std::time::Duration;
    use swim_common::Stroke;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EVENTDATA: &str = include_str!("../../tests/fixtures/eventdata.html");
    const PROGRAM: &str = include_str!("../../tests/fixtures/program.html");
    const RESULT_EVENT: &str = include_str!("../../tests/fixtures/result_event.html");
    const RESULT_HEAT: &str = include_str!("../../tests/fixtures/result_heat.html");

    const SECOND_HEAT: &str = r#"
        <table>
          <tr><th>Hely</th><th>LN</th><th>Név</th><th>Idő</th><th>FINA</th></tr>
          <tr><td>1</td><td>4</td>
              <td><a href="/event/swimmer?OnlineEventId=1201&amp;UMK=1005">Varga Máté (2004) UTE</a></td>
              <td>1:02.00</td><td>601</td></tr>
        </table>"#;

    async fn mount_page(server: &MockServer, page: &str, params: &[(&str, &str)], body: &str) {
        let mut mock = Mock::given(method("GET")).and(path(page));
        for (name, value) in params {
            mock = mock.and(query_param(*name, *value));
        }
        mock.respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn site() -> MockServer {
        let server = MockServer::start().await;
        mount_page(&server, "/event/eventdata", &[], EVENTDATA).await;
        mount_page(&server, "/event/program", &[], PROGRAM).await;
        mount_page(&server, "/event/result", &[("EventId", "1"), ("HeatId", "5501")], RESULT_HEAT).await;
        mount_page(&server, "/event/result", &[("EventId", "1"), ("HeatId", "5502")], SECOND_HEAT).await;
        mount_page(&server, "/event/result", &[("EventId", "1")], RESULT_EVENT).await;
        mount_page(&server, "/event/result", &[("EventId", "2")], "<p>Nincs eredmény</p>").await;
        Mock::given(method("GET"))
            .and(path("/event/swimmer"))
            .and(query_param("UMK", "1002"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h4>Nagy Bence Péter (2004)</h4>"))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn scraper_for(server: &MockServer) -> Scraper {
        let config = SourceConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_retries: 1,
            user_agent: "swim-ingest-test".to_string(),
        };
        Scraper::new(
            SourceClient::new(&config)
                .unwrap()
                .with_backoff(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_scrape_meet_assembles_result_set() {
        let server = site().await;
        let results = scraper_for(&server).scrape_meet(1201).await.unwrap();

        assert_eq!(results.meet.name, "Tavaszi Kupa");
        assert_eq!(results.meet.course, "LCM");
        assert_eq!(results.sessions.len(), 2);
        assert_eq!(results.events.len(), 3);
        assert_eq!(results.events[2].relay_count, 4);
        assert_eq!(results.events[0].stroke, Stroke::Free);
        assert_eq!(results.events[0].round.as_deref(), Some("TIM"));

        assert_eq!(results.results.len(), 5);
        let heats: Vec<i32> = results.results.iter().map(|r| r.heat_number).collect();
        assert_eq!(heats, vec![1, 1, 1, 1, 2]);
        assert!(results.relays.is_empty());
        assert_eq!(results.split_count(), 3);

        let nagy = results.athletes.iter().find(|a| a.id == 1002).unwrap();
        assert_eq!(nagy.birth_date, NaiveDate::from_ymd_opt(2004, 1, 1));
        assert_eq!(nagy.gender, Some(Gender::Male));

        let nagy_result = results.results.iter().find(|r| r.athlete_id == 1002).unwrap();
        assert_eq!(nagy_result.club_code, "UNK");

        assert!(results.validate().is_ok());
        assert_eq!(results.evidence.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_eventdata_is_parse_error() {
        let server = MockServer::start().await;
        let err = scraper_for(&server).scrape_meet(77).await.unwrap_err();
        assert!(err.marks_failed());
    }

    #[test]
    fn test_club_code() {
        assert_eq!(club_code("BVSC-Zugló"), "BVSC-Zugló");
        assert_eq!(club_code("  "), "UNK");
        assert_eq!(club_code(&"x".repeat(40)).chars().count(), 32);
    }
}
