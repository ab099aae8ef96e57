//! Parsers for the individual result-site pages.
//!
//! Each function takes one page's HTML (and the site's base URL where links
//! are read) and returns plain data; fetching and assembling a meet happens
//! in the parent module.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Node};
use swim_common::time::{find_status_token, parse_date_range, parse_swim_time};
use swim_common::{Gender, Stroke};
use url::Url;

use crate::error::Result;
use crate::html::{query_value, regex, selector, text_of};
use crate::normalized::SplitRecord;

/// Individual event titles never mention relays; relay titles carry "váltó".
const RELAY_MARKER: &str = "váltó";
const RELAY_LEG_COUNT: i32 = 4;

const BIRTH_YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2030;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetPage {
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub course: String,
}

/// Meet name, dates and course from `/event/eventdata`.
pub fn parse_eventdata(html: &str) -> Result<MeetPage> {
    let document = Html::parse_document(html);
    let headings = selector("h4, h5, h6")?;
    let subheadings = selector("h6")?;
    let date_range = regex(r"^\d{4}-\d{2}-\d{2}\s*-\s*\d{4}-\d{2}-\d{2}")?;

    let name = document
        .select(&headings)
        .map(text_of)
        .find(|t| t.contains(" - ") && t.chars().count() < 200)
        .and_then(|t| t.split(" - ").next().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| "Unknown".to_string());

    let (start_date, end_date) = document
        .select(&subheadings)
        .map(text_of)
        .find(|t| date_range.is_match(t))
        .and_then(|t| parse_date_range(&t))
        .map_or((None, None), |(from, to)| (Some(from), Some(to)));

    let course = if html.contains("50m") || html.contains("50 m") {
        "SCM"
    } else {
        "LCM"
    };

    Ok(MeetPage {
        name,
        start_date,
        end_date,
        course: course.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramEvent {
    pub session_id: i32,
    pub event_id: i32,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramPage {
    /// In page order, one entry per `(session, event)`
    pub events: Vec<ProgramEvent>,
    pub session_dates: BTreeMap<i32, NaiveDate>,
}

/// Events and session dates from `/event/program`.
///
/// Events come from the summary links. A session's date is taken from the
/// nearest text before its first link that names a `SESSION` and contains a
/// `YYYY.MM.DD` date.
pub fn parse_program(html: &str, base_url: &Url) -> Result<ProgramPage> {
    let document = Html::parse_document(html);
    let session_date = regex(r"(\d{4})\.(\d{2})\.(\d{2})")?;

    let mut page = ProgramPage::default();
    let mut seen = HashSet::new();
    let mut current_date: Option<NaiveDate> = None;

    for node in document.root_element().descendants() {
        match node.value() {
            Node::Text(text) => {
                if text.to_uppercase().contains("SESSION") {
                    if let Some(caps) = session_date.captures(text) {
                        current_date = NaiveDate::from_ymd_opt(
                            caps[1].parse().unwrap_or_default(),
                            caps[2].parse().unwrap_or_default(),
                            caps[3].parse().unwrap_or_default(),
                        );
                    }
                }
            },
            Node::Element(element) if element.name() == "a" => {
                let Some(href) = element.attr("href") else {
                    continue;
                };
                if !href.contains("event/summary") {
                    continue;
                }
                let ids = (
                    query_value(base_url, href, "SessionId").and_then(|v| v.parse::<i32>().ok()),
                    query_value(base_url, href, "EventId").and_then(|v| v.parse::<i32>().ok()),
                );
                let (Some(session_id), Some(event_id)) = ids else {
                    continue;
                };
                if let Some(date) = current_date {
                    page.session_dates.entry(session_id).or_insert(date);
                }
                if seen.insert((session_id, event_id)) {
                    let title = ElementRef::wrap(node).map(text_of).unwrap_or_default();
                    page.events.push(ProgramEvent {
                        session_id,
                        event_id,
                        title,
                    });
                }
            },
            _ => {},
        }
    }

    Ok(page)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTitle {
    pub stroke: Stroke,
    pub distance: i32,
    pub gender: Gender,
    pub relay_count: i32,
}

/// Interpret a Hungarian event title such as `"1.- 200 m férfi pillangó"`.
pub fn parse_event_title(title: &str) -> Result<EventTitle> {
    let distance_pattern = regex(r"(\d+)\s*m")?;
    let lower = title.to_lowercase();

    let distance = distance_pattern
        .captures(&lower)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);

    Ok(EventTitle {
        stroke: Stroke::from_hungarian_title(&lower),
        distance,
        gender: Gender::from_hungarian_title(&lower),
        relay_count: if lower.contains(RELAY_MARKER) { RELAY_LEG_COUNT } else { 1 },
    })
}

/// Heat ids offered by the heat selector of `/event/result`, in page order.
pub fn parse_heat_ids(html: &str) -> Result<Vec<i64>> {
    let document = Html::parse_document(html);
    let heat_select = selector("select.heatSelect")?;
    let options = selector("option[value]")?;

    let Some(select) = document.select(&heat_select).next() else {
        return Ok(Vec::new());
    };

    Ok(select
        .select(&options)
        .filter_map(|opt| opt.value().attr("value"))
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|v| v.parse().ok())
        .collect())
}

/// One swimmer's line in a heat result table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatRow {
    pub athlete_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birth_year: Option<i32>,
    pub club: String,
    pub lane: Option<i32>,
    pub time: Option<i32>,
    pub status: Option<String>,
    pub rank: Option<i32>,
    pub reaction_time: Option<i32>,
    pub points: Option<i32>,
    pub splits: Vec<SplitRecord>,
}

#[derive(Debug, Default)]
struct Columns {
    rank: Option<usize>,
    lane: Option<usize>,
    name: Option<usize>,
    time: Option<usize>,
    points: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Option<Self> {
        let mut columns = Columns::default();
        for (i, header) in headers.iter().enumerate() {
            if header.contains("RK") || header.contains("HELY") {
                columns.rank = Some(i);
            } else if header.contains("LN") {
                columns.lane = Some(i);
            } else if header.contains("NAME") || header.contains("NEV") || header.contains("NÉV") {
                columns.name = Some(i);
            } else if header.contains("TIME") || header.contains("IDŐ") {
                columns.time = Some(i);
            } else if header.contains("FINA") {
                columns.points = Some(i);
            }
        }
        (columns.rank.is_some() && columns.name.is_some() && columns.time.is_some()).then_some(columns)
    }
}

struct RowPatterns {
    time: regex::Regex,
    reaction: regex::Regex,
    athlete: regex::Regex,
    split: regex::Regex,
    inline_split: regex::Regex,
}

impl RowPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            time: regex(r"\d{1,2}:\d{2}\.\d{2}")?,
            reaction: regex(r"(?i)R:(\d+)\.(\d{2})")?,
            athlete: regex(r"^(.+?)\s*\((\d{4})\)\s*(.*)$")?,
            split: regex(r"(\d+)\s*m\s*(\d{1,2}):(\d{2})\.(\d{2})")?,
            inline_split: regex(r"(\d+)\s*m\**\s*(\d{1,2}):(\d{2})\.(\d{2})")?,
        })
    }
}

/// Rows of the first result table on a heat page.
///
/// Rows without an athlete link, rows with neither a time nor a status and
/// repeated athletes are dropped.
pub fn parse_heat_results(html: &str, base_url: &Url) -> Result<Vec<HeatRow>> {
    let document = Html::parse_document(html);
    let tables = selector("table")?;
    let header_cells = selector("th")?;
    let rows = selector("tr")?;
    let cells = selector("td")?;
    let athlete_link = selector("a[href]")?;
    let split_block = selector("div.splittimes")?;
    let split_cells = selector("div.col-3")?;
    let patterns = RowPatterns::new()?;

    for table in document.select(&tables) {
        let headers: Vec<String> = table
            .select(&header_cells)
            .map(|th| text_of(th).to_uppercase())
            .collect();
        let Some(columns) = Columns::from_headers(&headers) else {
            continue;
        };

        let mut parsed = Vec::new();
        let mut seen = HashSet::new();

        for row in table.select(&rows).skip(1) {
            let tds: Vec<ElementRef<'_>> = row.select(&cells).collect();
            let cell = |index: Option<usize>| index.and_then(|i| tds.get(i)).map(|td| text_of(*td));

            let needed = [columns.rank, columns.name, columns.time, columns.points];
            if needed.iter().flatten().any(|&i| i >= tds.len()) {
                continue;
            }

            let Some(link) = columns
                .name
                .and_then(|i| tds.get(i))
                .and_then(|td| td.select(&athlete_link).next())
            else {
                continue;
            };
            let Some(athlete_id) = link
                .value()
                .attr("href")
                .and_then(|href| query_value(base_url, href, "UMK"))
                .and_then(|umk| umk.parse::<i64>().ok())
            else {
                continue;
            };

            let time_raw = cell(columns.time).unwrap_or_default().replace('*', "");
            let time_raw = time_raw.trim();
            let time_token = match patterns.time.find(time_raw) {
                Some(m) => m.as_str(),
                None => time_raw.split_whitespace().next().unwrap_or_default(),
            };
            let time = parse_swim_time(time_token).ok().flatten();
            let status = find_status_token(time_raw).map(str::to_string);
            if time.is_none() && status.is_none() {
                continue;
            }
            if !seen.insert(athlete_id) {
                continue;
            }

            let reaction_time = patterns.reaction.captures(time_raw).and_then(|caps| {
                let whole: i32 = caps[1].parse().ok()?;
                let hundredths: i32 = caps[2].parse().ok()?;
                Some(whole * 100 + hundredths)
            });

            let rank = cell(columns.rank)
                .map(|s| s.replace('*', "").trim().to_string())
                .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                .and_then(|s| s.parse().ok());
            let lane = cell(columns.lane).and_then(|s| s.trim().parse().ok());
            let points = cell(columns.points)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .map(|p| p.trunc() as i32);

            let (first_name, last_name, birth_year, club) = split_athlete_text(&text_of(link), &patterns.athlete);

            let mut splits = row
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "tr")
                .and_then(|next| next.select(&split_block).next())
                .map(|block| {
                    block
                        .select(&split_cells)
                        .filter_map(|col| {
                            patterns
                                .split
                                .captures(&text_of(col))
                                .and_then(|caps| split_from_captures(&caps))
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if splits.is_empty() {
                let row_text = text_of(row);
                splits = patterns
                    .inline_split
                    .captures_iter(&row_text)
                    .filter_map(|caps| split_from_captures(&caps))
                    .collect();
            }

            parsed.push(HeatRow {
                athlete_id,
                first_name,
                last_name,
                birth_year,
                club,
                lane,
                time,
                status,
                rank,
                reaction_time,
                points,
                splits,
            });
        }

        return Ok(parsed);
    }

    Ok(Vec::new())
}

/// `"Kiss Anna Léna (2005) BVSC"` → first names, last name, year, club.
fn split_athlete_text(text: &str, pattern: &regex::Regex) -> (String, String, Option<i32>, String) {
    let (full_name, birth_year, club) = match pattern.captures(text) {
        Some(caps) => (
            caps[1].trim().to_string(),
            caps[2].parse().ok(),
            caps[3].trim().to_string(),
        ),
        None => (text.trim().to_string(), None, String::new()),
    };

    let (last_name, first_name) = match full_name.split_once(char::is_whitespace) {
        Some((last, first)) => (last.to_string(), first.trim().to_string()),
        None => (full_name.clone(), String::new()),
    };

    (first_name, last_name, birth_year, club)
}

fn split_from_captures(caps: &regex::Captures<'_>) -> Option<SplitRecord> {
    let distance: i32 = caps[1].parse().ok()?;
    let minutes: i32 = caps[2].parse().ok()?;
    let seconds: i32 = caps[3].parse().ok()?;
    let hundredths: i32 = caps[4].parse().ok()?;
    Some(SplitRecord {
        distance,
        time: minutes * 6_000 + seconds * 100 + hundredths,
    })
}

/// Birth year shown as `(YYYY)` on an athlete page, if plausible.
pub fn parse_birth_year(html: &str) -> Result<Option<i32>> {
    let pattern = regex(r"\((\d{4})\)")?;
    Ok(pattern
        .captures(html)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .filter(|year| BIRTH_YEAR_RANGE.contains(year)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EVENTDATA: &str = include_str!("../../tests/fixtures/eventdata.html");
    const PROGRAM: &str = include_str!("../../tests/fixtures/program.html");
    const RESULT_EVENT: &str = include_str!("../../tests/fixtures/result_event.html");
    const RESULT_HEAT: &str = include_str!("../../tests/fixtures/result_heat.html");

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn site() -> Url {
        Url::parse("https://live.musz.hu").unwrap()
    }

    #[test]
    fn test_parse_eventdata() {
        let meet = parse_eventdata(EVENTDATA).unwrap();
        assert_eq!(meet.name, "Tavaszi Kupa");
        assert_eq!(meet.start_date, Some(date(2023, 6, 1)));
        assert_eq!(meet.end_date, Some(date(2023, 6, 2)));
        assert_eq!(meet.course, "LCM");
    }

    #[test]
    fn test_parse_eventdata_pool_length_marks_course() {
        let meet = parse_eventdata("<h4>Kupa - Eger</h4><p>Medence: 50 m</p>").unwrap();
        assert_eq!(meet.name, "Kupa");
        assert_eq!(meet.course, "SCM");
        assert_eq!(meet.start_date, None);
    }

    #[test]
    fn test_parse_eventdata_without_title() {
        assert_eq!(parse_eventdata("<p>nothing</p>").unwrap().name, "Unknown");
    }

    #[test]
    fn test_parse_program() {
        let program = parse_program(PROGRAM, &site()).unwrap();

        let events: Vec<(i32, i32)> = program.events.iter().map(|e| (e.session_id, e.event_id)).collect();
        assert_eq!(events, vec![(1, 1), (1, 2), (2, 3)]);
        assert_eq!(program.events[0].title, "1.- 100 m férfi gyors");
        assert_eq!(program.events[2].title, "3.- 4x50 m mix gyorsváltó");
        assert_eq!(program.session_dates.get(&1), Some(&date(2023, 6, 1)));
        assert_eq!(program.session_dates.get(&2), Some(&date(2023, 6, 2)));
    }

    #[test]
    fn test_parse_event_title() {
        let title = parse_event_title("1.- 200 m férfi pillangó").unwrap();
        assert_eq!(
            title,
            EventTitle {
                stroke: Stroke::Fly,
                distance: 200,
                gender: Gender::Male,
                relay_count: 1,
            }
        );

        let relay = parse_event_title("3.- 4x50 m mix vegyesváltó").unwrap();
        assert_eq!(relay.stroke, Stroke::Medley);
        assert_eq!(relay.distance, 50);
        assert_eq!(relay.gender, Gender::Mixed);
        assert_eq!(relay.relay_count, 4);

        let back = parse_event_title("2.- 50 m női hát").unwrap();
        assert_eq!((back.stroke, back.gender), (Stroke::Back, Gender::Female));
    }

    #[test]
    fn test_parse_heat_ids() {
        assert_eq!(parse_heat_ids(RESULT_EVENT).unwrap(), vec![5501, 5502]);
        assert!(parse_heat_ids("<select class='heatSelect'></select>").unwrap().is_empty());
        assert!(parse_heat_ids("<p>no heats</p>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_heat_results() {
        let rows = parse_heat_results(RESULT_HEAT, &site()).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.athlete_id).collect();
        assert_eq!(ids, vec![1001, 1002, 1003, 1004]);

        let first = &rows[0];
        assert_eq!(first.last_name, "Kiss");
        assert_eq!(first.first_name, "Anna");
        assert_eq!(first.birth_year, Some(2005));
        assert_eq!(first.club, "BVSC-Zugló");
        assert_eq!(first.lane, Some(4));
        assert_eq!(first.rank, Some(1));
        assert_eq!(first.time, Some(5_912));
        assert_eq!(first.reaction_time, Some(65));
        assert_eq!(first.points, Some(712));
        assert_eq!(
            first.splits,
            vec![
                SplitRecord { distance: 50, time: 2_850 },
                SplitRecord { distance: 100, time: 5_912 },
            ]
        );

        let second = &rows[1];
        assert_eq!(second.first_name, "Bence Péter");
        assert_eq!(second.birth_year, None);
        assert_eq!(second.club, "");
        assert_eq!(second.points, Some(650));
        assert!(second.splits.is_empty());

        let dns = &rows[2];
        assert_eq!(dns.time, None);
        assert_eq!(dns.status.as_deref(), Some("DNS"));
        assert_eq!(dns.rank, None);

        let inline = &rows[3];
        assert_eq!(inline.splits, vec![SplitRecord { distance: 50, time: 3_010 }]);
    }

    #[test]
    fn test_parse_heat_results_ignores_other_tables() {
        let html = "<table><tr><th>Dátum</th><th>Helyszín</th></tr><tr><td>x</td><td>y</td></tr></table>";
        assert!(parse_heat_results(html, &site()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_birth_year() {
        assert_eq!(parse_birth_year("<h5>Nagy Bence Péter (2004)</h5>").unwrap(), Some(2004));
        assert_eq!(parse_birth_year("<h5>Nagy Bence (1850)</h5>").unwrap(), None);
        assert_eq!(parse_birth_year("<h5>Nagy Bence</h5>").unwrap(), None);
    }
}
