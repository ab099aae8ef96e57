//! Serde model of the parts of a LENEX document the importer reads.
//!
//! Everything is optional text; conversion and validation happen in the
//! parent module so a missing attribute can be reported with context.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(super) struct Lenex {
    #[serde(rename = "MEETS")]
    pub meets: Option<Meets>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Meets {
    #[serde(rename = "MEET", default)]
    pub meets: Vec<Meet>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Meet {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@course")]
    pub course: Option<String>,
    #[serde(rename = "SESSIONS")]
    pub sessions: Option<Sessions>,
    #[serde(rename = "CLUBS")]
    pub clubs: Option<Clubs>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Sessions {
    #[serde(rename = "SESSION", default)]
    pub sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Session {
    #[serde(rename = "@number")]
    pub number: Option<String>,
    #[serde(rename = "@date")]
    pub date: Option<String>,
    #[serde(rename = "EVENTS")]
    pub events: Option<Events>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Events {
    #[serde(rename = "EVENT", default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Event {
    #[serde(rename = "@eventid")]
    pub event_id: Option<String>,
    #[serde(rename = "@number")]
    pub number: Option<String>,
    #[serde(rename = "@gender")]
    pub gender: Option<String>,
    #[serde(rename = "@round")]
    pub round: Option<String>,
    #[serde(rename = "SWIMSTYLE")]
    pub swim_style: Option<SwimStyle>,
    #[serde(rename = "HEATS")]
    pub heats: Option<Heats>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SwimStyle {
    #[serde(rename = "@distance")]
    pub distance: Option<String>,
    #[serde(rename = "@stroke")]
    pub stroke: Option<String>,
    #[serde(rename = "@relaycount")]
    pub relay_count: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Heats {
    #[serde(rename = "HEAT", default)]
    pub heats: Vec<Heat>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Heat {
    #[serde(rename = "@heatid")]
    pub heat_id: Option<String>,
    #[serde(rename = "@number")]
    pub number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Clubs {
    #[serde(rename = "CLUB", default)]
    pub clubs: Vec<Club>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Club {
    #[serde(rename = "@code")]
    pub code: Option<String>,
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@nation")]
    pub nation: Option<String>,
    #[serde(rename = "ATHLETES")]
    pub athletes: Option<Athletes>,
    #[serde(rename = "RELAYS")]
    pub relays: Option<Relays>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Athletes {
    #[serde(rename = "ATHLETE", default)]
    pub athletes: Vec<Athlete>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Athlete {
    #[serde(rename = "@athleteid")]
    pub athlete_id: Option<String>,
    #[serde(rename = "@firstname")]
    pub first_name: Option<String>,
    #[serde(rename = "@lastname")]
    pub last_name: Option<String>,
    #[serde(rename = "@birthdate")]
    pub birth_date: Option<String>,
    #[serde(rename = "@gender")]
    pub gender: Option<String>,
    #[serde(rename = "RESULTS")]
    pub results: Option<Results>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Results {
    #[serde(rename = "RESULT", default)]
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResultEntry {
    #[serde(rename = "@eventid")]
    pub event_id: Option<String>,
    #[serde(rename = "@heatid")]
    pub heat_id: Option<String>,
    #[serde(rename = "@lane")]
    pub lane: Option<String>,
    #[serde(rename = "@swimtime")]
    pub swim_time: Option<String>,
    #[serde(rename = "@status")]
    pub status: Option<String>,
    #[serde(rename = "@place")]
    pub place: Option<String>,
    #[serde(rename = "@reactiontime")]
    pub reaction_time: Option<String>,
    #[serde(rename = "@points")]
    pub points: Option<String>,
    #[serde(rename = "SPLITS")]
    pub splits: Option<Splits>,
    #[serde(rename = "RELAYPOSITIONS")]
    pub relay_positions: Option<RelayPositions>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Splits {
    #[serde(rename = "SPLIT", default)]
    pub splits: Vec<Split>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Split {
    #[serde(rename = "@distance")]
    pub distance: Option<String>,
    #[serde(rename = "@swimtime")]
    pub swim_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Relays {
    #[serde(rename = "RELAY", default)]
    pub relays: Vec<Relay>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Relay {
    #[serde(rename = "@number")]
    pub number: Option<String>,
    #[serde(rename = "RESULTS")]
    pub results: Option<Results>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RelayPositions {
    #[serde(rename = "RELAYPOSITION", default)]
    pub positions: Vec<RelayPosition>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RelayPosition {
    #[serde(rename = "@athleteid")]
    pub athlete_id: Option<String>,
    #[serde(rename = "@number")]
    pub number: Option<String>,
    #[serde(rename = "@reactiontime")]
    pub reaction_time: Option<String>,
}
