//! Shared vocabularies for meets, events and athletes

use serde::{Deserialize, Serialize};

use crate::error::SwimError;

/// Stroke of an event, stored with the results-file literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stroke {
    Free,
    Back,
    Breast,
    Fly,
    Medley,
    Unknown,
}

impl Stroke {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stroke::Free => "FREE",
            Stroke::Back => "BACK",
            Stroke::Breast => "BREAST",
            Stroke::Fly => "FLY",
            Stroke::Medley => "MEDLEY",
            Stroke::Unknown => "UNKNOWN",
        }
    }

    /// Lenient mapping used by both adapters; unrecognised strokes become
    /// [`Stroke::Unknown`] rather than failing the whole meet.
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or(Stroke::Unknown)
    }

    /// Stroke named in a Hungarian event title (`"200 m férfi pillangó"`).
    pub fn from_hungarian_title(title: &str) -> Self {
        const WORDS: &[(&str, Stroke)] = &[
            ("pillangó", Stroke::Fly),
            ("hát", Stroke::Back),
            ("mell", Stroke::Breast),
            ("gyors", Stroke::Free),
            ("vegyes", Stroke::Medley),
        ];
        let lower = title.to_lowercase();
        WORDS
            .iter()
            .find(|(word, _)| lower.contains(word))
            .map(|(_, stroke)| *stroke)
            .unwrap_or(Stroke::Free)
    }
}

impl std::fmt::Display for Stroke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stroke {
    type Err = SwimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FREE" => Ok(Stroke::Free),
            "BACK" => Ok(Stroke::Back),
            "BREAST" => Ok(Stroke::Breast),
            "FLY" => Ok(Stroke::Fly),
            "MEDLEY" | "IM" | "IMRELAY" => Ok(Stroke::Medley),
            "UNKNOWN" => Ok(Stroke::Unknown),
            _ => Err(SwimError::invalid("stroke", s)),
        }
    }
}

/// Gender of an event or athlete. Events may be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "X")]
    Mixed,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Mixed => "X",
        }
    }

    /// Gender named in a Hungarian event title; titles without one are mixed.
    pub fn from_hungarian_title(title: &str) -> Self {
        let lower = title.to_lowercase();
        if lower.contains("férfi") {
            Gender::Male
        } else if lower.contains("női") {
            Gender::Female
        } else {
            Gender::Mixed
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = SwimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M" => Ok(Gender::Male),
            "F" | "W" => Ok(Gender::Female),
            "X" | "A" => Ok(Gender::Mixed),
            _ => Err(SwimError::invalid("gender", s)),
        }
    }
}

/// Where a meet's results came from.
///
/// Authoritative data is persisted as `lenex`; existing rows and reports
/// depend on that literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[serde(rename = "lenex")]
    Authoritative,
    Scraped,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Authoritative => "lenex",
            DataSource::Scraped => "scraped",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataSource {
    type Err = SwimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lenex" => Ok(DataSource::Authoritative),
            "scraped" => Ok(DataSource::Scraped),
            _ => Err(SwimError::invalid("data source", s)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stroke_codes() {
        assert_eq!(Stroke::from_code("fly"), Stroke::Fly);
        assert_eq!(Stroke::from_code("IM"), Stroke::Medley);
        assert_eq!(Stroke::from_code("APNEA"), Stroke::Unknown);
    }

    #[test]
    fn test_hungarian_titles() {
        let title = "1.- 200 m férfi pillangó";
        assert_eq!(Stroke::from_hungarian_title(title), Stroke::Fly);
        assert_eq!(Gender::from_hungarian_title(title), Gender::Male);

        let relay = "4x100 m női vegyesváltó";
        assert_eq!(Stroke::from_hungarian_title(relay), Stroke::Medley);
        assert_eq!(Gender::from_hungarian_title(relay), Gender::Female);

        assert_eq!(Gender::from_hungarian_title("4x50 m mix gyorsváltó"), Gender::Mixed);
    }

    #[test]
    fn test_data_source_literals() {
        assert_eq!(DataSource::Authoritative.as_str(), "lenex");
        assert_eq!("scraped".parse::<DataSource>().unwrap(), DataSource::Scraped);
        assert!("authoritative".parse::<DataSource>().is_err());
    }
}
