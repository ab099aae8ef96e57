//! Small helpers over `scraper` shared by the page parsers.

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::{IngestError, Result};

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| IngestError::parse(format!("selector {}: {}", css, e)))
}

pub fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| IngestError::parse(format!("pattern {}: {}", pattern, e)))
}

/// Whitespace-collapsed text content of an element.
pub fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decoded value of query parameter `key` in an href resolved against the
/// page's base URL. Empty values count as absent.
pub fn query_value(base_url: &Url, href: &str, key: &str) -> Option<String> {
    base_url
        .join(href)
        .ok()?
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
