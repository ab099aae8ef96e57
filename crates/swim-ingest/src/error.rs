//! Error taxonomy for the ingestion stages.
//!
//! How an error is classified decides what happens to the registry entry:
//!
//! | Variant                    | Entry outcome                                  |
//! |----------------------------|------------------------------------------------|
//! | `Network`, `Archive`       | left unchanged, retried by the next run        |
//! | `NotFound`                 | `lenex_not_found`                              |
//! | `Parse`, `MissingFile`,    | `processing_failed` / `scrape_failed`          |
//! | `ConstraintViolation`      |                                                |
//! | `StaleState`               | retried with a fresh read, then skipped        |
//! | `Conflict`                 | retried, then left unchanged                   |
//! | `Database`, `Config`, `Io` | run aborted, nothing marked                    |

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::FileStatus;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Transient HTTP failure: timeout, connection reset, 5xx
    #[error("Network error: {0}")]
    Network(String),

    /// The source definitively has no results file for this entry
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stored file missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Compare-and-set lost: the entry was not in the expected state
    #[error("Entry {event_id} is no longer {expected}")]
    StaleState { event_id: i64, expected: FileStatus },

    /// The database rolled the transaction back (deadlock, serialization)
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Transition {from} -> {to} is not allowed")]
    IllegalTransition { from: FileStatus, to: FileStatus },

    #[error("Unknown registry entry {0}")]
    UnknownEntry(i64),

    /// Off-site upload failed; the entry stays `downloaded`
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Data problems that end the attempt with a failure status.
    pub fn marks_failed(&self) -> bool {
        matches!(
            self,
            IngestError::Parse(_) | IngestError::MissingFile(_) | IngestError::ConstraintViolation(_)
        )
    }

    /// Problems that leave the entry untouched for the next run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Network(_) | IngestError::Archive(_) | IngestError::Conflict(_)
        )
    }

    /// Problems that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Database(_) | IngestError::Io(_) | IngestError::Config(_)
        )
    }
}

// SQLSTATE class 23 is integrity constraint violation: unique, foreign key,
// check, not-null and exclusion. Those are data problems of the meet being
// written. Class 40 is transaction rollback (40001 serialization failure,
// 40P01 deadlock); the statement may succeed on a new transaction. Everything
// else means the database itself is unusable.
impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref().map(sqlstate_class) {
                Some("23") => return IngestError::ConstraintViolation(db_err.message().to_string()),
                Some("40") => return IngestError::Conflict(db_err.message().to_string()),
                _ => {},
            }
        }
        IngestError::Database(err)
    }
}

fn sqlstate_class(code: &str) -> &str {
    code.get(..2).unwrap_or(code)
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Network(err.to_string())
    }
}

impl From<swim_common::SwimError> for IngestError {
    fn from(err: swim_common::SwimError) -> Self {
        match err {
            swim_common::SwimError::Io(io) => IngestError::Io(io),
            other => IngestError::Parse(other.to_string()),
        }
    }
}

impl From<quick_xml::DeError> for IngestError {
    fn from(err: quick_xml::DeError) -> Self {
        IngestError::Parse(format!("results file XML: {}", err))
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        IngestError::Parse(format!("results archive: {}", err))
    }
}

impl From<std::num::ParseIntError> for IngestError {
    fn from(err: std::num::ParseIntError) -> Self {
        IngestError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_disjoint() {
        let errors = [
            IngestError::Network("timeout".into()),
            IngestError::NotFound("no link".into()),
            IngestError::parse("bad xml"),
            IngestError::MissingFile(PathBuf::from("event_1.lef")),
            IngestError::ConstraintViolation("duplicate lane".into()),
            IngestError::StaleState {
                event_id: 1,
                expected: FileStatus::Downloaded,
            },
            IngestError::Archive("503".into()),
            IngestError::Conflict("deadlock detected".into()),
            IngestError::Database(sqlx::Error::PoolTimedOut),
            IngestError::Config("missing".into()),
        ];

        for err in &errors {
            let classes = [err.marks_failed(), err.is_transient(), err.is_fatal()];
            assert!(classes.iter().filter(|c| **c).count() <= 1, "{err}");
        }
    }

    #[test]
    fn test_pool_timeout_is_fatal() {
        let err = IngestError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_fatal());
        assert!(!err.marks_failed());
    }

    #[test]
    fn test_sqlstate_class() {
        assert_eq!(sqlstate_class("23505"), "23");
        assert_eq!(sqlstate_class("40P01"), "40");
        assert_eq!(sqlstate_class("4"), "4");
    }

    #[test]
    fn test_conflict_is_not_fatal() {
        let err = IngestError::Conflict("deadlock detected".into());
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert!(!err.marks_failed());
    }

    #[test]
    fn test_swim_error_maps_to_parse() {
        let err = IngestError::from(swim_common::SwimError::InvalidTime("1:xx".into()));
        assert!(err.marks_failed());
    }

    #[test]
    fn test_stale_state_message() {
        let err = IngestError::StaleState {
            event_id: 42,
            expected: FileStatus::Downloaded,
        };
        assert_eq!(err.to_string(), "Entry 42 is no longer downloaded");
    }
}
