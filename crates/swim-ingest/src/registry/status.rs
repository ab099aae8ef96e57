//! Tracked-file status and its transition tables

use serde::{Deserialize, Serialize};

/// Ingestion status of one tracked event.
///
/// The string forms are persisted in `importedlenexfile.status` and must not
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    LenexNotFound,
    Downloaded,
    BackedUp,
    Processed,
    ProcessingFailed,
    Scraped,
    ScrapeFailed,
}

impl FileStatus {
    pub const ALL: [FileStatus; 8] = [
        FileStatus::Pending,
        FileStatus::LenexNotFound,
        FileStatus::Downloaded,
        FileStatus::BackedUp,
        FileStatus::Processed,
        FileStatus::ProcessingFailed,
        FileStatus::Scraped,
        FileStatus::ScrapeFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::LenexNotFound => "lenex_not_found",
            FileStatus::Downloaded => "downloaded",
            FileStatus::BackedUp => "backed_up",
            FileStatus::Processed => "processed",
            FileStatus::ProcessingFailed => "processing_failed",
            FileStatus::Scraped => "scraped",
            FileStatus::ScrapeFailed => "scrape_failed",
        }
    }

    /// Forward edges a stage may take from this status.
    pub fn successors(self) -> &'static [FileStatus] {
        match self {
            FileStatus::Pending => &[FileStatus::Downloaded, FileStatus::LenexNotFound],
            FileStatus::Downloaded => &[FileStatus::BackedUp, FileStatus::ProcessingFailed],
            FileStatus::BackedUp => &[FileStatus::Processed, FileStatus::ProcessingFailed],
            FileStatus::LenexNotFound => &[FileStatus::Scraped, FileStatus::ScrapeFailed],
            FileStatus::Processed
            | FileStatus::ProcessingFailed
            | FileStatus::Scraped
            | FileStatus::ScrapeFailed => &[],
        }
    }

    pub fn can_transition_to(self, to: FileStatus) -> bool {
        self.successors().contains(&to)
    }

    /// No stage picks the entry up again without operator action.
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Where an operator reset sends an entry, if anywhere.
    ///
    /// `processed` has no reset: a successfully imported meet never goes back
    /// to `pending`.
    pub fn reset_target(self) -> Option<FileStatus> {
        match self {
            FileStatus::ProcessingFailed => Some(FileStatus::Downloaded),
            FileStatus::ScrapeFailed => Some(FileStatus::LenexNotFound),
            FileStatus::Scraped => Some(FileStatus::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid file status: {}", s))
    }
}
