//! Swim Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and helpers for the swim results workspace.
//!
//! - **Error Handling**: value-level parse errors shared by both result adapters
//! - **Checksums**: SHA-256 digests used for archive object keys
//! - **Logging**: tracing subscriber setup for every binary
//! - **Time**: swim times, reaction times and calendar dates as they appear in
//!   results files and result pages
//! - **Types**: stroke, gender and data-source vocabularies
//!
//! # Example
//!
//! ```
//! use swim_common::time::parse_swim_time;
//!
//! assert_eq!(parse_swim_time("1:02.35").unwrap(), Some(6235));
//! assert_eq!(parse_swim_time("DNS").unwrap(), None);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SwimError};
pub use types::{DataSource, Gender, Stroke};
