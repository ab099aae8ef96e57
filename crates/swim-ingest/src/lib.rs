//! Swim Ingest Library
//!
//! Batch stages that keep the analytics schema in step with the live results
//! site.
//!
//! # Stages
//!
//! - **discover**: registers finished meets from the site index as `pending`
//! - **fetch**: downloads each meet's results file to the storage mount
//! - **backup**: copies stored files to the off-site archive
//! - **import**: parses results files and replaces the meet's subtree
//! - **scrape**: rebuilds meets without a results file from their HTML pages
//!
//! Every stage moves registry entries forward with a compare-and-set on their
//! status, so overlapping runs never repeat each other's work.
//!
//! # Example
//!
//! ```no_run
//! use swim_ingest::{db, stages::StageRunner, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let runner = StageRunner::new(pool, config.stage.clone());
//!     # let _ = runner;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod affiliation;
pub mod archive;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod lenex;
pub mod mount;
pub mod normalized;
pub mod registry;
pub mod scraper;
pub mod stages;
pub mod store;

mod html;

pub use config::Config;
pub use error::{IngestError, Result};
pub use registry::{FileStatus, TrackedFile};
