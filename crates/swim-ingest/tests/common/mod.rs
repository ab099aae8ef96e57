//! Shared setup for database integration tests
//!
//! Each test gets its own PostgreSQL container with the migrations applied.
//! Docker must be available; the tests using this module are `#[ignore]`d so
//! a plain `cargo test` skips them.
//!
//! ```bash
//! cargo test -p swim-ingest -- --ignored
//! ```

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use swim_ingest::config::{SourceConfig, StageConfig};
use swim_ingest::http::SourceClient;
use swim_ingest::registry::{self, EntryUpdate, FileStatus, NewEntry};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        swim_ingest::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swim_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn stage_config() -> StageConfig {
    StageConfig {
        stale_retry_limit: 3,
        batch_limit: None,
    }
}

pub fn client_for(base_url: &str) -> SourceClient {
    let config = SourceConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
        max_retries: 1,
        user_agent: "swim-ingest-test".to_string(),
    };
    SourceClient::new(&config)
        .expect("valid source config")
        .with_backoff(Duration::from_millis(5))
}

/// Register a pending entry the way discovery would.
pub async fn add_entry(pool: &PgPool, event_id: i64, name: &str) -> Result<()> {
    let mut conn = pool.acquire().await?;
    registry::upsert_discovered(
        &mut conn,
        &NewEntry {
            event_id,
            event_name: name.to_string(),
            date_from: None,
            date_to: None,
            source_url: None,
        },
    )
    .await?;
    Ok(())
}

/// Walk an entry along the given statuses, one transition per step.
pub async fn advance(pool: &PgPool, event_id: i64, path: &[FileStatus]) -> Result<()> {
    let mut conn = pool.acquire().await?;
    for pair in path.windows(2) {
        registry::transition(&mut conn, event_id, pair[0], pair[1], &EntryUpdate::default()).await?;
    }
    Ok(())
}

pub async fn status_of(pool: &PgPool, event_id: i64) -> Result<FileStatus> {
    let mut conn = pool.acquire().await?;
    let entry = registry::get(&mut conn, event_id)
        .await?
        .context("entry missing")?;
    Ok(entry.status)
}

pub async fn count(pool: &PgPool, sql: &str, meet_id: i64) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).bind(meet_id).fetch_one(pool).await?)
}

pub fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path.display(), e))
}
