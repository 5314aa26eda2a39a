//! Common test utilities for Sheetflow integration tests using testcontainers
//!
//! Spins up a PostgreSQL container with the crate's migrations applied. The
//! same database serves as checkpoint store and as sink in these tests.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// PostgreSQL test container wrapper
pub struct TestPostgres {
    // Dropping the container stops it
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    /// Start a new PostgreSQL container with migrations applied
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

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Create the sink table the pipeline tests load into
    pub async fn create_employee_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE employee (
                id BIGSERIAL PRIMARY KEY,
                "Name" TEXT NOT NULL,
                "Email" TEXT UNIQUE,
                "Age" DOUBLE PRECISION,
                "IsActive" BOOLEAN
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create employee table")?;
        Ok(())
    }
}

/// Initialize tracing for tests
///
/// Call this at the start of tests to enable logging output.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sheetflow_pipeline=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
