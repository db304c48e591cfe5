//! Common utilities for Postgres storage tests

use anyhow::Result;
use bookingbench_core::ConnectionConfig;
use bookingbench_storage_postgres::Postgres;
use std::str::FromStr;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::{postgres, testcontainers::runners::AsyncRunner};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init();
    }
}

/// Starts a TimescaleDB container with the booking schema loaded.
pub async fn create_timescale_container() -> Result<(ContainerAsync<postgres::Postgres>, Postgres, ConnectionConfig)> {
    let container: ContainerAsync<postgres::Postgres> = postgres::Postgres::default()
        .with_db_name("bookingbench")
        .with_user("postgres")
        .with_password("postgres")
        .with_init_sql(include_str!("../schema.sql").to_string().into_bytes())
        .with_name("timescale/timescaledb")
        .with_tag("latest-pg16")
        .start()
        .await
        .unwrap();

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let config = ConnectionConfig::new(host.to_string(), port, "bookingbench", "postgres", "postgres");
    let store = Postgres::connect(&config, 4).await?;

    Ok((container, store, config))
}
