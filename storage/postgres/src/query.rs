use std::time::Duration;

use async_trait::async_trait;
use bookingbench_core::scenario::{Scenario, ScenarioParameters};
use bookingbench_core::{ConnectionConfig, EntityKind, QuerySession, QueryTarget, StoreError};
use futures_util::TryStreamExt;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::classify;
use crate::sql_builder::scenario_statement;

/// Benchmark target: every run gets its own unpooled connection.
pub struct PostgresTarget {
    config: ConnectionConfig,
    statement_timeout: Duration,
}

impl PostgresTarget {
    pub fn new(config: ConnectionConfig) -> Self { Self { config, statement_timeout: Duration::from_secs(60) } }

    /// Server-side cancellation deadline for every statement of the session.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

#[async_trait]
impl QueryTarget for PostgresTarget {
    type Session = PostgresSession;

    async fn open_session(&self) -> Result<PostgresSession, StoreError> {
        let (client, connection) = tokio_postgres::connect(&self.config.connection_string(), NoTls).await.map_err(classify)?;
        let label = self.config.redacted();
        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("benchmark connection error: {}", e);
            }
        });

        client.batch_execute(&format!("SET statement_timeout = {}", self.statement_timeout.as_millis())).await.map_err(classify)?;
        info!("Opened benchmark session on {label}");
        Ok(PostgresSession { client, handle })
    }

    fn describe(&self) -> String { self.config.redacted() }
}

pub struct PostgresSession {
    client: Client,
    handle: JoinHandle<()>,
}

impl PostgresSession {
    fn table(&self) -> &'static str { EntityKind::Booking.table() }
}

impl Drop for PostgresSession {
    fn drop(&mut self) { self.handle.abort(); }
}

#[async_trait]
impl QuerySession for PostgresSession {
    async fn resolve_parameters(&mut self) -> Result<ScenarioParameters, StoreError> {
        // The most recent booking guarantees both identifiers have rows inside every window.
        let row = self
            .client
            .query_opt(r#"SELECT "venueId", "offererId" FROM "booking" ORDER BY "dateCreated" DESC LIMIT 1"#, &[])
            .await
            .map_err(classify)?;
        let parameters = match row {
            Some(row) => ScenarioParameters { venue_id: row.get(0), offerer_id: row.get(1) },
            None => ScenarioParameters::default(),
        };
        debug!("resolved scenario parameters {parameters:?}");
        Ok(parameters)
    }

    async fn execute(&mut self, scenario: &Scenario, parameters: &ScenarioParameters) -> Result<u64, StoreError> {
        let (sql, args) = scenario_statement(self.table(), scenario, parameters).map_err(StoreError::integrity)?;
        debug!("{}: {sql}", scenario.name);

        let rows = self.client.query_raw(sql.as_str(), args).await.map_err(classify)?.try_collect::<Vec<_>>().await.map_err(classify)?;
        Ok(rows.len() as u64)
    }

    async fn cancel(&mut self) -> Result<(), StoreError> {
        debug!("cancelling the running statement");
        self.client.cancel_token().cancel_query(NoTls).await.map_err(classify)
    }
}
