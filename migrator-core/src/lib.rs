pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod history;
pub mod infra;
pub mod manifest;
pub mod migration;

use discovery::LogicalDatabase;
use error::Result;

pub use commands::generate::{GenerateOptions, GenerateReport};
pub use commands::migrate::{DatabaseResult, DatabaseStatus, MigrateReport};
pub use commands::status::StatusRow;
pub use config::{CliOverrides, Settings};
pub use connection::{ConnectionDescriptor, ConnectionOverrides, SslMode};
pub use discovery::{discover, Discovery};
pub use engine::{Direction, MigrationEngine, MigrationOutcome, PostgresEngine, VersionStatus};
pub use error::MigratorError;
pub use infra::InfraConfig;

/// Main entry point for the library.
///
/// Holds the infrastructure config, the engine, and CLI connection overrides,
/// and runs commands over a discovered set of databases one at a time.
pub struct Migrator<E: MigrationEngine> {
    pub infra: InfraConfig,
    pub overrides: ConnectionOverrides,
    engine: E,
}

impl<E: MigrationEngine> Migrator<E> {
    pub fn new(infra: InfraConfig, engine: E, overrides: ConnectionOverrides) -> Self {
        Self {
            infra,
            overrides,
            engine,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run `direction` over `databases`, or only `target` when given.
    ///
    /// Fails up front only for an empty set or an unknown target. Per-database
    /// problems are in the report; call [`MigrateReport::ensure_success`] to turn them into an error.
    pub async fn migrate(
        &self,
        databases: &[LogicalDatabase],
        target: Option<&str>,
        direction: Direction,
        steps: i64,
    ) -> Result<MigrateReport> {
        let selected = commands::select(databases, target)?;
        Ok(commands::migrate::execute(
            &self.engine,
            &self.infra,
            &self.overrides,
            &selected,
            direction,
            steps,
        )
        .await)
    }

    /// Current version of each selected database.
    pub async fn status(
        &self,
        databases: &[LogicalDatabase],
        target: Option<&str>,
    ) -> Result<Vec<StatusRow>> {
        let selected = commands::select(databases, target)?;
        Ok(commands::status::execute(&self.engine, &self.infra, &self.overrides, &selected).await)
    }

    /// Set the recorded version of `name`. `-1` clears it.
    pub async fn force(&self, databases: &[LogicalDatabase], name: &str, version: i64) -> Result<()> {
        commands::force::execute(&self.engine, &self.infra, &self.overrides, databases, name, version).await
    }
}
