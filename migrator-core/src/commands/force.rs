use crate::connection::ConnectionOverrides;
use crate::discovery::LogicalDatabase;
use crate::engine::MigrationEngine;
use crate::error::Result;
use crate::infra::InfraConfig;

/// Set the recorded version of one database without running migrations.
pub async fn execute<E: MigrationEngine>(
    engine: &E,
    infra: &InfraConfig,
    overrides: &ConnectionOverrides,
    databases: &[LogicalDatabase],
    name: &str,
    version: i64,
) -> Result<()> {
    let selected = super::select(databases, Some(name))?;
    let database = &selected[0];
    let (descriptor, conn) = super::connect_target(infra, overrides, database)?;

    tracing::warn!(
        database = %database.name,
        pg_database = %descriptor.database,
        version = version,
        "Forcing migration version"
    );
    engine.force(&conn, &database.migrations_path, version).await?;
    tracing::info!(database = %database.name, version = version, "Version forced");

    Ok(())
}
