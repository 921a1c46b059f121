use std::path::PathBuf;

use serde::Serialize;

use crate::connection::ConnectionOverrides;
use crate::discovery::LogicalDatabase;
use crate::engine::MigrationEngine;
use crate::infra::InfraConfig;

/// Migration status of one database. Failures land in `error` rather than aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub database: String,
    /// Physical database name, when the config resolved.
    pub pg_database: Option<String>,
    pub migrations_path: PathBuf,
    pub version: Option<u64>,
    pub dirty: bool,
    pub error: Option<String>,
}

pub async fn execute<E: MigrationEngine>(
    engine: &E,
    infra: &InfraConfig,
    overrides: &ConnectionOverrides,
    databases: &[LogicalDatabase],
) -> Vec<StatusRow> {
    let mut rows = Vec::with_capacity(databases.len());

    for database in databases {
        let mut row = StatusRow {
            database: database.name.clone(),
            pg_database: None,
            migrations_path: database.migrations_path.clone(),
            version: None,
            dirty: false,
            error: None,
        };

        match super::connect_target(infra, overrides, database) {
            Ok((descriptor, conn)) => {
                row.pg_database = Some(descriptor.database);
                match engine.status(&conn, &database.migrations_path).await {
                    Ok(status) => {
                        row.version = status.version;
                        row.dirty = status.dirty;
                    }
                    Err(e) => {
                        tracing::warn!(database = %database.name, error = %e, "Failed to read status");
                        row.error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(database = %database.name, error = %e, "Skipping database");
                row.error = Some(e.to_string());
            }
        }

        rows.push(row);
    }

    rows
}
