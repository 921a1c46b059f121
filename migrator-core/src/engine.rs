//! The migration engine contract and its PostgreSQL implementation.

use std::path::Path;

use tokio_postgres::Client;

use crate::db;
use crate::error::{format_db_error, MigratorError, Result};
use crate::history;
use crate::migration::{self, MigrationSource, Step};

pub use crate::history::VersionStatus;
pub use crate::migration::Direction;

/// Result of one `up` or `down` run against a single database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MigrationOutcome {
    pub direction: Direction,
    pub version_before: Option<u64>,
    pub version_after: Option<u64>,
}

impl MigrationOutcome {
    /// True when nothing was pending.
    pub fn is_noop(&self) -> bool {
        self.version_before == self.version_after
    }
}

/// Applies migrations from a directory to the database behind a connection string.
///
/// `steps <= 0` means "all pending" for `up` and "everything" for `down`.
/// A `-1` version for `force` clears the recorded version.
#[allow(async_fn_in_trait)]
pub trait MigrationEngine {
    async fn up(&self, conn: &str, migrations: &Path, steps: i64) -> Result<MigrationOutcome>;

    async fn down(&self, conn: &str, migrations: &Path, steps: i64) -> Result<MigrationOutcome>;

    async fn status(&self, conn: &str, migrations: &Path) -> Result<VersionStatus>;

    async fn force(&self, conn: &str, migrations: &Path, version: i64) -> Result<()>;
}

/// Engine speaking golang-migrate's file and table formats over tokio-postgres.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine {
    pub connect_retries: u32,
    pub connect_timeout_secs: u32,
}

impl PostgresEngine {
    pub fn new(connect_retries: u32, connect_timeout_secs: u32) -> Self {
        Self {
            connect_retries: connect_retries.min(db::MAX_CONNECT_RETRIES),
            connect_timeout_secs,
        }
    }

    async fn open(&self, conn: &str) -> Result<Client> {
        let client =
            db::connect_with_retries(conn, self.connect_retries, self.connect_timeout_secs).await?;
        history::create_version_table(&client).await?;
        Ok(client)
    }

    async fn run(&self, conn: &str, migrations: &Path, direction: Direction, steps: i64) -> Result<MigrationOutcome> {
        let source = MigrationSource::scan(migrations)?;
        let mut client = self.open(conn).await?;
        let lock_id = db::acquire_advisory_lock(&client).await?;

        let result = apply(&mut client, &source, direction, steps).await;

        match (result, db::release_advisory_lock(&client, lock_id).await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), unlock) => {
                if let Err(unlock_err) = unlock {
                    tracing::warn!(error = %unlock_err, "Failed to release advisory lock");
                }
                Err(e)
            }
        }
    }
}

async fn apply(
    client: &mut Client,
    source: &MigrationSource,
    direction: Direction,
    steps: i64,
) -> Result<MigrationOutcome> {
    let before = history::get_version(client).await?;
    tracing::debug!(version = ?before.version, dirty = before.dirty, "Current migration state");
    if before.dirty {
        return Err(MigratorError::DirtyState {
            version: before.version.unwrap_or(0),
        });
    }

    let limit = usize::try_from(steps).ok().filter(|&n| n > 0);
    let plan = match direction {
        Direction::Up => migration::plan_up(source, before.version, limit)?,
        Direction::Down => {
            if limit.is_none() {
                tracing::warn!("Rolling back ALL migrations");
            }
            migration::plan_down(source, before.version, limit)?
        }
    };

    if plan.is_empty() {
        tracing::debug!(direction = %direction, "No migrations to apply");
    }

    for step in &plan {
        run_step(client, source, step).await?;
    }

    Ok(MigrationOutcome {
        direction,
        version_before: before.version,
        version_after: plan.last().map_or(before.version, |s| s.target),
    })
}

/// Mark the target dirty, run the SQL outside a transaction, then mark it clean.
async fn run_step(client: &mut Client, source: &MigrationSource, step: &Step) -> Result<()> {
    history::set_version(client, step.target, true).await?;

    match source.read(step.version, step.direction)? {
        Some(sql) => {
            let elapsed = db::execute_raw(client, &sql).await.map_err(|e| {
                let reason = match &e {
                    MigratorError::DatabaseError(db_err) => format_db_error(db_err),
                    other => other.to_string(),
                };
                MigratorError::MigrationFailed {
                    version: step.version,
                    reason,
                }
            })?;
            tracing::info!(
                version = step.version,
                direction = %step.direction,
                execution_time_ms = elapsed,
                "Applied migration"
            );
        }
        None => {
            tracing::debug!(
                version = step.version,
                direction = %step.direction,
                "No file for this direction, changing version only"
            );
        }
    }

    history::set_version(client, step.target, false).await
}

impl MigrationEngine for PostgresEngine {
    async fn up(&self, conn: &str, migrations: &Path, steps: i64) -> Result<MigrationOutcome> {
        self.run(conn, migrations, Direction::Up, steps).await
    }

    async fn down(&self, conn: &str, migrations: &Path, steps: i64) -> Result<MigrationOutcome> {
        self.run(conn, migrations, Direction::Down, steps).await
    }

    async fn status(&self, conn: &str, migrations: &Path) -> Result<VersionStatus> {
        MigrationSource::scan(migrations)?;
        let client = self.open(conn).await?;
        history::get_version(&client).await
    }

    async fn force(&self, conn: &str, migrations: &Path, version: i64) -> Result<()> {
        if version < -1 {
            return Err(MigratorError::MigrationParseError(format!(
                "Invalid version {}: must be -1 or greater",
                version
            )));
        }
        MigrationSource::scan(migrations)?;

        let mut client = self.open(conn).await?;
        let lock_id = db::acquire_advisory_lock(&client).await?;
        let result = history::set_version(&mut client, u64::try_from(version).ok(), false).await;
        let unlock = db::release_advisory_lock(&client, lock_id).await;
        result?;
        unlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_noop() {
        let outcome = MigrationOutcome {
            direction: Direction::Up,
            version_before: Some(3),
            version_after: Some(3),
        };
        assert!(outcome.is_noop());

        let outcome = MigrationOutcome {
            direction: Direction::Down,
            version_before: Some(1),
            version_after: None,
        };
        assert!(!outcome.is_noop());
    }

    #[test]
    fn test_retries_are_capped() {
        assert_eq!(PostgresEngine::new(100, 5).connect_retries, db::MAX_CONNECT_RETRIES);
        assert_eq!(PostgresEngine::new(3, 0).connect_retries, 3);
    }
}
