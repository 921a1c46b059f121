use serde::Serialize;

use crate::connection::ConnectionOverrides;
use crate::discovery::LogicalDatabase;
use crate::engine::{Direction, MigrationEngine, MigrationOutcome};
use crate::error::{MigratorError, Result};
use crate::infra::InfraConfig;

/// What happened to one database during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatabaseStatus {
    /// At least one migration ran.
    Migrated { outcome: MigrationOutcome },
    /// Nothing was pending.
    Unchanged { outcome: MigrationOutcome },
    /// No usable configuration; the engine was never called.
    Skipped { reason: String },
    /// The engine or connection failed.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseResult {
    pub database: String,
    #[serde(flatten)]
    pub status: DatabaseStatus,
}

/// Report returned after an up or down run over one or more databases.
#[derive(Debug, Clone, Serialize)]
pub struct MigrateReport {
    pub direction: Direction,
    pub results: Vec<DatabaseResult>,
}

impl MigrateReport {
    pub fn migrated(&self) -> usize {
        self.count(|s| matches!(s, DatabaseStatus::Migrated { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, DatabaseStatus::Unchanged { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, DatabaseStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DatabaseStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&DatabaseStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    /// `AggregateFailure` naming every skipped or failed database, if any.
    pub fn ensure_success(&self) -> Result<()> {
        let problems: Vec<String> = self
            .results
            .iter()
            .filter_map(|r| match &r.status {
                DatabaseStatus::Skipped { reason } => Some(format!("{}: skipped: {}", r.database, reason)),
                DatabaseStatus::Failed { error } => Some(format!("{}: {}", r.database, error)),
                _ => None,
            })
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MigratorError::AggregateFailure {
                count: problems.len(),
                details: problems.join("\n  "),
            })
        }
    }
}

/// Run `direction` against each database in order. Per-database problems are recorded, not raised.
pub async fn execute<E: MigrationEngine>(
    engine: &E,
    infra: &InfraConfig,
    overrides: &ConnectionOverrides,
    databases: &[LogicalDatabase],
    direction: Direction,
    steps: i64,
) -> MigrateReport {
    let mut results = Vec::with_capacity(databases.len());

    for database in databases {
        let status = migrate_one(engine, infra, overrides, database, direction, steps).await;
        results.push(DatabaseResult {
            database: database.name.clone(),
            status,
        });
    }

    let report = MigrateReport { direction, results };
    tracing::info!(
        direction = %direction,
        migrated = report.migrated(),
        unchanged = report.unchanged(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Migration run completed"
    );
    report
}

async fn migrate_one<E: MigrationEngine>(
    engine: &E,
    infra: &InfraConfig,
    overrides: &ConnectionOverrides,
    database: &LogicalDatabase,
    direction: Direction,
    steps: i64,
) -> DatabaseStatus {
    let (descriptor, conn) = match super::connect_target(infra, overrides, database) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(database = %database.name, error = %e, "Skipping database");
            return DatabaseStatus::Skipped { reason: e.to_string() };
        }
    };

    tracing::info!(
        database = %database.name,
        pg_database = %descriptor.database,
        host = %descriptor.host,
        port = %descriptor.port,
        ssl_mode = %descriptor.ssl_mode,
        migrations_path = %database.migrations_path.display(),
        direction = %direction,
        "Migrating database"
    );

    let result = match direction {
        Direction::Up => engine.up(&conn, &database.migrations_path, steps).await,
        Direction::Down => engine.down(&conn, &database.migrations_path, steps).await,
    };

    match result {
        Ok(outcome) if outcome.is_noop() => {
            tracing::info!(database = %database.name, version = ?outcome.version_after, "No pending migrations");
            DatabaseStatus::Unchanged { outcome }
        }
        Ok(outcome) => {
            tracing::info!(
                database = %database.name,
                version_before = ?outcome.version_before,
                version_after = ?outcome.version_after,
                "Migration completed"
            );
            DatabaseStatus::Migrated { outcome }
        }
        Err(e) => {
            tracing::error!(database = %database.name, error = %e, "Migration failed");
            DatabaseStatus::Failed { error: e.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(before: Option<u64>, after: Option<u64>) -> MigrationOutcome {
        MigrationOutcome {
            direction: Direction::Up,
            version_before: before,
            version_after: after,
        }
    }

    fn result(name: &str, status: DatabaseStatus) -> DatabaseResult {
        DatabaseResult {
            database: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_ensure_success_when_clean() {
        let report = MigrateReport {
            direction: Direction::Up,
            results: vec![
                result("a", DatabaseStatus::Migrated { outcome: outcome(None, Some(2)) }),
                result("b", DatabaseStatus::Unchanged { outcome: outcome(Some(2), Some(2)) }),
            ],
        };
        assert!(report.ensure_success().is_ok());
        assert_eq!(report.migrated(), 1);
        assert_eq!(report.unchanged(), 1);
    }

    #[test]
    fn test_ensure_success_names_every_problem() {
        let report = MigrateReport {
            direction: Direction::Up,
            results: vec![
                result("a", DatabaseStatus::Migrated { outcome: outcome(None, Some(1)) }),
                result("b", DatabaseStatus::Skipped { reason: "not configured".into() }),
                result("c", DatabaseStatus::Failed { error: "boom".into() }),
            ],
        };
        let err = report.ensure_success().unwrap_err();
        match &err {
            MigratorError::AggregateFailure { count, details } => {
                assert_eq!(*count, 2);
                assert!(details.contains("b: skipped: not configured"));
                assert!(details.contains("c: boom"));
                assert!(!details.contains("a:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_report_json_shape() {
        let report = MigrateReport {
            direction: Direction::Down,
            results: vec![result("b", DatabaseStatus::Skipped { reason: "x".into() })],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["direction"], "down");
        assert_eq!(json["results"][0]["database"], "b");
        assert_eq!(json["results"][0]["status"], "skipped");
        assert_eq!(json["results"][0]["reason"], "x");
    }
}
