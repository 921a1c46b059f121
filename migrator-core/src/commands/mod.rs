//! Command implementations: migrate (up/down), status, force, generate.

pub mod force;
pub mod generate;
pub mod migrate;
pub mod status;

use crate::connection::{ConnectionDescriptor, ConnectionOverrides};
use crate::discovery::{self, LogicalDatabase};
use crate::error::{MigratorError, Result};
use crate::infra::InfraConfig;

/// Narrow `databases` to `target` when given.
///
/// An empty input is `NoDatabases`; a target that matches nothing is `DatabaseNotFound`.
pub fn select(databases: &[LogicalDatabase], target: Option<&str>) -> Result<Vec<LogicalDatabase>> {
    if databases.is_empty() {
        return Err(MigratorError::NoDatabases);
    }
    match target {
        Some(name) => {
            let selected = discovery::filter(databases, name);
            if selected.is_empty() {
                return Err(MigratorError::DatabaseNotFound(name.to_string()));
            }
            Ok(selected)
        }
        None => Ok(databases.to_vec()),
    }
}

/// Resolve a database's descriptor, apply overrides, and build its connection string.
pub(crate) fn connect_target(
    infra: &InfraConfig,
    overrides: &ConnectionOverrides,
    database: &LogicalDatabase,
) -> Result<(ConnectionDescriptor, String)> {
    let mut descriptor = infra.resolve(&database.name)?;
    overrides.apply(&mut descriptor);
    let conn = descriptor.connection_string()?;
    Ok((descriptor, conn))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::discovery::Origin;

    fn db(name: &str) -> LogicalDatabase {
        LogicalDatabase {
            name: name.to_string(),
            migrations_path: PathBuf::from(format!("/app/{}/migrations", name)),
            origin: Origin::Manifest {
                file: PathBuf::from("m.yaml"),
            },
        }
    }

    #[test]
    fn test_select() {
        let dbs = vec![db("a"), db("b")];
        assert_eq!(select(&dbs, None).unwrap().len(), 2);
        assert_eq!(select(&dbs, Some("b")).unwrap(), vec![db("b")]);
        assert!(matches!(
            select(&dbs, Some("c")),
            Err(MigratorError::DatabaseNotFound(name)) if name == "c"
        ));
        assert!(matches!(select(&[], None), Err(MigratorError::NoDatabases)));
    }
}
