//! The `schema_migrations` version table, in golang-migrate's single-row layout.

use tokio_postgres::Client;

use crate::db::quote_ident;
use crate::error::Result;

pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// The recorded version. `version: None` means nothing is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct VersionStatus {
    pub version: Option<u64>,
    pub dirty: bool,
}

/// Create the version table if it does not exist.
pub async fn create_version_table(client: &Client) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)",
        quote_ident(MIGRATIONS_TABLE)
    );
    client.batch_execute(&sql).await?;
    Ok(())
}

/// Read the current version. An empty table, or a negative version, is "no version".
pub async fn get_version(client: &Client) -> Result<VersionStatus> {
    let sql = format!(
        "SELECT version, dirty FROM {} LIMIT 1",
        quote_ident(MIGRATIONS_TABLE)
    );
    let row = client.query_opt(&sql, &[]).await?;
    Ok(match row {
        Some(row) => {
            let version: i64 = row.get(0);
            VersionStatus {
                version: u64::try_from(version).ok(),
                dirty: row.get(1),
            }
        }
        None => VersionStatus::default(),
    })
}

/// Replace the recorded version atomically.
///
/// A clean "no version" leaves the table empty; a dirty one is stored as `-1`.
pub async fn set_version(client: &mut Client, version: Option<u64>, dirty: bool) -> Result<()> {
    let table = quote_ident(MIGRATIONS_TABLE);
    let tx = client.transaction().await?;
    tx.batch_execute(&format!("TRUNCATE {}", table)).await?;

    let stored = match version {
        Some(v) => Some(i64::try_from(v).map_err(|_| {
            crate::error::MigratorError::MigrationParseError(format!(
                "Version {} does not fit in a bigint",
                v
            ))
        })?),
        None if dirty => Some(-1),
        None => None,
    };
    if let Some(stored) = stored {
        tx.execute(
            &format!("INSERT INTO {} (version, dirty) VALUES ($1, $2)", table),
            &[&stored, &dirty],
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
