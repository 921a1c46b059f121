use std::path::PathBuf;

use thiserror::Error;

/// Extract the full error message from a tokio_postgres::Error,
/// including the underlying DbError details that Display hides.
pub fn format_db_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        let mut msg = db_err.message().to_string();
        if let Some(detail) = db_err.detail() {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = db_err.hint() {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        if let Some(position) = db_err.position() {
            msg.push_str(&format!("\n  Position: {:?}", position));
        }
        return msg;
    }
    // Fallback: walk the source chain
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(&format!(": {}", s));
        source = s.source();
    }
    msg
}

#[derive(Error, Debug)]
pub enum MigratorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database '{name}' not found in infrastructure config (sql_servers.databases)")]
    ConfigNotFound { name: String },

    #[error("Failed to resolve {field} for database '{database}': environment variable {var} is not set")]
    SecretUnresolved {
        database: String,
        field: String,
        var: String,
    },

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("Migrations directory for '{database}' does not exist: {}", path.display())]
    MissingMigrationsDir { database: String, path: PathBuf },

    #[error("Failed to walk directory: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("No databases found")]
    NoDatabases,

    #[error("Database error: {}", format_db_error(.0))]
    DatabaseError(#[from] tokio_postgres::Error),

    #[error("Timed out connecting to database after {0}s")]
    ConnectTimeout(u32),

    #[error("Migration source error: {0}")]
    MigrationParseError(String),

    #[error("No migration found for version {version} in {}", path.display())]
    MissingMigration { version: u64, path: PathBuf },

    #[error("Database is in dirty state at version {version}, manual intervention required")]
    DirtyState { version: u64 },

    #[error("Migration {version} failed: {reason}")]
    MigrationFailed { version: u64, reason: String },

    #[error("Advisory lock error: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Migration errors ({count} database(s)):\n  {details}")]
    AggregateFailure { count: usize, details: String },
}

pub type Result<T> = std::result::Result<T, MigratorError>;
