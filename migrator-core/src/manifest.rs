//! Declarative manifest listing databases and their migration directories.
//!
//! ```yaml
//! version: "1"
//! databases:
//!   - name: orders
//!     migrations: orders/migrations
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discovery::{clean_path, LogicalDatabase, Origin};
use crate::error::{MigratorError, Result};

pub const MANIFEST_VERSION: &str = "1";

/// Locations searched by [`find_manifest`], relative to the application root.
pub const DEFAULT_MANIFEST_PATHS: &[&str] = &[
    "encore-databases.yaml",
    "encore-databases.yml",
    "encore-databases.json",
    ".encore/databases.yaml",
    ".encore/databases.yml",
    ".encore/databases.json",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub databases: Vec<ManifestDatabase>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDatabase {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub migrations: String,
}

/// Serialization format of a manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    /// `.json` selects JSON; anything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ManifestFormat::Json,
            _ => ManifestFormat::Yaml,
        }
    }
}

impl std::str::FromStr for ManifestFormat {
    type Err = MigratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(ManifestFormat::Yaml),
            "json" => Ok(ManifestFormat::Json),
            _ => Err(MigratorError::ManifestError(format!(
                "Invalid manifest format '{}'. Use 'yaml' or 'json'.",
                s
            ))),
        }
    }
}

impl Manifest {
    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self> {
        match format {
            ManifestFormat::Json => serde_json::from_str(content).map_err(|e| {
                MigratorError::ManifestError(format!("Failed to parse JSON manifest: {}", e))
            }),
            ManifestFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                MigratorError::ManifestError(format!("Failed to parse YAML manifest: {}", e))
            }),
        }
    }

    pub fn render(&self, format: ManifestFormat) -> Result<String> {
        match format {
            ManifestFormat::Json => serde_json::to_string_pretty(self)
                .map(|s| s + "\n")
                .map_err(|e| MigratorError::ManifestError(format!("Failed to render JSON: {}", e))),
            ManifestFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| MigratorError::ManifestError(format!("Failed to render YAML: {}", e))),
        }
    }
}

/// Load a manifest and resolve its entries against `root`.
///
/// Unlike source scanning this is strict: every entry must be complete and
/// every migrations directory must exist.
pub fn load_manifest(path: &Path, root: &Path) -> Result<Vec<LogicalDatabase>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MigratorError::ManifestError(format!("Failed to read manifest '{}': {}", path.display(), e))
    })?;
    let manifest = Manifest::parse(&content, ManifestFormat::from_path(path))?;

    if !manifest.version.is_empty() && manifest.version != MANIFEST_VERSION {
        tracing::warn!(
            path = %path.display(),
            version = %manifest.version,
            "Unknown manifest version, reading as version {}",
            MANIFEST_VERSION
        );
    }

    if manifest.databases.is_empty() {
        return Err(MigratorError::ManifestError(format!(
            "Manifest '{}' contains no databases",
            path.display()
        )));
    }

    let mut databases = Vec::with_capacity(manifest.databases.len());
    for (index, entry) in manifest.databases.into_iter().enumerate() {
        if entry.name.is_empty() {
            return Err(MigratorError::ManifestError(format!(
                "Manifest database entry #{} is missing 'name'",
                index + 1
            )));
        }
        if entry.migrations.is_empty() {
            return Err(MigratorError::ManifestError(format!(
                "Manifest database '{}' is missing 'migrations' path",
                entry.name
            )));
        }

        let migrations = Path::new(&entry.migrations);
        let migrations_path = if migrations.is_absolute() {
            clean_path(migrations)
        } else {
            clean_path(&root.join(migrations))
        };

        if !migrations_path.is_dir() {
            return Err(MigratorError::MissingMigrationsDir {
                database: entry.name,
                path: migrations_path,
            });
        }

        tracing::debug!(
            database = %entry.name,
            migrations_path = %migrations_path.display(),
            "Found database in manifest"
        );

        databases.push(LogicalDatabase {
            name: entry.name,
            migrations_path,
            origin: Origin::Manifest {
                file: path.to_path_buf(),
            },
        });
    }

    Ok(databases)
}

/// First existing file among [`DEFAULT_MANIFEST_PATHS`] under `root`.
pub fn find_manifest(root: &Path) -> Option<PathBuf> {
    DEFAULT_MANIFEST_PATHS
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(manifest_name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("orders/migrations")).unwrap();
        let path = dir.path().join(manifest_name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_yaml_manifest() {
        let (dir, path) = setup(
            "encore-databases.yaml",
            "version: \"1\"\ndatabases:\n  - name: orders\n    migrations: ./orders/migrations\n",
        );
        let dbs = load_manifest(&path, dir.path()).unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].name, "orders");
        assert_eq!(dbs[0].migrations_path, dir.path().join("orders/migrations"));
        assert_eq!(dbs[0].origin, Origin::Manifest { file: path });
    }

    #[test]
    fn test_load_json_manifest_with_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join("abs");
        std::fs::create_dir_all(&abs).unwrap();
        let path = dir.path().join("dbs.json");
        let content = serde_json::json!({
            "version": "1",
            "databases": [{"name": "users", "migrations": abs.to_str().unwrap()}]
        });
        std::fs::write(&path, content.to_string()).unwrap();

        let other_root = tempfile::tempdir().unwrap();
        let dbs = load_manifest(&path, other_root.path()).unwrap();
        assert_eq!(dbs[0].migrations_path, abs);
    }

    #[test]
    fn test_rejects_empty_name() {
        let (dir, path) = setup(
            "m.yaml",
            "databases:\n  - name: \"\"\n    migrations: orders/migrations\n",
        );
        let err = load_manifest(&path, dir.path()).unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_rejects_missing_migrations() {
        let (dir, path) = setup("m.yaml", "databases:\n  - name: orders\n");
        let err = load_manifest(&path, dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'migrations'"));
        assert!(msg.contains("orders"));
    }

    #[test]
    fn test_rejects_empty_database_list() {
        let (dir, path) = setup("m.json", r#"{"version": "1", "databases": []}"#);
        let err = load_manifest(&path, dir.path()).unwrap_err();
        assert!(err.to_string().contains("no databases"));
    }

    #[test]
    fn test_rejects_missing_directory() {
        let (dir, path) = setup(
            "m.yaml",
            "databases:\n  - name: billing\n    migrations: billing/migrations\n",
        );
        let err = load_manifest(&path, dir.path()).unwrap_err();
        assert!(matches!(err, MigratorError::MissingMigrationsDir { ref database, .. } if database == "billing"));
    }

    #[test]
    fn test_rejects_malformed_document() {
        let (dir, path) = setup("m.json", "{ not json");
        assert!(matches!(
            load_manifest(&path, dir.path()),
            Err(MigratorError::ManifestError(_))
        ));
    }

    #[test]
    fn test_find_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_manifest(dir.path()), None);

        std::fs::create_dir_all(dir.path().join(".encore")).unwrap();
        std::fs::write(dir.path().join(".encore/databases.json"), "{}").unwrap();
        assert_eq!(
            find_manifest(dir.path()),
            Some(dir.path().join(".encore/databases.json"))
        );

        std::fs::write(dir.path().join("encore-databases.yml"), "").unwrap();
        assert_eq!(
            find_manifest(dir.path()),
            Some(dir.path().join("encore-databases.yml"))
        );
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ManifestFormat::from_path(Path::new("a.json")), ManifestFormat::Json);
        assert_eq!(ManifestFormat::from_path(Path::new("a.yml")), ManifestFormat::Yaml);
        assert_eq!(ManifestFormat::from_path(Path::new("noext")), ManifestFormat::Yaml);
        assert!("toml".parse::<ManifestFormat>().is_err());
    }
}
