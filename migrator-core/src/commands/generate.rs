//! Manifest generation from discovered databases, with optional migration copying.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::discovery::{clean_path, relative_path, LogicalDatabase};
use crate::error::{MigratorError, Result};
use crate::manifest::{Manifest, ManifestDatabase, ManifestFormat, MANIFEST_VERSION};

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Absolute application root; paths are recorded relative to it.
    pub app_root: PathBuf,
    /// Where to write the manifest. `None` renders without writing.
    pub output: Option<PathBuf>,
    /// Copy each migrations directory into `<copy_to>/<name>`.
    pub copy_to: Option<PathBuf>,
    /// Explicit format; otherwise inferred from `output`.
    pub format: Option<ManifestFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub manifest: Manifest,
    #[serde(skip)]
    pub rendered: String,
    pub output: Option<PathBuf>,
    pub copied: Vec<CopiedMigrations>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopiedMigrations {
    pub database: String,
    pub from: PathBuf,
    pub to: PathBuf,
    pub files: usize,
}

pub fn execute(databases: &[LogicalDatabase], opts: &GenerateOptions) -> Result<GenerateReport> {
    if databases.is_empty() {
        return Err(MigratorError::NoDatabases);
    }

    let output = opts
        .output
        .as_deref()
        .map(|p| std::path::absolute(p).map(|p| clean_path(&p)))
        .transpose()?;
    let format = opts.format.unwrap_or_else(|| {
        output
            .as_deref()
            .map(ManifestFormat::from_path)
            .unwrap_or(ManifestFormat::Yaml)
    });
    let base = match &output {
        Some(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        None => std::path::absolute(".")?,
    };
    let copy_to = opts
        .copy_to
        .as_deref()
        .map(|p| std::path::absolute(p).map(|p| clean_path(&p)))
        .transpose()?;

    let mut manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        databases: Vec::with_capacity(databases.len()),
    };
    let mut copied = Vec::new();

    for database in databases {
        let recorded = match &copy_to {
            Some(copy_root) => {
                let target = copy_root.join(&database.name);
                tracing::info!(
                    database = %database.name,
                    from = %database.migrations_path.display(),
                    to = %target.display(),
                    "Copying migrations"
                );
                let files = copy_directory(&database.migrations_path, &target)?;
                copied.push(CopiedMigrations {
                    database: database.name.clone(),
                    from: database.migrations_path.clone(),
                    to: target.clone(),
                    files,
                });
                relative_path(&target, &base)
            }
            None => relative_path(&database.migrations_path, &opts.app_root),
        };

        manifest.databases.push(ManifestDatabase {
            name: database.name.clone(),
            migrations: to_slash(&recorded),
        });
    }

    let rendered = manifest.render(format)?;

    if let Some(path) = &output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &rendered)?;
        tracing::info!(
            path = %path.display(),
            format = ?format,
            databases = manifest.databases.len(),
            "Manifest generated"
        );
    }

    Ok(GenerateReport {
        manifest,
        rendered,
        output,
        copied,
    })
}

/// Copy `src` into `dst` recursively, skipping hidden files and directories.
/// Returns the number of files copied.
pub fn copy_directory(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(MigratorError::MigrationParseError(format!(
            "Source is not a directory: {}",
            src.display()
        )));
    }

    let mut files = 0;
    let walker = WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| MigratorError::ConfigError(e.to_string()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Origin;

    fn app_with_migrations() -> (tempfile::TempDir, Vec<LogicalDatabase>) {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("orders/migrations");
        std::fs::create_dir_all(migrations.join("nested")).unwrap();
        std::fs::create_dir_all(migrations.join(".git")).unwrap();
        std::fs::write(migrations.join("1_init.up.sql"), "CREATE TABLE o (id int);").unwrap();
        std::fs::write(migrations.join("nested/extra.sql"), "").unwrap();
        std::fs::write(migrations.join(".hidden"), "").unwrap();
        std::fs::write(migrations.join(".git/config"), "").unwrap();

        let dbs = vec![LogicalDatabase {
            name: "orders".into(),
            migrations_path: migrations,
            origin: Origin::Source {
                file: dir.path().join("orders/db.go"),
                line: 3,
            },
        }];
        (dir, dbs)
    }

    #[test]
    fn test_generate_relative_to_app_root() {
        let (dir, dbs) = app_with_migrations();
        let output = dir.path().join("encore-databases.yaml");
        let report = execute(
            &dbs,
            &GenerateOptions {
                app_root: dir.path().to_path_buf(),
                output: Some(output.clone()),
                copy_to: None,
                format: None,
            },
        )
        .unwrap();

        assert_eq!(report.manifest.databases[0].migrations, "orders/migrations");
        let written = std::fs::read_to_string(&output).unwrap();
        let parsed = Manifest::parse(&written, ManifestFormat::Yaml).unwrap();
        assert_eq!(parsed, report.manifest);

        let loaded = crate::manifest::load_manifest(&output, dir.path()).unwrap();
        assert_eq!(loaded[0].migrations_path, dbs[0].migrations_path);
    }

    #[test]
    fn test_generate_with_copy_records_path_from_manifest_dir() {
        let (dir, dbs) = app_with_migrations();
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("manifests/dbs.json");
        let report = execute(
            &dbs,
            &GenerateOptions {
                app_root: dir.path().to_path_buf(),
                output: Some(output.clone()),
                copy_to: Some(out.path().join("copied")),
                format: None,
            },
        )
        .unwrap();

        assert_eq!(report.manifest.databases[0].migrations, "../copied/orders");
        assert_eq!(report.copied[0].files, 2);
        assert!(out.path().join("copied/orders/1_init.up.sql").is_file());
        assert!(out.path().join("copied/orders/nested/extra.sql").is_file());
        assert!(!out.path().join("copied/orders/.hidden").exists());
        assert!(!out.path().join("copied/orders/.git").exists());

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.trim_start().starts_with('{'));
    }

    #[test]
    fn test_generate_requires_databases() {
        let opts = GenerateOptions {
            app_root: PathBuf::from("/app"),
            output: None,
            copy_to: None,
            format: Some(ManifestFormat::Json),
        };
        assert!(matches!(execute(&[], &opts), Err(MigratorError::NoDatabases)));
    }
}
