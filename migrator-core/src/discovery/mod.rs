//! Database discovery: source scanning or manifest loading, plus dedupe and filtering.

pub mod scanner;
pub mod syntax;

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::manifest;

pub use scanner::SourceScanner;

/// Where a declaration was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    Source { file: PathBuf, line: usize },
    Manifest { file: PathBuf },
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Source { file, line } => write!(f, "{}:{}", file.display(), line),
            Origin::Manifest { file } => write!(f, "{}", file.display()),
        }
    }
}

/// A database declared by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalDatabase {
    pub name: String,
    pub migrations_path: PathBuf,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    ParseFailure,
    ExtractionFailure,
    MissingMigrationsDir,
}

/// A non-fatal problem met during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: &Path, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "discovery error in {}: {}", self.file.display(), self.message)
    }
}

/// Result of a discovery pass: declarations plus the diagnostics collected along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub databases: Vec<LogicalDatabase>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A source of database declarations.
pub trait Discoverer {
    fn discover(&self, root: &Path) -> Result<Discovery>;
}

/// Reads declarations from a manifest file instead of source code.
#[derive(Debug, Clone)]
pub struct ManifestDiscoverer {
    path: PathBuf,
}

impl ManifestDiscoverer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Discoverer for ManifestDiscoverer {
    fn discover(&self, root: &Path) -> Result<Discovery> {
        tracing::debug!(path = %self.path.display(), "Loading databases from manifest");
        let databases = manifest::load_manifest(&self.path, root)?;
        Ok(Discovery {
            databases,
            diagnostics: Vec::new(),
        })
    }
}

/// Pick the manifest loader when a manifest path is given, otherwise the source scanner.
pub fn discoverer(manifest: Option<&Path>) -> Box<dyn Discoverer> {
    match manifest {
        Some(path) => Box::new(ManifestDiscoverer::new(path)),
        None => Box::new(SourceScanner::new()),
    }
}

/// Discover, deduplicate and log diagnostics.
pub fn discover(root: &Path, manifest: Option<&Path>) -> Result<Discovery> {
    let root = std::path::absolute(root)?;
    tracing::debug!(
        app_path = %root.display(),
        manifest_path = ?manifest.map(|p| p.display().to_string()),
        "Discovering databases"
    );

    let mut discovery = discoverer(manifest).discover(&root)?;
    discovery.databases = deduplicate(discovery.databases);

    for diagnostic in &discovery.diagnostics {
        tracing::warn!(kind = ?diagnostic.kind, "{}", diagnostic);
    }
    tracing::debug!(count = discovery.databases.len(), "Databases discovered");

    Ok(discovery)
}

/// The entry named `name`, as a singleton list, or an empty list.
pub fn filter(databases: &[LogicalDatabase], name: &str) -> Vec<LogicalDatabase> {
    databases
        .iter()
        .find(|db| db.name == name)
        .cloned()
        .into_iter()
        .collect()
}

/// Remove repeated names, keeping the first occurrence.
pub fn deduplicate(databases: Vec<LogicalDatabase>) -> Vec<LogicalDatabase> {
    let mut seen = HashSet::new();
    databases
        .into_iter()
        .filter(|db| seen.insert(db.name.clone()))
        .collect()
}

/// Lexically normalize a path: drop `.`, fold `..` into its parent, strip trailing separators.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Express `path` relative to `base`. Both should be absolute and clean.
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path.iter().zip(&base).take_while(|(a, b)| a == b).count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &path[common..] {
        out.push(component);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(name: &str, path: &str) -> LogicalDatabase {
        LogicalDatabase {
            name: name.to_string(),
            migrations_path: PathBuf::from(path),
            origin: Origin::Manifest {
                file: PathBuf::from("m.yaml"),
            },
        }
    }

    #[test]
    fn test_deduplicate_first_wins() {
        let result = deduplicate(vec![db("a", "/p1"), db("b", "/p2"), db("a", "/p3")]);
        assert_eq!(result, vec![db("a", "/p1"), db("b", "/p2")]);
    }

    #[test]
    fn test_filter() {
        let dbs = vec![db("a", "/p1"), db("b", "/p2")];
        assert_eq!(filter(&dbs, "b"), vec![db("b", "/p2")]);
        assert!(filter(&dbs, "c").is_empty());
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./d/")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("../a/..")), PathBuf::from(".."));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/app/svc/migrations"), Path::new("/app")),
            PathBuf::from("svc/migrations")
        );
        assert_eq!(
            relative_path(Path::new("/out/copied/orders"), Path::new("/out/manifests")),
            PathBuf::from("../copied/orders")
        );
        assert_eq!(relative_path(Path::new("/app"), Path::new("/app")), PathBuf::from("."));
    }

    #[test]
    fn test_discoverer_selects_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("m")).unwrap();
        let manifest = dir.path().join("dbs.yaml");
        std::fs::write(
            &manifest,
            "version: \"1\"\ndatabases:\n  - name: a\n    migrations: m\n  - name: a\n    migrations: m\n",
        )
        .unwrap();

        let discovery = discover(dir.path(), Some(&manifest)).unwrap();
        assert_eq!(discovery.databases.len(), 1);
        assert_eq!(discovery.databases[0].migrations_path, dir.path().join("m"));
    }

    #[test]
    fn test_discover_returns_diagnostics_with_databases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("db.go"),
            "package svc\nimport \"encore.dev/storage/sqldb\"\nvar db = sqldb.NewDatabase(\"svc\", sqldb.DatabaseConfig{Migrations: \"./missing\"})\n",
        )
        .unwrap();

        let discovery = discover(dir.path(), None).unwrap();
        assert_eq!(discovery.databases.len(), 1);
        assert_eq!(discovery.diagnostics.len(), 1);
        assert_eq!(discovery.diagnostics[0].kind, DiagnosticKind::MissingMigrationsDir);
    }
}
