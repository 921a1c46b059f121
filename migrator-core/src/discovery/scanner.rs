//! Static discovery of `sqldb.NewDatabase` declarations in Go source trees.

use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::syntax::{parse_file, Element, Expr, SourceFile};
use super::{clean_path, Diagnostic, DiagnosticKind, Discoverer, Discovery, LogicalDatabase, Origin};
use crate::error::Result;

/// Import path of the storage package whose constructor declares databases.
pub const STORAGE_IMPORT: &str = "encore.dev/storage/sqldb";

/// Name of the declaring constructor in the storage package.
pub const DECLARE_FN: &str = "NewDatabase";

/// Name of the config struct field holding the migrations directory.
pub const MIGRATIONS_FIELD: &str = "Migrations";

const SKIPPED_DIRS: &[&str] = &["vendor", "testdata", "node_modules"];

/// Walks a Go source tree and extracts database declarations.
#[derive(Debug, Default, Clone)]
pub struct SourceScanner;

impl SourceScanner {
    pub fn new() -> Self {
        Self
    }

    /// Scan `root` recursively. Only walk errors abort; everything else is a diagnostic.
    pub fn scan(&self, root: &Path) -> Result<Discovery> {
        let mut discovery = Discovery::default();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_go_source(entry.path()) {
                continue;
            }

            let path = entry.path();
            let source = match std::fs::read_to_string(path) {
                Ok(source) => source,
                Err(e) => {
                    discovery.diagnostics.push(Diagnostic::new(
                        path,
                        DiagnosticKind::ParseFailure,
                        format!("failed to read: {}", e),
                    ));
                    continue;
                }
            };

            let file = match parse_file(&source) {
                Ok(file) => file,
                Err(e) => {
                    discovery.diagnostics.push(Diagnostic::new(
                        path,
                        DiagnosticKind::ParseFailure,
                        format!("failed to parse: {}", e),
                    ));
                    continue;
                }
            };

            let (databases, diagnostics) = extract_declarations(&file, path);
            for db in &databases {
                tracing::debug!(database = %db.name, file = %path.display(), "Found database");
                if !db.migrations_path.is_dir() {
                    discovery.diagnostics.push(Diagnostic::new(
                        path,
                        DiagnosticKind::MissingMigrationsDir,
                        format!(
                            "migrations directory does not exist: {}",
                            db.migrations_path.display()
                        ),
                    ));
                }
            }
            discovery.databases.extend(databases);
            discovery.diagnostics.extend(diagnostics);
        }

        Ok(discovery)
    }
}

impl Discoverer for SourceScanner {
    fn discover(&self, root: &Path) -> Result<Discovery> {
        self.scan(root)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    SKIPPED_DIRS.contains(&name.as_ref()) || name.starts_with('.') || name.starts_with('_')
}

fn is_go_source(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    name.ends_with(".go") && !name.ends_with("_test.go")
}

/// Local name under which the storage package is imported.
///
/// `None` when it is not imported, or imported blank (`_`) or dot (`.`),
/// since calls cannot be attributed in those cases.
pub fn storage_alias(file: &SourceFile) -> Option<String> {
    let spec = file.imports.iter().find(|i| i.path == STORAGE_IMPORT)?;
    match spec.name.as_deref() {
        Some("_") | Some(".") => None,
        Some(alias) => Some(alias.to_string()),
        None => spec.path.rsplit('/').next().map(str::to_string),
    }
}

/// Extract declarations from a parsed file.
///
/// Pure: paths are resolved against `file_path`'s directory but not checked
/// for existence.
pub fn extract_declarations(
    file: &SourceFile,
    file_path: &Path,
) -> (Vec<LogicalDatabase>, Vec<Diagnostic>) {
    let mut databases = Vec::new();
    let mut diagnostics = Vec::new();

    let alias = match storage_alias(file) {
        Some(alias) => alias,
        None => return (databases, diagnostics),
    };

    let file_dir = file_path.parent().unwrap_or_else(|| Path::new(""));

    for call in &file.calls {
        let is_declaration = matches!(
            &call.fun,
            Expr::Selector(x, sel) if sel == DECLARE_FN && matches!(x.as_ref(), Expr::Ident(a) if *a == alias)
        );
        if !is_declaration {
            continue;
        }

        match declaration_args(&call.args) {
            Ok((name, migrations)) => databases.push(LogicalDatabase {
                name,
                migrations_path: resolve_relative(file_dir, &migrations),
                origin: Origin::Source {
                    file: file_path.to_path_buf(),
                    line: call.line,
                },
            }),
            Err(reason) => diagnostics.push(Diagnostic::new(
                file_path,
                DiagnosticKind::ExtractionFailure,
                format!("line {}: failed to extract database config: {}", call.line, reason),
            )),
        }
    }

    (databases, diagnostics)
}

fn declaration_args(args: &[Expr]) -> std::result::Result<(String, String), String> {
    if args.len() < 2 {
        return Err(format!("expected 2 arguments to {}, got {}", DECLARE_FN, args.len()));
    }

    let name = string_literal(&args[0]).map_err(|e| format!("extracting database name: {}", e))?;
    let migrations =
        migrations_field(&args[1]).map_err(|e| format!("extracting migrations path: {}", e))?;
    Ok((name, migrations))
}

fn string_literal(expr: &Expr) -> std::result::Result<String, String> {
    match expr {
        Expr::StringLit(value) => Ok(value.clone()),
        other => Err(format!("expected string literal, got {} `{}`", other.kind(), other)),
    }
}

fn migrations_field(expr: &Expr) -> std::result::Result<String, String> {
    let elts = match expr {
        Expr::Composite { elts, .. } => elts,
        other => {
            return Err(format!(
                "expected composite literal for DatabaseConfig, got {}",
                other.kind()
            ))
        }
    };

    elts.iter()
        .find_map(|elt| match elt {
            Element::KeyValue { key: Expr::Ident(key), value } if key == MIGRATIONS_FIELD => {
                Some(string_literal(value))
            }
            _ => None,
        })
        .unwrap_or_else(|| Err(format!("{} field not found in DatabaseConfig", MIGRATIONS_FIELD)))
}

/// Anchor a declared migrations path under the declaring file's directory.
///
/// A leading root is dropped rather than honoured, so `"/migrations"` lands
/// next to the file like `"./migrations"` does.
fn resolve_relative(dir: &Path, path: &str) -> PathBuf {
    let relative: PathBuf = Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    clean_path(&dir.join(relative))
}
