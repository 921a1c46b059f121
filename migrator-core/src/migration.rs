//! Migration source files in golang-migrate layout.
//!
//! Each version is a pair `{version}_{title}.up.{ext}` / `{version}_{title}.down.{ext}`.
//! Either half may be missing; a missing half changes the version without running SQL.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MigratorError, Result};

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)_(.*)\.(down|up)\.(.*)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// One half of a migration pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: u64,
    pub title: String,
    pub direction: Direction,
    pub path: PathBuf,
}

/// Parse a filename. `None` for files that are not migrations.
pub fn parse_migration_filename(filename: &str) -> Option<(u64, String, Direction)> {
    let caps = FILENAME_RE.captures(filename)?;
    let version = caps.get(1)?.as_str().parse::<u64>().ok()?;
    let title = caps.get(2)?.as_str().to_string();
    let direction = match caps.get(3)?.as_str() {
        "up" => Direction::Up,
        _ => Direction::Down,
    };
    Some((version, title, direction))
}

#[derive(Debug, Clone, Default)]
struct Pair {
    up: Option<MigrationFile>,
    down: Option<MigrationFile>,
}

/// The ordered set of migrations found in one directory.
#[derive(Debug, Clone, Default)]
pub struct MigrationSource {
    dir: PathBuf,
    versions: BTreeMap<u64, Pair>,
}

impl MigrationSource {
    /// Read `dir` (non-recursive). Duplicate files for the same version and direction are an error.
    pub fn scan(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(MigratorError::MigrationParseError(format!(
                "Migrations directory '{}' does not exist",
                dir.display()
            )));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            MigratorError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read migration directory '{}': {}", dir.display(), e),
            ))
        })?;

        let mut versions: BTreeMap<u64, Pair> = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, title, direction)) = parse_migration_filename(filename) else {
                tracing::debug!(file = %filename, "Ignoring non-migration file");
                continue;
            };

            let pair = versions.entry(version).or_default();
            let slot = match direction {
                Direction::Up => &mut pair.up,
                Direction::Down => &mut pair.down,
            };
            if let Some(existing) = slot {
                return Err(MigratorError::MigrationParseError(format!(
                    "Duplicate {} migration for version {}: '{}' and '{}'",
                    direction,
                    version,
                    existing.path.display(),
                    path.display()
                )));
            }
            *slot = Some(MigrationFile {
                version,
                title,
                direction,
                path,
            });
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            versions,
        })
    }

    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.versions.keys().copied()
    }

    pub fn contains(&self, version: u64) -> bool {
        self.versions.contains_key(&version)
    }

    pub fn first(&self) -> Option<u64> {
        self.versions.keys().next().copied()
    }

    /// Smallest version strictly greater than `version`.
    pub fn next(&self, version: u64) -> Option<u64> {
        self.versions
            .range(version.saturating_add(1)..)
            .next()
            .map(|(v, _)| *v)
    }

    /// Largest version strictly less than `version`.
    pub fn prev(&self, version: u64) -> Option<u64> {
        self.versions.range(..version).next_back().map(|(v, _)| *v)
    }

    /// Migration file for `version` in `direction`, if that half exists.
    pub fn file(&self, version: u64, direction: Direction) -> Option<&MigrationFile> {
        let pair = self.versions.get(&version)?;
        match direction {
            Direction::Up => pair.up.as_ref(),
            Direction::Down => pair.down.as_ref(),
        }
    }

    /// Contents of the file for `version` in `direction`, or `None` when that half is absent.
    pub fn read(&self, version: u64, direction: Direction) -> Result<Option<String>> {
        match self.file(version, direction) {
            Some(file) => Ok(Some(std::fs::read_to_string(&file.path)?)),
            None => Ok(None),
        }
    }

    /// Fails unless `version` exists in this source.
    pub fn ensure_contains(&self, version: u64) -> Result<()> {
        if self.contains(version) {
            Ok(())
        } else {
            Err(MigratorError::MissingMigration {
                version,
                path: self.dir.clone(),
            })
        }
    }
}

/// A single version transition: run `version`'s file in `direction`, ending at `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub version: u64,
    pub direction: Direction,
    pub target: Option<u64>,
}

/// Plan up to `limit` forward steps from `current` (all pending when `limit` is `None`).
pub fn plan_up(source: &MigrationSource, current: Option<u64>, limit: Option<usize>) -> Result<Vec<Step>> {
    let mut next = match current {
        Some(v) => {
            source.ensure_contains(v)?;
            source.next(v)
        }
        None => source.first(),
    };

    let mut steps = Vec::new();
    while let Some(version) = next {
        if limit.is_some_and(|l| steps.len() >= l) {
            break;
        }
        steps.push(Step {
            version,
            direction: Direction::Up,
            target: Some(version),
        });
        next = source.next(version);
    }
    Ok(steps)
}

/// Plan up to `limit` backward steps from `current` (everything when `limit` is `None`).
pub fn plan_down(source: &MigrationSource, current: Option<u64>, limit: Option<usize>) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    let Some(mut version) = current else {
        return Ok(steps);
    };
    source.ensure_contains(version)?;

    loop {
        if limit.is_some_and(|l| steps.len() >= l) {
            break;
        }
        let target = source.prev(version);
        steps.push(Step {
            version,
            direction: Direction::Down,
            target,
        });
        match target {
            Some(prev) => version = prev,
            None => break,
        }
    }
    Ok(steps)
}
