//! Migration task discovery and parsing.
//!
//! A migration tree looks like:
//!
//! ```text
//! migrations/
//!   init/
//!     1-create-users.sql
//!     2-create-profiles.sql
//!   versions/
//!     1.1-members/
//!       1-add-member-flag.sql
//!     2.0/
//!       1-split-names.sql
//!       2-rebuild-index.sql
//! ```
//!
//! Task files are `.sql`, named `<ordinal>-<name>.sql` (underscore works
//! too); the ordinal establishes execution order within the folder. Files
//! without an ordinal prefix and non-`.sql` files are ignored.
//!
//! A task may carry directives in leading comment lines:
//!
//! ```text
//! -- stratum:implicit-commit
//! CREATE TABLE accounts (...);
//! ```
//!
//! `implicit-commit` declares that the body's statements end the ambient
//! transaction inside the engine (DDL auto-commit). A `-- stratum:undo`
//! line splits the file: everything below it is the task's undo script,
//! which is never executed by the orchestrator itself.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::MigrationError;

/// Reserved pseudo-version for the baseline task set.
pub const INIT_VERSION: &str = "init";

const DIRECTIVE_PREFIX: &str = "-- stratum:";
const DIRECTIVE_IMPLICIT_COMMIT: &str = "implicit-commit";
const DIRECTIVE_UNDO: &str = "undo";

/// One executable schema-change unit, discovered fresh from disk on every
/// run. Only its execution record persists (as a ledger row).
#[derive(Debug, Clone)]
pub struct MigrationTask {
    /// File stem, unique within the version folder, e.g. "1-create-users".
    pub name: String,
    /// Version label this task belongs to: "init" or e.g. "1.2".
    pub version: String,
    /// Parsed ordinal prefix establishing execution order.
    pub ordinal: u32,
    pub path: PathBuf,
    /// The body's statements end the transaction inside the engine.
    pub implicit_commits: bool,
    sql: String,
    undo_sql: Option<String>,
}

impl MigrationTask {
    /// The SQL to execute against the ambient transaction.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The undo script below the `-- stratum:undo` marker, if any.
    pub fn undo_sql(&self) -> Option<&str> {
        self.undo_sql.as_deref()
    }

    fn from_file(path: &Path, version: &str) -> Result<Option<Self>, MigrationError> {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return Ok(None),
        };
        let re = Regex::new(r"^(\d+)[-_](.+)\.sql$").expect("valid task pattern");
        let caps = match re.captures(file_name) {
            Some(c) => c,
            None => return Ok(None),
        };
        let ordinal: u32 = caps
            .get(1)
            .expect("group 1 always present")
            .as_str()
            .parse()
            .map_err(|_| {
                MigrationError::Config(format!(
                    "task file '{}' has an ordinal prefix that does not fit in u32",
                    path.display()
                ))
            })?;
        let name = file_name
            .strip_suffix(".sql")
            .expect("matched by pattern")
            .to_string();

        let content = fs::read_to_string(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let (implicit_commits, sql, undo_sql) = parse_body(&content);

        Ok(Some(MigrationTask {
            name,
            version: version.to_string(),
            ordinal,
            path: path.to_path_buf(),
            implicit_commits,
            sql,
            undo_sql,
        }))
    }
}

/// Split a task file into directives, the up script and the undo script.
fn parse_body(content: &str) -> (bool, String, Option<String>) {
    let mut implicit_commits = false;
    let mut up = Vec::new();
    let mut undo: Option<Vec<&str>> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(directive) = trimmed.strip_prefix(DIRECTIVE_PREFIX) {
            match directive.trim() {
                DIRECTIVE_IMPLICIT_COMMIT => implicit_commits = true,
                DIRECTIVE_UNDO => undo = Some(Vec::new()),
                // Unknown directives are kept as plain comments so that
                // future additions do not break older binaries.
                _ => match undo.as_mut() {
                    Some(section) => section.push(line),
                    None => up.push(line),
                },
            }
            continue;
        }
        match undo.as_mut() {
            Some(section) => section.push(line),
            None => up.push(line),
        }
    }

    let up = up.join("\n").trim().to_string();
    let undo = undo
        .map(|section| section.join("\n").trim().to_string())
        .filter(|s| !s.is_empty());
    (implicit_commits, up, undo)
}

/// Discover the ordered task list of one version folder.
///
/// Fails with [MigrationError::PathMissing] when the folder does not
/// exist; callers treat that as "zero tasks" for the init version only.
/// Duplicate ordinals within one folder are a configuration error: the
/// execution order would be ambiguous.
pub fn discover_tasks(dir: &Path, version: &str) -> Result<Vec<MigrationTask>, MigrationError> {
    if !dir.is_dir() {
        return Err(MigrationError::PathMissing(dir.to_path_buf()));
    }

    let entries = fs::read_dir(dir).map_err(|source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut tasks: Vec<MigrationTask> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(task) = MigrationTask::from_file(&path, version)? {
            if let Some(existing) = tasks.iter().find(|t| t.ordinal == task.ordinal) {
                return Err(MigrationError::Config(format!(
                    "duplicate task ordinal {} in {}: '{}' and '{}'",
                    task.ordinal,
                    dir.display(),
                    existing.name,
                    task.name
                )));
            }
            tasks.push(task);
        }
    }

    tasks.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
    Ok(tasks)
}

/// List the immediate subdirectories of the versions root.
///
/// Fails with [MigrationError::PathMissing] when the root does not exist;
/// callers treat that as "no versions beyond init".
pub fn list_version_folders(root: &Path) -> Result<Vec<String>, MigrationError> {
    if !root.is_dir() {
        return Err(MigrationError::PathMissing(root.to_path_buf()));
    }

    let entries = fs::read_dir(root).map_err(|source| MigrationError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                folders.push(name.to_string());
            }
        }
    }
    folders.sort();
    Ok(folders)
}
