//! The integrity check: a read-only diff of expected vs. executed tasks.
//!
//! For every version (the init pseudo-version always included) the check
//! compares the number of task files that should have run against the
//! number of ledger rows recording tasks that did run. Versions newer than
//! the database's recorded baseline are not yet due, so their expectation
//! is pinned to whatever actually ran; versions newer than the *configured*
//! target are hidden entirely unless forced.

use crate::config::MigrationConfig;
use crate::db::RunContext;
use crate::error::MigrationError;
use crate::ledger::Ledger;
use crate::task::{discover_tasks, list_version_folders, INIT_VERSION};
use crate::version::Version;

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityOptions {
    /// Include future versions (beyond the configured target) in the
    /// result instead of hiding them.
    pub force: bool,
}

/// Expected/actual task counts for one version.
#[derive(Debug, Clone)]
pub struct IntegrityEntry {
    /// Version label: "init" or e.g. "1.2".
    pub version: String,
    /// The on-disk folder name (None for init).
    pub folder: Option<String>,
    /// Parsed version number (None for init).
    pub number: Option<Version>,
    pub expected: usize,
    pub actual: usize,
}

impl IntegrityEntry {
    /// Tasks exist on disk that have not run.
    pub fn is_pending(&self) -> bool {
        self.expected > self.actual
    }

    /// The ledger records more tasks than exist on disk: a corrupted or
    /// inconsistent ledger, fatal and never auto-repaired.
    pub fn is_corrupt(&self) -> bool {
        self.actual > self.expected
    }
}

/// Result of one integrity check. Not persisted; recomputed every run.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Entries in execution order: init first, then ascending versions.
    pub entries: Vec<IntegrityEntry>,
    /// Baseline version recorded on the init rows, if initialized.
    pub baseline: Option<String>,
    /// Version labels hidden because they lie beyond the configured
    /// target and were not forced.
    pub hidden: Vec<String>,
    /// Human-readable anomalies: unparseable folders, hidden versions.
    pub warnings: Vec<String>,
}

impl IntegrityReport {
    pub fn entry(&self, version: &str) -> Option<&IntegrityEntry> {
        self.entries.iter().find(|e| e.version == version)
    }

    /// Entries with work outstanding, in execution order.
    pub fn pending(&self) -> impl Iterator<Item = &IntegrityEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }

    /// First corrupted entry, if any.
    pub fn corrupted(&self) -> Option<&IntegrityEntry> {
        self.entries.iter().find(|e| e.is_corrupt())
    }
}

/// Run the integrity check. Read-only; requires an initialized database
/// (a missing ledger table or database aborts the whole check with a
/// code-bearing error).
pub fn check(
    ctx: &mut RunContext<'_>,
    config: &MigrationConfig,
    options: IntegrityOptions,
) -> Result<IntegrityReport, MigrationError> {
    let target = config.target_version()?;
    let ledger = Ledger::new(config);
    let mut report = IntegrityReport::default();

    let baseline_raw = ledger.baseline_version(ctx)?;
    report.baseline = baseline_raw.clone();
    let baseline = match baseline_raw {
        Some(raw) => match Version::parse(&raw) {
            Some(v) => Some(v),
            None => {
                warn(&mut report, format!(
                    "recorded baseline version '{raw}' is not parseable; treating all versions as not yet due"
                ));
                None
            }
        },
        None => None,
    };

    // The init pseudo-version anchors the result.
    let init_actual = ledger.entries_for_version(ctx, INIT_VERSION)?.len();
    let init_expected = match discover_tasks(&config.init_dir(), INIT_VERSION) {
        Ok(tasks) => tasks.len(),
        Err(MigrationError::PathMissing(_)) => 0,
        Err(e) => return Err(e),
    };
    report.entries.push(IntegrityEntry {
        version: INIT_VERSION.to_string(),
        folder: None,
        number: None,
        expected: init_expected,
        actual: init_actual,
    });

    let folders = match list_version_folders(&config.versions_dir()) {
        Ok(folders) => folders,
        Err(MigrationError::PathMissing(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    for folder in folders {
        let number = match Version::from_folder(&folder) {
            Some(v) => v,
            None => {
                warn(&mut report, format!(
                    "version folder '{folder}' has no leading numeric version; skipping it"
                ));
                continue;
            }
        };
        if let Some(existing) = report
            .entries
            .iter()
            .find(|e| e.number.as_ref() == Some(&number))
        {
            return Err(MigrationError::Config(format!(
                "version folders '{}' and '{}' both resolve to version {}",
                existing.folder.as_deref().unwrap_or_default(),
                folder,
                number
            )));
        }

        let actual = ledger.entries_for_version(ctx, number.label())?.len();
        let due = baseline.as_ref().map(|b| number <= *b).unwrap_or(false);
        let expected = if due {
            discover_tasks(&config.versions_dir().join(&folder), number.label())?.len()
        } else {
            // Not yet due per the recorded baseline: whatever ran is
            // exactly what was expected to run.
            actual
        };

        if !options.force && number > target && expected != actual {
            warn(&mut report, format!(
                "version {} is beyond the configured target {} and out of sync \
                 (expected {expected}, recorded {actual}); hiding it. Re-run with the force flag to include it",
                number, target
            ));
            report.hidden.push(number.label().to_string());
            continue;
        }

        report.entries.push(IntegrityEntry {
            version: number.label().to_string(),
            folder: Some(folder),
            number: Some(number),
            expected,
            actual,
        });
    }

    // Init first, then ascending versions.
    report.entries.sort_by(|a, b| a.number.cmp(&b.number));
    Ok(report)
}

fn warn(report: &mut IntegrityReport, message: String) {
    #[cfg(feature = "tracing")]
    tracing::warn!("{message}");
    report.warnings.push(message);
}
