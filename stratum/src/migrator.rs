//! The migration executor and its operation surface.
//!
//! A [Migrator] owns the configuration and the injected hook set, and
//! exposes the operations a deployment pipeline calls: [init](Migrator::init),
//! [migrate](Migrator::migrate), [reset](Migrator::reset) and
//! [is_database_ok](Migrator::is_database_ok). Every operation takes the
//! connection explicitly; nothing is ambient.
//!
//! A run moves through: lock acquired → before hook → per-task protocol →
//! after hook → unlock. The unlock leg is unconditional: expected failures,
//! unexpected failures and success all pass through it, and the shutdown
//! hook fires after it on every path.

use crate::config::MigrationConfig;
use crate::db::{DbConn, DbError, DbErrorKind, RunContext};
use crate::error::MigrationError;
use crate::hooks::Hooks;
use crate::integrity::{self, IntegrityEntry, IntegrityOptions, IntegrityReport};
use crate::ledger::Ledger;
use crate::lock::LockManager;
use crate::task::{discover_tasks, list_version_folders, MigrationTask, INIT_VERSION};
use crate::version::Version;

/// Options for [Migrator::migrate].
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Restrict the run to exactly this version (dotted numeric label).
    pub version: Option<String>,
    /// Run only the task at this 1-based position. Requires `version`.
    pub only: Option<usize>,
    /// Exclude the task at this 1-based position. Requires `version`;
    /// mutually exclusive with `only`.
    pub skip: Option<usize>,
    /// Include versions beyond the configured target.
    pub force: bool,
    /// Initialize the database first when it has never been initialized.
    pub init: bool,
}

/// Options for [Migrator::init].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Do not back-fill ledger rows for on-disk non-init versions.
    pub skip_backfill: bool,
    /// Run only the init task at this 1-based position.
    pub only: Option<usize>,
    /// Suppress the injected hook set for this run.
    pub disable_hooks: bool,
    /// Record init tasks without executing their bodies (the baseline
    /// schema was applied by other means).
    pub no_scripts: bool,
}

/// A (version, task) reference in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub version: String,
    pub name: String,
}

impl TaskRef {
    fn of(task: &MigrationTask) -> Self {
        Self {
            version: task.version.clone(),
            name: task.name.clone(),
        }
    }
}

/// A report of actions performed by [Migrator::migrate].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateReport {
    /// Tasks executed and recorded, in execution order.
    pub executed: Vec<TaskRef>,
    /// Tasks skipped because a ledger row already existed.
    pub skipped: Vec<TaskRef>,
    /// Warnings carried over from the integrity check.
    pub warnings: Vec<String>,
}

/// A report of actions performed by [Migrator::init].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Init tasks executed (or recorded, under `no_scripts`).
    pub executed: Vec<TaskRef>,
    /// Ledger rows created for future versions without execution.
    pub backfilled: Vec<TaskRef>,
    /// Tasks whose ledger row already existed.
    pub skipped: Vec<TaskRef>,
}

/// The migration orchestrator.
///
/// Construct with [Migrator::new], optionally attach hooks with the
/// builder methods, then call the operations with a driver connection.
///
/// ```no_run
/// use stratum::{MigrateOptions, MigrationConfig, Migrator};
/// use stratum::sqlite::SqliteConn;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = MigrationConfig::new("db/migrations", "1.2");
///     let migrator = Migrator::new(config);
///     let mut conn = SqliteConn::open("app.db")?;
///     let report = migrator.migrate(&mut conn, &MigrateOptions { init: true, ..Default::default() })?;
///     println!("applied {} task(s)", report.executed.len());
///     Ok(())
/// }
/// ```
pub struct Migrator {
    config: MigrationConfig,
    hooks: Hooks,
}

// Manual Debug impl since hooks hold closures
impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Migrator {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            hooks: Hooks::default(),
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Hook run once per run, inside the transaction, before any task.
    pub fn on_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.hooks.before = Some(Box::new(hook));
        self
    }

    /// Hook run once per run, inside the transaction, after the last task.
    pub fn on_after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.hooks.after = Some(Box::new(hook));
        self
    }

    /// Hook run before every executed task.
    pub fn on_before_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext<'_>, &MigrationTask) -> Result<(), MigrationError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.before_each = Some(Box::new(hook));
        self
    }

    /// Hook run after every executed task.
    pub fn on_after_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext<'_>, &MigrationTask) -> Result<(), MigrationError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.after_each = Some(Box::new(hook));
        self
    }

    /// Hook run after the lock is released, on every exit path. Its error
    /// is logged and swallowed; the run's own outcome takes precedence.
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.hooks.shutdown = Some(Box::new(hook));
        self
    }

    /// Read-only integrity check; acquires no lock and opens no
    /// transaction of its own.
    pub fn integrity_check(
        &self,
        conn: &mut dyn DbConn,
        force: bool,
    ) -> Result<IntegrityReport, MigrationError> {
        self.config.validate()?;
        let mut ctx = RunContext::new(conn);
        integrity::check(&mut ctx, &self.config, IntegrityOptions { force })
    }

    /// Bring the database schema up to date.
    pub fn migrate(
        &self,
        conn: &mut dyn DbConn,
        options: &MigrateOptions,
    ) -> Result<MigrateReport, MigrationError> {
        self.config.validate()?;
        if options.only.is_some() && options.skip.is_some() {
            return Err(MigrationError::Config(
                "'only' and 'skip' are mutually exclusive".to_string(),
            ));
        }
        if (options.only.is_some() || options.skip.is_some()) && options.version.is_none() {
            return Err(MigrationError::Config(
                "'only' and 'skip' require an explicitly requested version".to_string(),
            ));
        }
        let requested = match &options.version {
            Some(raw) => Some(Version::parse(raw).ok_or_else(|| {
                MigrationError::Config(format!(
                    "requested version '{raw}' is not a dotted numeric version"
                ))
            })?),
            None => None,
        };

        if options.init && !self.is_initialized(conn)? {
            self.init(conn, &InitOptions::default())?;
        }

        let mut ctx = RunContext::new(conn);
        ctx.begin()?;
        let lock = LockManager::new(&self.config);
        if let Err(e) = lock
            .ensure_table(&mut ctx)
            .and_then(|_| lock.acquire(&mut ctx))
        {
            let _ = ctx.rollback();
            self.fire_shutdown(&mut ctx);
            return Err(e);
        }

        let outcome = match self.run_pending(&mut ctx, options, requested.as_ref()) {
            Ok(report) => {
                match lock
                    .release(&mut ctx)
                    .and_then(|_| ctx.commit().map_err(MigrationError::from))
                {
                    Ok(()) => Ok(report),
                    Err(e) => {
                        let _ = ctx.rollback();
                        let _ = lock.release(&mut ctx);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                let _ = ctx.rollback();
                let _ = lock.release(&mut ctx);
                Err(e)
            }
        };
        self.fire_shutdown(&mut ctx);
        outcome
    }

    fn run_pending(
        &self,
        ctx: &mut RunContext<'_>,
        options: &MigrateOptions,
        requested: Option<&Version>,
    ) -> Result<MigrateReport, MigrationError> {
        let diff = integrity::check(
            ctx,
            &self.config,
            IntegrityOptions {
                force: options.force,
            },
        )?;
        let mut report = MigrateReport {
            warnings: diff.warnings.clone(),
            ..Default::default()
        };

        if let Some(corrupt) = diff.corrupted() {
            return Err(MigrationError::StateError {
                version: corrupt.version.clone(),
                expected: corrupt.expected,
                actual: corrupt.actual,
            });
        }

        if let Some(req) = requested {
            let known = diff
                .entries
                .iter()
                .any(|e| e.number.as_ref() == Some(req));
            if !known {
                let hidden = diff
                    .hidden
                    .iter()
                    .any(|h| Version::parse(h).as_ref() == Some(req));
                if hidden {
                    // The warning directing the operator to --force is
                    // already in the report; this is not an execution
                    // attempt.
                    return Ok(report);
                }
                return Err(MigrationError::Config(format!(
                    "requested version '{}' has no folder under {}",
                    req,
                    self.config.versions_dir().display()
                )));
            }
        }

        let pending: Vec<&IntegrityEntry> = diff
            .entries
            .iter()
            .filter(|e| e.is_pending())
            .filter(|e| requested.map_or(true, |r| e.number.as_ref() == Some(r)))
            .collect();
        if pending.is_empty() {
            return Ok(report);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            versions = ?pending.iter().map(|e| e.version.as_str()).collect::<Vec<_>>(),
            "running pending migrations"
        );

        self.fire(ctx, &self.hooks.before)?;
        let ledger = Ledger::new(&self.config);
        for entry in pending {
            let dir = match &entry.folder {
                Some(folder) => self.config.versions_dir().join(folder),
                None => self.config.init_dir(),
            };
            let tasks = discover_tasks(&dir, &entry.version)?;
            for (position, task) in tasks.iter().enumerate() {
                let position = position + 1;
                if let Some(only) = options.only {
                    if position != only {
                        continue;
                    }
                }
                if let Some(skip) = options.skip {
                    if position == skip {
                        continue;
                    }
                }
                self.run_task(
                    ctx,
                    &ledger,
                    task,
                    true,
                    true,
                    &mut report.executed,
                    &mut report.skipped,
                )?;
            }
        }
        self.fire(ctx, &self.hooks.after)?;
        Ok(report)
    }

    /// Bootstrap a fresh database: bookkeeping tables, the init baseline,
    /// and ledger back-fill for already-existing future versions.
    pub fn init(
        &self,
        conn: &mut dyn DbConn,
        options: &InitOptions,
    ) -> Result<InitReport, MigrationError> {
        self.config.validate()?;

        let mut ctx = RunContext::new(conn);
        ctx.begin()?;
        let ledger = Ledger::new(&self.config);
        let lock = LockManager::new(&self.config);
        if let Err(e) = ledger
            .ensure_table(&mut ctx)
            .and_then(|_| lock.ensure_table(&mut ctx))
            .and_then(|_| lock.acquire(&mut ctx))
        {
            let _ = ctx.rollback();
            self.fire_shutdown(&mut ctx);
            return Err(e);
        }

        let outcome = match self.run_init(&mut ctx, &ledger, options) {
            Ok(report) => {
                match lock
                    .release(&mut ctx)
                    .and_then(|_| ctx.commit().map_err(MigrationError::from))
                {
                    Ok(()) => Ok(report),
                    Err(e) => {
                        let _ = ctx.rollback();
                        let _ = lock.release(&mut ctx);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                let _ = ctx.rollback();
                let _ = lock.release(&mut ctx);
                Err(e)
            }
        };
        self.fire_shutdown(&mut ctx);
        outcome
    }

    fn run_init(
        &self,
        ctx: &mut RunContext<'_>,
        ledger: &Ledger<'_>,
        options: &InitOptions,
    ) -> Result<InitReport, MigrationError> {
        let hooks_enabled = !options.disable_hooks;
        let mut report = InitReport::default();

        // A missing init directory means an empty baseline, not an error.
        let tasks = match discover_tasks(&self.config.init_dir(), INIT_VERSION) {
            Ok(tasks) => tasks,
            Err(MigrationError::PathMissing(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        if hooks_enabled {
            self.fire(ctx, &self.hooks.before)?;
        }
        for (position, task) in tasks.iter().enumerate() {
            if let Some(only) = options.only {
                if position + 1 != only {
                    continue;
                }
            }
            self.run_task(
                ctx,
                ledger,
                task,
                !options.no_scripts,
                hooks_enabled,
                &mut report.executed,
                &mut report.skipped,
            )?;
        }

        if !options.skip_backfill {
            self.backfill(ctx, ledger, &mut report)?;
        }
        if hooks_enabled {
            self.fire(ctx, &self.hooks.after)?;
        }
        Ok(report)
    }

    /// Record every task of every parseable on-disk non-init version
    /// without executing it, so a freshly-initialized database is not
    /// considered behind on migrations its baseline already encodes.
    fn backfill(
        &self,
        ctx: &mut RunContext<'_>,
        ledger: &Ledger<'_>,
        report: &mut InitReport,
    ) -> Result<(), MigrationError> {
        let folders = match list_version_folders(&self.config.versions_dir()) {
            Ok(folders) => folders,
            Err(MigrationError::PathMissing(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for folder in folders {
            let number = match Version::from_folder(&folder) {
                Some(v) => v,
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(folder = %folder, "skipping unparseable version folder in backfill");
                    continue;
                }
            };
            let tasks =
                discover_tasks(&self.config.versions_dir().join(&folder), number.label())?;
            for task in &tasks {
                match ledger.record_executed(
                    ctx,
                    &task.name,
                    &task.version,
                    &self.config.current_version,
                ) {
                    Ok(()) => report.backfilled.push(TaskRef::of(task)),
                    Err(MigrationError::AlreadyRecorded { .. }) => {
                        report.skipped.push(TaskRef::of(task))
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// The per-task protocol: pre-check, before_each, execute, implicit
    /// commit acknowledgement, record, after_each.
    #[allow(clippy::too_many_arguments)]
    fn run_task(
        &self,
        ctx: &mut RunContext<'_>,
        ledger: &Ledger<'_>,
        task: &MigrationTask,
        execute_body: bool,
        hooks_enabled: bool,
        executed: &mut Vec<TaskRef>,
        skipped: &mut Vec<TaskRef>,
    ) -> Result<(), MigrationError> {
        if ledger.exists(ctx, &task.name, &task.version)? {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                version = %task.version,
                name = %task.name,
                "task already recorded; skipping"
            );
            skipped.push(TaskRef::of(task));
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        let _span =
            tracing::info_span!("migration_task", version = %task.version, name = %task.name)
                .entered();

        if hooks_enabled {
            self.fire_task(ctx, &self.hooks.before_each, task)?;
        }

        if execute_body {
            #[cfg(feature = "tracing")]
            tracing::info!("executing task");
            ctx.execute_batch(task.sql())
                .map_err(|e| translate_task_failure(task, e))?;
        }

        let recorded = if task.implicit_commits && execute_body {
            // The engine has ended the ambient transaction; everything up
            // to here is durable. Record this task in its own scope and
            // commit it, so ledger and schema stay consistent; later
            // tasks run in a fresh scope without rollback protection for
            // what came before.
            ctx.acknowledge_implicit_commit();
            ctx.begin()?;
            let recorded = self.record_or_skip(ctx, ledger, task)?;
            ctx.commit()?;
            ctx.begin()?;
            recorded
        } else {
            self.record_or_skip(ctx, ledger, task)?
        };

        if recorded {
            executed.push(TaskRef::of(task));
        } else {
            skipped.push(TaskRef::of(task));
        }

        if hooks_enabled {
            self.fire_task(ctx, &self.hooks.after_each, task)?;
        }
        Ok(())
    }

    /// A races-losing duplicate insert degrades to a skip, not a failure.
    fn record_or_skip(
        &self,
        ctx: &mut RunContext<'_>,
        ledger: &Ledger<'_>,
        task: &MigrationTask,
    ) -> Result<bool, MigrationError> {
        match ledger.record_executed(ctx, &task.name, &task.version, &self.config.current_version)
        {
            Ok(()) => Ok(true),
            Err(MigrationError::AlreadyRecorded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop everything in the target schema, bookkeeping included.
    pub fn reset(&self, conn: &mut dyn DbConn) -> Result<(), MigrationError> {
        let mut ctx = RunContext::new(conn);
        ctx.drop_all()?;
        #[cfg(feature = "tracing")]
        tracing::info!("database reset; run init to re-create the baseline");
        self.fire_shutdown(&mut ctx);
        Ok(())
    }

    /// Resolve silently when the database is initialized, fully migrated
    /// and consistent; otherwise raise the matching code-bearing error.
    pub fn is_database_ok(&self, conn: &mut dyn DbConn) -> Result<(), MigrationError> {
        self.config.validate()?;
        let mut ctx = RunContext::new(conn);
        let report = integrity::check(&mut ctx, &self.config, IntegrityOptions::default())?;

        if report.baseline.is_none() {
            return Err(MigrationError::not_initialized(
                "the ledger has no init rows",
            ));
        }
        if let Some(corrupt) = report.corrupted() {
            return Err(MigrationError::StateError {
                version: corrupt.version.clone(),
                expected: corrupt.expected,
                actual: corrupt.actual,
            });
        }
        let behind: Vec<String> = report
            .pending()
            .map(|e| e.version.clone())
            .collect();
        if !behind.is_empty() {
            return Err(MigrationError::NeedsMigration { versions: behind });
        }
        Ok(())
    }

    fn is_initialized(&self, conn: &mut dyn DbConn) -> Result<bool, MigrationError> {
        let mut ctx = RunContext::new(conn);
        match Ledger::new(&self.config).baseline_version(&mut ctx) {
            Ok(baseline) => Ok(baseline.is_some()),
            Err(MigrationError::NotInitialized { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fire(
        &self,
        ctx: &mut RunContext<'_>,
        hook: &Option<crate::hooks::RunHook>,
    ) -> Result<(), MigrationError> {
        if let Some(hook) = hook {
            hook(ctx)?;
        }
        Ok(())
    }

    fn fire_task(
        &self,
        ctx: &mut RunContext<'_>,
        hook: &Option<crate::hooks::TaskHook>,
        task: &MigrationTask,
    ) -> Result<(), MigrationError> {
        if let Some(hook) = hook {
            hook(ctx, task)?;
        }
        Ok(())
    }

    fn fire_shutdown(&self, ctx: &mut RunContext<'_>) {
        if let Some(hook) = &self.hooks.shutdown {
            if let Err(_e) = hook(ctx) {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "shutdown hook failed");
            }
        }
    }
}

/// Wrap a task-body failure into the operator-facing taxonomy. The
/// key-too-long class gets its own actionable message because it is a
/// known cross-engine encoding pitfall the operator can fix.
fn translate_task_failure(task: &MigrationTask, e: DbError) -> MigrationError {
    let message = match e.kind {
        DbErrorKind::KeyTooLong => format!(
            "an indexed key exceeds the engine's maximum length ({}). \
             Reset the database, shorten the offending indexed field(s) and re-run",
            e.message
        ),
        _ => e.message,
    };
    MigrationError::ScriptFailed {
        version: task.version.clone(),
        task: task.name.clone(),
        message,
    }
}
