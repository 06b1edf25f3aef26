//! Caller-injected lifecycle hooks.
//!
//! Hooks are an explicit capability set handed to the
//! [Migrator](crate::Migrator) at construction, not modules discovered by
//! convention path. `before`/`after` run once per run inside the ambient
//! transaction; `before_each`/`after_each` bracket every executed task;
//! `shutdown` runs after the lock is released on every exit path.

use crate::db::RunContext;
use crate::error::MigrationError;
use crate::task::MigrationTask;

/// A run-level hook.
pub type RunHook =
    Box<dyn Fn(&mut RunContext<'_>) -> Result<(), MigrationError> + Send + Sync>;

/// A task-level hook.
pub type TaskHook =
    Box<dyn Fn(&mut RunContext<'_>, &MigrationTask) -> Result<(), MigrationError> + Send + Sync>;

/// The optional hook set. All fields default to absent.
#[derive(Default)]
pub struct Hooks {
    pub before: Option<RunHook>,
    pub after: Option<RunHook>,
    pub before_each: Option<TaskHook>,
    pub after_each: Option<TaskHook>,
    pub shutdown: Option<RunHook>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}
