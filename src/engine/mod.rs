mod runner;

use std::sync::Arc;

use crate::transform::Transformer;

pub(crate) use runner::run_tasks_parallel;
pub use runner::{Diagnostics, TaskExecution, TaskOutcome};

#[cfg(feature = "live")]
pub use runner::{Dispatcher, Reloader, ServeOptions, ServeState, Signal, WatchRule, serve};

/// A node of the task graph.
#[derive(Clone)]
pub(crate) struct Task {
    pub name: String,
    pub dependencies: Vec<String>,
    /// `None` for tasks that only group their prerequisites.
    pub action: Option<Arc<dyn Transformer>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("action", &self.action.is_some())
            .finish()
    }
}
