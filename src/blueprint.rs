use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::engine::{Diagnostics, Task, run_tasks_parallel};
use crate::error::{BuildError, OrchestrationError};
use crate::transform::Transformer;
use crate::Environment;

/// The blueprint for a build.
///
/// `Blueprint` is used to declare the tasks of a project: each one gets a
/// unique name, the names of the tasks that must complete before it and the
/// transformer it runs. Nothing is checked until [`Blueprint::finish`], so
/// tasks may be declared in any order.
///
/// # Example
///
/// ```rust,no_run
/// use fuigo::{Blueprint, FileSet};
/// use fuigo::transform::{CleanOutput, CopyFiles};
///
/// let mut blueprint = Blueprint::new();
/// blueprint
///     .task("clean")
///     .run(CleanOutput::new([".tmp".into()], "dist", [".git".to_string()]));
/// blueprint
///     .task("copy")
///     .depends_on(["clean"])
///     .run(CopyFiles::new("copy", FileSet::new(["app/*"])?, "dist"));
///
/// let pipeline = blueprint.finish()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    tasks: Vec<Task>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts declaring a task.
    pub fn task(&mut self, name: impl Into<String>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    /// Validates the declared tasks and builds the task graph.
    ///
    /// Duplicate names, prerequisites that were never declared and cycles
    /// are all rejected here, before anything runs.
    pub fn finish(self) -> Result<Pipeline, OrchestrationError> {
        let mut graph = Graph::new();
        let mut index = HashMap::new();

        for task in self.tasks {
            let name = task.name.clone();
            if index.contains_key(&name) {
                return Err(OrchestrationError::DuplicateTask(name));
            }
            index.insert(name, graph.add_node(task));
        }

        let mut edges = Vec::new();
        for target in graph.node_indices() {
            let task = &graph[target];
            for dependency in &task.dependencies {
                let Some(&source) = index.get(dependency) else {
                    return Err(OrchestrationError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((source, target));
            }
        }

        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        // We run toposort primarily to detect any cycles in the graph.
        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| OrchestrationError::Cycle(graph[cycle.node_id()].name.clone()))?;

        Ok(Pipeline { graph, index })
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: String,
    dependencies: Vec<String>,
}

impl TaskDef<'_> {
    /// Names tasks that must complete before this one starts.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Finishes the declaration with the transformer the task runs.
    pub fn run(self, action: impl Transformer + 'static) {
        self.push(Some(Arc::new(action)));
    }

    /// Finishes the declaration of a task that only runs its prerequisites.
    pub fn group(self) {
        self.push(None);
    }

    fn push(self, action: Option<Arc<dyn Transformer>>) {
        self.blueprint.tasks.push(Task {
            name: self.name,
            dependencies: self.dependencies,
            action,
        });
    }
}

/// An ordered list of task groups.
///
/// Groups run strictly one after another, tasks inside a group run
/// concurrently as far as their prerequisites allow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    groups: Vec<Vec<String>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a group.
    pub fn then<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(group.into_iter().map(Into::into).collect());
        self
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }
}

/// A validated task graph, ready to run.
///
/// Created by [`Blueprint::finish`]. Every invocation runs a requested task
/// together with its prerequisites, each of them at most once.
pub struct Pipeline {
    pub(crate) graph: Graph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Pipeline {
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Task names in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|i| self.graph[i].name.as_str())
    }

    fn lookup(&self, name: &str) -> Result<NodeIndex, OrchestrationError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| OrchestrationError::UnknownTask(name.to_string()))
    }

    /// The requested tasks plus everything they transitively depend on.
    fn closure<S: AsRef<str>>(&self, names: &[S]) -> Result<HashSet<NodeIndex>, OrchestrationError> {
        let reversed = Reversed(&self.graph);
        let mut nodes = HashSet::new();

        for name in names {
            let start = self.lookup(name.as_ref())?;
            let mut dfs = Dfs::new(reversed, start);
            while let Some(index) = dfs.next(reversed) {
                nodes.insert(index);
            }
        }

        Ok(nodes)
    }

    /// Runs the named tasks and their prerequisites.
    pub fn run<S: AsRef<str>>(&self, env: &Environment, names: &[S]) -> Result<Diagnostics, BuildError> {
        let nodes = self.closure(names)?;
        let mut diagnostics = Diagnostics::default();
        run_tasks_parallel(&self.graph, env, &nodes, &mut diagnostics)?;
        Ok(diagnostics)
    }

    /// Runs the groups of a schedule in order.
    ///
    /// Every name is checked before the first group starts. A task shared by
    /// several groups, directly or as a prerequisite, runs once. If a group
    /// fails, the groups after it never start.
    pub fn run_schedule(&self, env: &Environment, schedule: &Schedule) -> Result<Diagnostics, BuildError> {
        for name in schedule.groups().iter().flatten() {
            self.lookup(name)?;
        }

        let mut done = HashSet::new();
        let mut diagnostics = Diagnostics::default();

        for group in schedule.groups() {
            let nodes: HashSet<_> = self.closure(group)?.difference(&done).copied().collect();

            let mut ran = Diagnostics::default();
            let result = run_tasks_parallel(&self.graph, env, &nodes, &mut ran);
            diagnostics.merge(ran);
            result?;

            done.extend(nodes);
        }

        Ok(diagnostics)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\""); // Simple escape
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(f, "    {:?} --> {:?}", edge.source().index(), edge.target().index())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::TaskContext;
    use crate::error::TransformError;
    use crate::transform::TaskReport;

    /// Records the order in which tasks ran.
    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Transformer for Log {
        fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
            self.0.lock().unwrap().push(ctx.name.to_string());
            Ok(TaskReport::new(ctx.name))
        }
    }

    struct Broken;

    impl Transformer for Broken {
        fn run(&self, _: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
            Err(TransformError::io(
                "app/missing",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ))
        }
    }

    fn recipe(log: &Log) -> Pipeline {
        let mut blueprint = Blueprint::new();
        blueprint.task("clean").run(log.clone());
        blueprint.task("html").run(log.clone());
        blueprint.task("copy-scripts").run(log.clone());
        blueprint
            .task("scripts-prod")
            .depends_on(["copy-scripts"])
            .run(log.clone());
        blueprint.task("copy").run(log.clone());
        blueprint.finish().unwrap()
    }

    fn position(entries: &[String], name: &str) -> usize {
        entries.iter().position(|e| e == name).unwrap()
    }

    #[test]
    fn test_unknown_dependency() {
        let mut blueprint = Blueprint::new();
        blueprint.task("scripts-prod").depends_on(["copy-scripts"]).group();
        assert_eq!(
            blueprint.finish().err(),
            Some(OrchestrationError::UnknownDependency {
                task: "scripts-prod".into(),
                dependency: "copy-scripts".into(),
            })
        );
    }

    #[test]
    fn test_duplicate_task() {
        let mut blueprint = Blueprint::new();
        blueprint.task("styles").group();
        blueprint.task("styles").group();
        assert_eq!(
            blueprint.finish().err(),
            Some(OrchestrationError::DuplicateTask("styles".into()))
        );
    }

    #[test]
    fn test_cycle() {
        let mut blueprint = Blueprint::new();
        blueprint.task("a").depends_on(["b"]).group();
        blueprint.task("b").depends_on(["a"]).group();
        assert!(matches!(
            blueprint.finish().err(),
            Some(OrchestrationError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_task_aborts_before_running() {
        let log = Log::default();
        let pipeline = recipe(&log);
        let schedule = Schedule::new().then(["clean"]).then(["nope"]);

        let err = pipeline
            .run_schedule(&Environment::new("."), &schedule)
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Orchestration(OrchestrationError::UnknownTask(ref name)) if name == "nope"
        ));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_prerequisites_run_first() {
        let log = Log::default();
        let pipeline = recipe(&log);

        let diagnostics = pipeline
            .run(&Environment::new("."), &["scripts-prod"])
            .unwrap();

        assert_eq!(log.entries(), ["copy-scripts", "scripts-prod"]);
        assert_eq!(diagnostics.executions.len(), 2);
    }

    #[test]
    fn test_groups_run_in_order() {
        let log = Log::default();
        let pipeline = recipe(&log);
        let schedule = Schedule::new()
            .then(["clean"])
            .then(["html", "scripts-prod"])
            .then(["copy"]);

        pipeline
            .run_schedule(&Environment::new("."), &schedule)
            .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0], "clean");
        assert_eq!(entries[4], "copy");
        assert!(position(&entries, "copy-scripts") < position(&entries, "scripts-prod"));
    }

    #[test]
    fn test_shared_prerequisite_runs_once() {
        let log = Log::default();
        let pipeline = recipe(&log);
        let schedule = Schedule::new()
            .then(["copy-scripts"])
            .then(["scripts-prod"]);

        pipeline
            .run_schedule(&Environment::new("."), &schedule)
            .unwrap();

        assert_eq!(log.entries(), ["copy-scripts", "scripts-prod"]);
    }

    #[test]
    fn test_failed_group_stops_the_schedule() {
        let log = Log::default();
        let mut blueprint = Blueprint::new();
        blueprint.task("clean").run(Broken);
        blueprint.task("html").run(log.clone());
        let pipeline = blueprint.finish().unwrap();

        let schedule = Schedule::new().then(["clean"]).then(["html"]);
        let err = pipeline
            .run_schedule(&Environment::new("."), &schedule)
            .unwrap_err();

        assert!(matches!(err, BuildError::Task(ref name, _) if name == "clean"));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_display_renders_mermaid() {
        let log = Log::default();
        let chart = recipe(&log).to_string();
        assert!(chart.starts_with("graph LR\n"));
        assert!(chart.contains("3[\"scripts-prod\"]"));
        assert!(chart.contains("2 --> 3"));
    }
}
