mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use console::style;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::Task;
use crate::error::BuildError;
use crate::transform::TaskReport;
use crate::{Environment, ErrorPolicy, TaskContext};

pub use diagnostics::Diagnostics;
#[cfg(feature = "live")]
pub use watch::{Dispatcher, Reloader, ServeOptions, ServeState, Signal, WatchRule, serve};

/// How a task that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The transformer finished and reported what it wrote.
    Completed(TaskReport),
    /// The transformer reported malformed input which the best-effort policy
    /// swallowed. The message is what got logged.
    Absorbed(String),
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
    pub outcome: TaskOutcome,
}

type TaskResult = (NodeIndex, Result<TaskOutcome, BuildError>, Instant, Duration);

/// Executes a subset of the task graph on the rayon pool.
///
/// A task is spawned as soon as every prerequisite that is part of
/// `nodes_to_run` has reported back over the result channel. Prerequisites
/// outside the set are considered done already.
///
/// When a task fails, tasks that are already running are allowed to finish,
/// everything downstream of the failed task is skipped, and the first
/// failure is returned once the pool drains.
///
/// The coordinating loop runs on the calling thread. When that thread is a
/// pool worker it keeps executing spawned tasks while it waits, so a pool of
/// one thread makes progress.
pub(crate) fn run_tasks_parallel(
    graph: &Graph<Task, ()>,
    env: &Environment,
    nodes_to_run: &HashSet<NodeIndex>,
    diagnostics: &mut Diagnostics,
) -> Result<(), BuildError> {
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len();
    if total_tasks == 0 {
        return Ok(());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks as u64);
    root_span.pb_set_style(&crate::utils::get_style_run());
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task();

    let mut finished = 0;
    let mut blocked = HashSet::new();
    let mut failure = None;

    rayon::in_place_scope(|s| {
        let (result_sender, result_receiver) = channel::<TaskResult>();

        let spawn_task = |index: NodeIndex| {
            let task = &graph[index];
            let sender = result_sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = %task.name);
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Running {}", task.name));
                let _enter = span.enter();

                let context = TaskContext {
                    name: &task.name,
                    env,
                    span: span.clone(),
                };

                let start = Instant::now();

                // Transformers share nothing but the output directory, a
                // panic cannot leave state behind for other tasks.
                let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    execute(task, &context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            String::from("unknown payload")
                        };

                        Err(BuildError::Panic(task.name.clone(), msg))
                    }
                };

                // The receiver only goes away once every task reported.
                let _ = sender.send((index, result, start, start.elapsed()));
            });
        };

        for &index in nodes_to_run {
            if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                spawn_task(index);
            }
        }

        while finished < total_tasks {
            let Some((index, result, start, duration)) = next_result(&result_receiver) else {
                break;
            };

            finished += 1;
            root_span.pb_inc(1);

            match result {
                Ok(outcome) => {
                    diagnostics.insert(
                        graph[index].name.clone(),
                        TaskExecution {
                            start,
                            duration,
                            outcome,
                        },
                    );

                    for &next in dependents.get(&index).into_iter().flatten() {
                        if let Some(count) = dependency_counts.get_mut(&next) {
                            *count -= 1;
                            if *count == 0 && !blocked.contains(&next) {
                                spawn_task(next);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("{e}");

                    let mut stack = vec![index];
                    while let Some(node) = stack.pop() {
                        for &next in dependents.get(&node).into_iter().flatten() {
                            if dependency_counts.contains_key(&next) && blocked.insert(next) {
                                tracing::warn!(
                                    "skipping {}, a prerequisite failed",
                                    style(&graph[next].name).yellow()
                                );
                                finished += 1;
                                root_span.pb_inc(1);
                                stack.push(next);
                            }
                        }
                    }

                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Waits for the next task to report, helping the pool while nothing has.
fn next_result(receiver: &Receiver<TaskResult>) -> Option<TaskResult> {
    loop {
        match receiver.try_recv() {
            Ok(result) => return Some(result),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            Some(rayon::Yield::Executed) => {}
            // Our tasks were stolen by other workers.
            Some(rayon::Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(result) => return Some(result),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            },
            // Not a worker, the pool runs the tasks.
            None => return receiver.recv().ok(),
        }
    }
}

/// Runs a single task's transformer and applies the error policy.
fn execute(task: &Task, ctx: &TaskContext<'_>) -> Result<TaskOutcome, BuildError> {
    let Some(action) = &task.action else {
        return Ok(TaskOutcome::Completed(TaskReport::new(&task.name)));
    };

    match action.run(ctx) {
        Ok(report) => {
            tracing::info!(task = %task.name, "{}", style(&report).green());
            Ok(TaskOutcome::Completed(report))
        }
        Err(e) if e.is_recoverable() && ctx.env.policy == ErrorPolicy::BestEffort => {
            tracing::error!(task = %task.name, "{e}");
            Ok(TaskOutcome::Absorbed(e.to_string()))
        }
        Err(e) => Err(BuildError::Task(task.name.clone(), e)),
    }
}
