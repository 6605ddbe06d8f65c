use std::collections::BTreeMap;
use std::fmt::Write;

use crate::Pipeline;
use crate::engine::{TaskExecution, TaskOutcome};

/// Build diagnostics and performance metrics.
///
/// Returned by [`Pipeline::run`] and [`Pipeline::run_schedule`], one entry
/// per task that ran, keyed by task name.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub executions: BTreeMap<String, TaskExecution>,
}

impl Diagnostics {
    pub(crate) fn insert(&mut self, name: String, execution: TaskExecution) {
        self.executions.insert(name, execution);
    }

    pub(crate) fn merge(&mut self, other: Diagnostics) {
        self.executions.extend(other.executions);
    }

    /// Names of tasks whose errors the best-effort policy swallowed.
    pub fn absorbed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.executions
            .iter()
            .filter_map(|(name, exec)| match &exec.outcome {
                TaskOutcome::Absorbed(message) => Some((name.as_str(), message.as_str())),
                TaskOutcome::Completed(_) => None,
            })
    }

    /// Total bytes written by all tasks.
    pub fn bytes(&self) -> u64 {
        self.executions
            .values()
            .map(|exec| match &exec.outcome {
                TaskOutcome::Completed(report) => report.bytes,
                TaskOutcome::Absorbed(_) => 0,
            })
            .sum()
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Orange border**: error absorbed
    /// * **Gray**: did not run
    pub fn render_mermaid(&self, pipeline: &Pipeline) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.executions;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            // No tasks ran
            min_time = 0.0;
            max_time = 0.0;
        }

        // Avoid divide by zero if all tasks took same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        let graph = &pipeline.graph;

        for index in graph.node_indices() {
            let task = &graph[index];
            let name = task.name.replace('"', "\\\"");

            let (label_extra, style) = match times.get(&task.name) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);

                    // 0.0 (Green) -> 0.5 (Yellow) -> 1.0 (Red)
                    let (r, g, b) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255, 0)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
                    };

                    let mut style = format!("fill:#{r:02X}{g:02X}{b:02X}");
                    if let TaskOutcome::Absorbed(_) = exec.outcome {
                        style.push_str(",stroke:#FF8C00,stroke-width:3px");
                    }

                    (format!("{:.2?}", exec.duration), style)
                }
                None => ("Skipped".to_string(), "fill:#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label_extra);
            let _ = writeln!(f, "    style {} {}", index.index(), style);
        }

        for edge in graph.raw_edges() {
            let _ = writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            );
        }

        f
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::transform::TaskReport;
    use crate::{Blueprint, transform::CleanOutput};

    fn exec(ms: u64, outcome: TaskOutcome) -> TaskExecution {
        TaskExecution {
            start: Instant::now(),
            duration: Duration::from_millis(ms),
            outcome,
        }
    }

    #[test]
    fn test_mermaid_marks_runs_and_skips() {
        let mut blueprint = Blueprint::new();
        blueprint
            .task("clean")
            .run(CleanOutput::new([], "dist", []));
        blueprint.task("styles").depends_on(["clean"]).group();
        blueprint.task("html").group();
        let pipeline = blueprint.finish().unwrap();

        let mut report = TaskReport::new("clean");
        report.add(10);

        let mut diagnostics = Diagnostics::default();
        diagnostics.insert("clean".into(), exec(1, TaskOutcome::Completed(report)));
        diagnostics.insert("styles".into(), exec(9, TaskOutcome::Absorbed("bad".into())));

        let chart = diagnostics.render_mermaid(&pipeline);
        assert!(chart.starts_with("graph LR\n"));
        assert!(chart.contains("0 --> 1"));
        assert!(chart.contains("fill:#00FF00"));
        assert!(chart.contains("stroke:#FF8C00"));
        assert!(chart.contains("html\\nSkipped"));

        assert_eq!(diagnostics.bytes(), 10);
        assert_eq!(diagnostics.absorbed().collect::<Vec<_>>(), [("styles", "bad")]);
    }
}
