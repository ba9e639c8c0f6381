//! Eligibility and completion rules over a flow's task collection.
//!
//! Everything here is a pure function of the task slice.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStatus};

/// What to do with a dependency id that names no task in the flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingPolicy {
    /// Treat it as never satisfied; the dependent simply never runs.
    #[default]
    Wait,
    /// Fail the dependent task so the flow can still converge.
    FailFast,
}

fn status_index(tasks: &[Task]) -> HashMap<&str, TaskStatus> {
    tasks.iter().map(|t| (t.id.as_str(), t.status)).collect()
}

fn dependencies_met(task: &Task, index: &HashMap<&str, TaskStatus>) -> bool {
    task.dependencies
        .iter()
        .all(|dep| index.get(dep.as_str()).is_some_and(|s| s.satisfies_dependents()))
}

/// Tasks in `todo`/`rejected` whose every dependency is `completed` or `pruned`.
///
/// Returned in collection order.
pub fn eligible_tasks(tasks: &[Task]) -> Vec<&Task> {
    let index = status_index(tasks);
    tasks
        .iter()
        .filter(|t| t.status.is_runnable() && dependencies_met(t, &index))
        .collect()
}

/// Position of the first eligible task, the one the loop works on next.
pub fn first_eligible(tasks: &[Task]) -> Option<usize> {
    let index = status_index(tasks);
    tasks
        .iter()
        .position(|t| t.status.is_runnable() && dependencies_met(t, &index))
}

/// True once nothing is eligible and every task is terminal.
pub fn is_complete(tasks: &[Task]) -> bool {
    eligible_tasks(tasks).is_empty() && tasks.iter().all(|t| t.status.is_terminal())
}

/// Dependencies of `task` that are not yet satisfied (including dangling ids).
pub fn unsatisfied_dependencies(tasks: &[Task], task: &Task) -> Vec<String> {
    let index = status_index(tasks);
    task.dependencies
        .iter()
        .filter(|dep| !index.get(dep.as_str()).is_some_and(|s| s.satisfies_dependents()))
        .cloned()
        .collect()
}

/// Runnable tasks that reference ids missing from the flow, with the missing ids.
pub fn dangling_dependencies(tasks: &[Task]) -> Vec<(usize, Vec<String>)> {
    let index = status_index(tasks);
    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status.is_runnable())
        .filter_map(|(i, t)| {
            let missing: Vec<String> = t
                .dependencies
                .iter()
                .filter(|d| !index.contains_key(d.as_str()))
                .cloned()
                .collect();
            (!missing.is_empty()).then_some((i, missing))
        })
        .collect()
}
