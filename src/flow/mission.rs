use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskDraft, TaskStatus};
use crate::error::AetherError;

/// Maximum characters of a result kept in the shared context memory.
pub const DIGEST_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Idle => write!(f, "idle"),
            FlowStatus::Running => write!(f, "running"),
            FlowStatus::Paused => write!(f, "paused"),
            FlowStatus::Completed => write!(f, "completed"),
            FlowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Advisory counters kept by the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub max_depth: u32,
    pub pruned_count: u32,
    pub branching_factor: u32,
    #[serde(default)]
    pub decomposed_count: u32,
    #[serde(default)]
    pub executed_count: u32,
}

impl Telemetry {
    /// Raises `max_depth` if `depth` is deeper; never lowers it.
    pub fn observe_depth(&mut self, depth: u32) {
        self.max_depth = self.max_depth.max(depth);
    }
}

/// A mission: the aggregate root owning every task of one planned goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub owner_id: String,
    pub status: FlowStatus,
    /// Creation order, not dependency order.
    pub tasks: Vec<Task>,
    /// Task id → short digest of its output.
    #[serde(default)]
    pub context_memory: BTreeMap<String, String>,
    #[serde(default)]
    pub telemetry: Telemetry,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Seeds an idle flow with level-0 tasks from a plan.
    pub fn from_plan(
        name: String,
        goal: String,
        owner_id: String,
        drafts: Vec<TaskDraft>,
        branching_factor: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("flow-{}", Uuid::new_v4().simple()),
            name,
            goal,
            owner_id,
            status: FlowStatus::Idle,
            tasks: drafts.into_iter().map(Task::root).collect(),
            context_memory: BTreeMap::new(),
            telemetry: Telemetry {
                branching_factor,
                ..Telemetry::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Ancestors of `id` followed by the task itself, root first.
    ///
    /// Walks `parent_id`; a malformed parent cycle stops at the first repeat.
    pub fn lineage(&self, id: &str) -> Vec<&Task> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.task(id);
        while let Some(task) = cursor {
            if !seen.insert(task.id.as_str()) {
                break;
            }
            chain.push(task);
            cursor = task.parent_id.as_deref().and_then(|p| self.task(p));
        }
        chain.reverse();
        chain
    }

    /// Tasks sharing `id`'s parent (roots are siblings of each other), excluding `id`.
    pub fn siblings(&self, id: &str) -> Vec<&Task> {
        let Some(task) = self.task(id) else {
            return Vec::new();
        };
        self.tasks
            .iter()
            .filter(|t| t.id != task.id && t.parent_id == task.parent_id)
            .collect()
    }

    /// Builds `parent.child`, suffixing `-2`, `-3`… when the id is taken.
    pub fn unique_child_id(&self, parent_id: &str, child_id: &str) -> String {
        let base = format!("{parent_id}.{child_id}");
        if self.task(&base).is_none() {
            return base;
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| self.task(candidate).is_none())
            .unwrap_or(base)
    }

    /// Stores a truncated copy of `content` under `task_id`.
    pub fn record_digest(&mut self, task_id: &str, content: &str) {
        let digest: String = content.chars().take(DIGEST_CHARS).collect();
        self.context_memory.insert(task_id.to_string(), digest);
    }

    /// Shared context handed to judge/decompose/execute prompts.
    pub fn context_digest(&self) -> String {
        if self.context_memory.is_empty() {
            return "No prior task output.".to_string();
        }
        self.context_memory
            .iter()
            .map(|(id, digest)| format!("- [{id}] {digest}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Releases a task parked in `waiting_approval` back to `todo`.
    pub fn approve_task(&mut self, id: &str) -> Result<(), AetherError> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| AetherError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::WaitingApproval && !task.needs_approval() {
            return Err(AetherError::InvalidTransition {
                id: id.to_string(),
                action: "be approved",
                status: task.status,
            });
        }
        task.approved = true;
        if task.status == TaskStatus::WaitingApproval {
            task.status = TaskStatus::Todo;
        }
        task.touch();
        self.touch();
        Ok(())
    }

    pub fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Dependency edges (`dependency → task`) and decomposition edges (`parent → child`).
    pub fn graph(&self) -> FlowGraph {
        let nodes = self.tasks.iter().map(|t| t.id.clone()).collect();
        let mut edges = Vec::new();
        for task in &self.tasks {
            for dep in &task.dependencies {
                edges.push(Edge {
                    source: dep.clone(),
                    target: task.id.clone(),
                    kind: EdgeKind::Dependency,
                });
            }
            if let Some(parent) = &task.parent_id {
                edges.push(Edge {
                    source: parent.clone(),
                    target: task.id.clone(),
                    kind: EdgeKind::Decomposition,
                });
            }
        }
        FlowGraph { nodes, edges }
    }

    pub fn report(&self) -> FlowReport<'_> {
        FlowReport {
            flow: self,
            graph: self.graph(),
            status_counts: self.status_counts(),
            exported_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Dependency,
    Decomposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
}

/// Exportable snapshot of a flow.
#[derive(Debug, Serialize)]
pub struct FlowReport<'a> {
    pub flow: &'a Flow,
    pub graph: FlowGraph,
    pub status_counts: BTreeMap<TaskStatus, usize>,
    pub exported_at: DateTime<Utc>,
}
