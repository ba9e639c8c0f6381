use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Decomposing,
    InProgress,
    Auditing,
    Completed,
    Rejected,
    Failed,
    Pruned,
    WaitingApproval,
}

impl TaskStatus {
    /// `completed`, `failed` and `pruned` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Pruned
        )
    }

    /// Whether a dependent task may treat this one as done.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Pruned)
    }

    /// Statuses the evaluator will pick up.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::Rejected)
    }

    /// Statuses only ever held while a step is working on the task.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Decomposing | TaskStatus::InProgress | TaskStatus::Auditing
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Decomposing => "decomposing",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Auditing => "auditing",
            TaskStatus::Completed => "completed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Failed => "failed",
            TaskStatus::Pruned => "pruned",
            TaskStatus::WaitingApproval => "waiting_approval",
        };
        f.write_str(s)
    }
}

/// How much validation a task's content has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Bronze,
    Silver,
    Gold,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Bronze => write!(f, "BRONZE"),
            Stage::Silver => write!(f, "SILVER"),
            Stage::Gold => write!(f, "GOLD"),
        }
    }
}

/// Why a task ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The integrity check judged the task definition unsound.
    Integrity,
    /// The auditor rejected the result more times than allowed.
    AuditExhausted,
    /// A gateway call failed for a reason other than quota.
    Gateway,
    /// A dependency id does not exist in the flow (fail-fast policy).
    DanglingDependency,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Integrity => write!(f, "integrity"),
            FailureKind::AuditExhausted => write!(f, "audit exhausted"),
            FailureKind::Gateway => write!(f, "gateway"),
            FailureKind::DanglingDependency => write!(f, "dangling dependency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Markdown,
    Code,
    Json,
}

impl ContentType {
    /// Classifies a result by its shape: fenced code, a JSON document, or prose.
    pub fn infer(content: &str) -> Self {
        if content.contains("```") {
            return ContentType::Code;
        }
        let trimmed = content.trim();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
        {
            return ContentType::Json;
        }
        ContentType::Markdown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub content: String,
    pub produced_at: DateTime<Utc>,
    pub content_type: ContentType,
}

impl TaskOutput {
    pub fn new(content: String) -> Self {
        let content_type = ContentType::infer(&content);
        Self {
            content,
            produced_at: Utc::now(),
            content_type,
        }
    }
}

/// Advice attached by the integrity stage, fed back into execution prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub pitfalls: Vec<String>,
}

impl Guidance {
    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty() && self.pitfalls.is_empty()
    }
}

/// A task as proposed by the planner or the decomposer, before it joins a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub id: String,
    pub title: String,
    pub description: String,
    pub role: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

/// A unit of work inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub stage: Stage,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub assigned_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Guidance::is_empty")]
    pub guidance: Guidance,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approved: bool,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A level-0 task seeded from a plan.
    pub fn root(draft: TaskDraft) -> Self {
        let dependencies = clean_dependencies(&draft.id, draft.dependencies);
        Self {
            id: draft.id,
            title: draft.title,
            description: draft.description,
            status: TaskStatus::Todo,
            stage: Stage::Bronze,
            depth: 0,
            parent_id: None,
            dependencies,
            assigned_role: draft.role,
            output: None,
            retry_count: 0,
            last_error: None,
            audit_feedback: None,
            failure: None,
            guidance: Guidance::default(),
            requires_approval: draft.requires_approval,
            approved: false,
            updated_at: Utc::now(),
        }
    }

    /// A task produced by decomposing `parent`. `id` must already be unique in the flow.
    pub fn child(parent: &Task, id: String, draft: TaskDraft, inherited: Vec<String>) -> Self {
        let dependencies = clean_dependencies(&id, inherited);
        Self {
            id,
            title: draft.title,
            description: draft.description,
            status: TaskStatus::Todo,
            stage: Stage::Bronze,
            depth: parent.depth + 1,
            parent_id: Some(parent.id.clone()),
            dependencies,
            assigned_role: draft.role,
            output: None,
            retry_count: 0,
            last_error: None,
            audit_feedback: None,
            failure: None,
            guidance: Guidance::default(),
            requires_approval: false,
            approved: false,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Tasks that must be approved by the user before they run.
    pub fn needs_approval(&self) -> bool {
        self.requires_approval && !self.approved
    }
}

// Drops self-references and duplicates, keeping first-seen order.
fn clean_dependencies(own_id: &str, deps: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(deps.len());
    for dep in deps {
        let dep = dep.trim().to_string();
        if dep.is_empty() || dep == own_id || out.contains(&dep) {
            continue;
        }
        out.push(dep);
    }
    out
}
