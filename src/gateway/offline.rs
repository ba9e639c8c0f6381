//! Heuristic gateway used when no model is configured.
//!
//! Provides [`OfflineGateway`], which plans a goal by splitting its text into
//! discrete tasks (explicit list markers first, then conjunctions, then a
//! plan/do/verify fallback) and simulates every other operation. Roles come
//! from [`RoleRouter`]'s weighted keyword scoring.

use super::{
    AuditVerdict, Decision, Gateway, GatewayError, IntegrityReport, Judgment, MissionPlan,
};
use crate::agent::AgentProfile;
use crate::flow::{Task, TaskDraft};

/// Routes a task description to an agent role using weighted keyword scoring.
pub struct RoleRouter;

const KEYWORD_ROLES: &[(&str, &str, u32)] = &[
    ("research", "researcher", 10),
    ("analy", "researcher", 7),
    ("investigate", "researcher", 7),
    ("test", "qa", 10),
    ("verify", "qa", 8),
    ("review", "qa", 5),
    ("doc", "writer", 10),
    ("readme", "writer", 5),
    ("write", "writer", 4),
    ("design", "designer", 10),
    ("mockup", "designer", 7),
    ("plan", "architect", 10),
    ("architect", "architect", 10),
    ("implement", "engineer", 5),
    ("build", "engineer", 5),
    ("create", "engineer", 5),
    ("fix", "engineer", 7),
    ("add", "engineer", 3),
];

impl RoleRouter {
    /// Highest-scoring role; ties go to the role listed first. Defaults to "engineer".
    pub fn route(description: &str) -> String {
        Self::infer(description).unwrap_or_else(|| "engineer".to_string())
    }

    /// Like [`route`](Self::route) but `None` when no keyword matches.
    pub fn infer(description: &str) -> Option<String> {
        let lower = description.to_lowercase();
        let mut scores: Vec<(&str, u32)> = Vec::new();

        for &(keyword, role, weight) in KEYWORD_ROLES {
            if lower.contains(keyword) {
                match scores.iter_mut().find(|(r, _)| *r == role) {
                    Some((_, score)) => *score += weight,
                    None => scores.push((role, weight)),
                }
            }
        }

        let mut best: Option<(&str, u32)> = None;
        for (role, score) in scores {
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((role, score));
            }
        }
        best.map(|(role, _)| role.to_string())
    }
}

/// Gateway that never leaves the process.
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

impl OfflineGateway {
    pub fn new() -> Self {
        Self
    }

    /// Splits a goal into ordered task titles.
    pub fn split_goal(goal: &str) -> Vec<String> {
        let explicit = split_explicit_list(goal);
        if explicit.len() >= 2 {
            return explicit.iter().map(|s| capitalize_first(s.trim())).collect();
        }

        let clauses = split_on_conjunctions(goal);
        if clauses.len() >= 2 {
            return clauses.iter().map(|s| capitalize_first(s.trim())).collect();
        }

        let desc = capitalize_first(goal.trim());
        vec![
            format!("Plan approach for: {desc}"),
            desc,
            "Verify the outcome".to_string(),
        ]
    }
}

impl Gateway for OfflineGateway {
    async fn plan(&self, goal: &str, _width: u32) -> Result<MissionPlan, GatewayError> {
        if goal.trim().is_empty() {
            return Err(GatewayError::malformed("plan", "empty goal"));
        }
        let titles = Self::split_goal(goal);
        let tasks = titles
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .enumerate()
            .map(|(i, title)| TaskDraft {
                id: format!("t{}", i + 1),
                role: RoleRouter::route(&title),
                description: title.clone(),
                title,
                // Sequential: each step waits for the previous one.
                dependencies: if i == 0 { vec![] } else { vec![format!("t{i}")] },
                requires_approval: false,
            })
            .collect();
        Ok(MissionPlan {
            project_name: project_name(goal),
            tasks,
        })
    }

    async fn validate_integrity(
        &self,
        task: &Task,
        _siblings: &[&Task],
    ) -> Result<IntegrityReport, GatewayError> {
        if task.title.trim().is_empty() {
            return Ok(IntegrityReport {
                is_valid: false,
                error: Some("task has no title".to_string()),
                ..IntegrityReport::default()
            });
        }
        Ok(IntegrityReport::valid())
    }

    async fn judge(&self, _task: &Task, _context: &str) -> Result<Judgment, GatewayError> {
        Ok(Judgment {
            decision: Decision::Execute,
            reasoning: "offline mode executes every task directly".to_string(),
        })
    }

    async fn decompose(
        &self,
        task: &Task,
        _context: &str,
        width: u32,
    ) -> Result<Vec<TaskDraft>, GatewayError> {
        let mut parts = split_on_conjunctions(&task.title);
        if parts.len() < 2 {
            parts = vec![
                format!("Outline {}", task.title),
                format!("Complete {}", task.title),
            ];
        }
        parts.truncate(width.max(2) as usize);
        Ok(parts
            .into_iter()
            .enumerate()
            .map(|(i, title)| {
                let title = capitalize_first(title.trim());
                TaskDraft {
                    id: format!("s{}", i + 1),
                    role: RoleRouter::route(&title),
                    description: title.clone(),
                    title,
                    dependencies: vec![],
                    requires_approval: false,
                }
            })
            .collect())
    }

    async fn execute(
        &self,
        task: &Task,
        agent: &AgentProfile,
        _context: &str,
    ) -> Result<String, GatewayError> {
        Ok(format!(
            "Simulated result for {}\n\n{} ({}) handled: {}",
            task.title, agent.name, task.assigned_role, task.description
        ))
    }

    async fn audit(&self, _task: &Task, _result: &str) -> Result<AuditVerdict, GatewayError> {
        Ok(AuditVerdict {
            approved: true,
            feedback: "Accepted offline.".to_string(),
        })
    }
}

/// First few words of the goal, title-cased.
fn project_name(goal: &str) -> String {
    let first_line = goal.lines().find(|l| !l.trim().is_empty()).unwrap_or(goal);
    let words: Vec<String> = first_line
        .split_whitespace()
        .filter(|w| !w.starts_with('-') && !w.starts_with('*'))
        .take(5)
        .map(capitalize_first)
        .collect();
    if words.is_empty() {
        "Untitled Mission".to_string()
    } else {
        words.join(" ")
    }
}

/// Splits text on explicit list markers: "1.", "2)", "-", "*".
fn split_explicit_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if let Some(rest) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            {
                Some(rest.to_string())
            } else if trimmed.len() > 2
                && trimmed.chars().next().is_some_and(|c| c.is_ascii_digit())
            {
                let pos = trimmed.find(['.', ')'])?;
                let after = trimmed[pos + 1..].trim();
                (!after.is_empty()).then(|| after.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Splits a sentence on ", then", "and then", "then" and "and".
fn split_on_conjunctions(text: &str) -> Vec<String> {
    let delimiters = [", then ", " and then ", " then ", " and "];

    let mut parts = vec![text.to_string()];
    for delim in delimiters {
        let mut next = Vec::new();
        for part in &parts {
            let lower = part.to_lowercase();
            if let Some(pos) = lower.find(delim) {
                let left = part[..pos].trim().to_string();
                let right = part[pos + delim.len()..].trim().to_string();
                if !left.is_empty() {
                    next.push(left);
                }
                if !right.is_empty() {
                    next.push(right);
                }
            } else {
                next.push(part.clone());
            }
        }
        parts = next;
    }

    parts
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
