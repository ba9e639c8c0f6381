//! Validation of raw model output into gateway contract types.

use std::collections::HashSet;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AuditVerdict, Decision, GatewayError, IntegrityReport, Judgment, MissionPlan};
use crate::flow::TaskDraft;

const DEFAULT_ROLE: &str = "generalist";

/// Strips a surrounding markdown code fence, if any.
pub(super) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json", "JSON", ...) on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn decode<T: DeserializeOwned>(operation: &'static str, text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| GatewayError::malformed(operation, e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "role")]
    agent_role: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    requires_approval: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default)]
    project_name: String,
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIntegrity {
    is_valid: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    pitfalls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    decision: String,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default)]
    subtasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawAudit {
    approved: bool,
    #[serde(default)]
    feedback: String,
}

fn into_drafts(
    operation: &'static str,
    raw: Vec<RawTask>,
    keep_dependencies: bool,
) -> Result<Vec<TaskDraft>, GatewayError> {
    let mut seen = HashSet::new();
    let mut drafts = Vec::with_capacity(raw.len());
    for (i, t) in raw.into_iter().enumerate() {
        let id = t.id.trim().to_string();
        if id.is_empty() {
            return Err(GatewayError::malformed(operation, format!("task #{i} has no id")));
        }
        if id.contains('.') {
            return Err(GatewayError::malformed(
                operation,
                format!("task id {id:?} must not contain '.'"),
            ));
        }
        if !seen.insert(id.clone()) {
            return Err(GatewayError::malformed(operation, format!("duplicate task id {id:?}")));
        }
        let title = t.title.trim().to_string();
        if title.is_empty() {
            return Err(GatewayError::malformed(operation, format!("task {id:?} has no title")));
        }
        let role = match t.agent_role.trim() {
            "" => DEFAULT_ROLE.to_string(),
            r => r.to_string(),
        };
        drafts.push(TaskDraft {
            id,
            title,
            description: t.description.trim().to_string(),
            role,
            dependencies: if keep_dependencies { t.dependencies } else { Vec::new() },
            requires_approval: keep_dependencies && t.requires_approval,
        });
    }
    Ok(drafts)
}

pub(super) fn parse_plan(text: &str) -> Result<MissionPlan, GatewayError> {
    let raw: RawPlan = decode("plan", text)?;
    if raw.tasks.is_empty() {
        return Err(GatewayError::malformed("plan", "no tasks"));
    }
    let project_name = match raw.project_name.trim() {
        "" => "Untitled Mission".to_string(),
        name => name.to_string(),
    };
    Ok(MissionPlan {
        project_name,
        tasks: into_drafts("plan", raw.tasks, true)?,
    })
}

pub(super) fn parse_integrity(text: &str) -> Result<IntegrityReport, GatewayError> {
    let raw: RawIntegrity = decode("integrity", text)?;
    let error = match raw.error {
        Some(e) if !e.trim().is_empty() => Some(e.trim().to_string()),
        _ if !raw.is_valid => Some("integrity check failed".to_string()),
        _ => None,
    };
    Ok(IntegrityReport {
        is_valid: raw.is_valid,
        error,
        recommendations: raw.recommendations,
        pitfalls: raw.pitfalls,
    })
}

pub(super) fn parse_judgment(text: &str) -> Result<Judgment, GatewayError> {
    let raw: RawJudgment = decode("judge", text)?;
    let decision = match raw.decision.trim().to_lowercase().as_str() {
        "" | "execute" => Decision::Execute,
        "decompose" => Decision::Decompose,
        "prune" => Decision::Prune,
        other => {
            return Err(GatewayError::malformed(
                "judge",
                format!("unknown decision {other:?}"),
            ));
        }
    };
    Ok(Judgment {
        decision,
        reasoning: raw.reasoning,
    })
}

/// Children beyond `width` are dropped; fewer than two is not a decomposition.
pub(super) fn parse_subtasks(text: &str, width: u32) -> Result<Vec<TaskDraft>, GatewayError> {
    let raw: RawDecomposition = decode("decompose", text)?;
    let mut drafts = into_drafts("decompose", raw.subtasks, false)?;
    if drafts.len() < 2 {
        return Err(GatewayError::malformed(
            "decompose",
            format!("expected at least 2 subtasks, got {}", drafts.len()),
        ));
    }
    drafts.truncate(width.max(2) as usize);
    Ok(drafts)
}

pub(super) fn parse_audit(text: &str) -> Result<AuditVerdict, GatewayError> {
    let raw: RawAudit = decode("audit", text)?;
    Ok(AuditVerdict {
        approved: raw.approved,
        feedback: raw.feedback.trim().to_string(),
    })
}
