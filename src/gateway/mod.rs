//! The six LLM operations the orchestrator depends on.
//!
//! [`Gateway`] is the seam between the loop and the model provider. Every
//! response crosses it as a validated, typed value; nothing shaped like raw
//! JSON reaches task state.

mod llm;
mod offline;
mod parse;

pub use llm::{LlmGateway, QuotaRetry};
pub use offline::{OfflineGateway, RoleRouter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentProfile;
use crate::flow::{Task, TaskDraft};
use crate::gemini::LlmError;

/// Failures a gateway call can report.
///
/// Only [`QuotaExhausted`](GatewayError::QuotaExhausted) is treated specially
/// by the loop; everything else fails the task at hand.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("quota exhausted: {message}")]
    QuotaExhausted {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("gateway call timed out after {0}s")]
    Timeout(u64),

    #[error("malformed {operation} response: {reason}")]
    Malformed {
        operation: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl GatewayError {
    pub fn is_quota(&self) -> bool {
        matches!(self, GatewayError::QuotaExhausted { .. })
    }

    pub(crate) fn malformed(operation: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::Malformed {
            operation,
            reason: reason.into(),
        }
    }
}

/// Result of `plan`: a project name and its level-0 tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionPlan {
    pub project_name: String,
    pub tasks: Vec<TaskDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub error: Option<String>,
    pub recommendations: Vec<String>,
    pub pitfalls: Vec<String>,
}

impl IntegrityReport {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[default]
    Execute,
    Decompose,
    Prune,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub decision: Decision,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditVerdict {
    pub approved: bool,
    pub feedback: String,
}

/// Request/response contracts with the model provider.
///
/// Calls are awaited one at a time by the orchestrator; implementations may
/// retry internally but must surface quota exhaustion as
/// [`GatewayError::QuotaExhausted`].
pub trait Gateway {
    async fn plan(&self, goal: &str, width: u32) -> Result<MissionPlan, GatewayError>;

    async fn validate_integrity(
        &self,
        task: &Task,
        siblings: &[&Task],
    ) -> Result<IntegrityReport, GatewayError>;

    async fn judge(&self, task: &Task, context: &str) -> Result<Judgment, GatewayError>;

    async fn decompose(
        &self,
        task: &Task,
        context: &str,
        width: u32,
    ) -> Result<Vec<TaskDraft>, GatewayError>;

    async fn execute(
        &self,
        task: &Task,
        agent: &AgentProfile,
        context: &str,
    ) -> Result<String, GatewayError>;

    async fn audit(&self, task: &Task, result: &str) -> Result<AuditVerdict, GatewayError>;
}
