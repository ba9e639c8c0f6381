use super::task::{FailureKind, Stage, Task, TaskOutput, TaskStatus};
use crate::gateway::{AuditVerdict, IntegrityReport};

/// What a lifecycle stage did to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Parked in `waiting_approval` until the user releases it.
    Parked,
    /// Passed the integrity check: `BRONZE → SILVER`, still `todo`.
    Promoted,
    Pruned,
    /// Replaced by `children` subtasks and marked `completed`.
    Expanded { children: usize },
    /// Result approved: `completed`, `GOLD`.
    Completed,
    /// Result rejected; the task will be executed again.
    Rejected { attempt: u32 },
    /// Put back to `todo` to be retried after a cooldown.
    Requeued,
    Failed(FailureKind),
}

/// Applies gateway outcomes to a single task.
///
/// Each stage follows: integrity (BRONZE only) → judgment → execute → audit.
/// Nothing here talks to the gateway; the orchestrator calls these with
/// whatever the gateway returned.
pub struct Lifecycle;

impl Lifecycle {
    pub fn park_for_approval(task: &mut Task) -> Transition {
        task.status = TaskStatus::WaitingApproval;
        task.touch();
        Transition::Parked
    }

    /// An invalid report fails the task for good; a valid one promotes it.
    pub fn apply_integrity(task: &mut Task, report: IntegrityReport) -> Transition {
        if !report.is_valid {
            let reason = report
                .error
                .unwrap_or_else(|| "integrity check failed".to_string());
            return Self::fail(task, FailureKind::Integrity, reason);
        }
        task.stage = Stage::Silver;
        task.guidance.recommendations = report.recommendations;
        task.guidance.pitfalls = report.pitfalls;
        task.status = TaskStatus::Todo;
        task.touch();
        Transition::Promoted
    }

    pub fn prune(task: &mut Task) -> Transition {
        task.status = TaskStatus::Pruned;
        task.touch();
        Transition::Pruned
    }

    pub fn begin_decomposition(task: &mut Task) {
        task.status = TaskStatus::Decomposing;
        task.touch();
    }

    /// The parent's job was structural; it completes with a note listing its children.
    pub fn finish_decomposition(task: &mut Task, child_ids: &[String]) -> Transition {
        task.status = TaskStatus::Completed;
        task.output = Some(TaskOutput::new(format!(
            "Expanded into {} subtasks: {}",
            child_ids.len(),
            child_ids.join(", ")
        )));
        task.touch();
        Transition::Expanded {
            children: child_ids.len(),
        }
    }

    pub fn begin_execution(task: &mut Task) {
        task.status = TaskStatus::InProgress;
        task.touch();
    }

    pub fn begin_audit(task: &mut Task) {
        task.status = TaskStatus::Auditing;
        task.touch();
    }

    /// Approval completes the task; a rejection counts against `max_retries`.
    pub fn apply_audit(
        task: &mut Task,
        result: String,
        verdict: AuditVerdict,
        max_retries: u32,
    ) -> Transition {
        if verdict.approved {
            task.status = TaskStatus::Completed;
            task.stage = Stage::Gold;
            task.output = Some(TaskOutput::new(result));
            task.audit_feedback = None;
            task.last_error = None;
            task.touch();
            return Transition::Completed;
        }

        task.retry_count += 1;
        let feedback = if verdict.feedback.is_empty() {
            "rejected by audit".to_string()
        } else {
            verdict.feedback
        };
        if task.retry_count > max_retries {
            task.audit_feedback = Some(feedback.clone());
            return Self::fail(task, FailureKind::AuditExhausted, feedback);
        }
        task.status = TaskStatus::Rejected;
        task.audit_feedback = Some(feedback);
        task.touch();
        Transition::Rejected {
            attempt: task.retry_count,
        }
    }

    /// Undo an interrupted step. Stage and retry count are kept.
    pub fn requeue(task: &mut Task) -> Transition {
        task.status = TaskStatus::Todo;
        task.touch();
        Transition::Requeued
    }

    pub fn fail(task: &mut Task, kind: FailureKind, reason: impl Into<String>) -> Transition {
        task.status = TaskStatus::Failed;
        task.failure = Some(kind);
        task.last_error = Some(reason.into());
        task.touch();
        Transition::Failed(kind)
    }
}
