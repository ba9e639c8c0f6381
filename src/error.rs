use thiserror::Error;

use crate::flow::TaskStatus;
use crate::gateway::GatewayError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AetherError {
    #[error("No flows found. Run `aether plan <goal>` first.")]
    NoFlows,

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {id} cannot {action} while {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: TaskStatus,
    },

    #[error("Cooling down, {remaining_secs}s remaining")]
    CoolingDown { remaining_secs: u64 },

    #[error("Goal must not be empty")]
    EmptyGoal,

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
