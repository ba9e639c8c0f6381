pub mod evaluator;
mod lifecycle;
mod mission;
mod task;

pub use evaluator::DanglingPolicy;
pub use lifecycle::{Lifecycle, Transition};
pub use mission::{DIGEST_CHARS, Edge, EdgeKind, Flow, FlowGraph, FlowReport, FlowStatus, Telemetry};
pub use task::{
    ContentType, FailureKind, Guidance, Stage, Task, TaskDraft, TaskOutput, TaskStatus,
};
