use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::agent::{AgentProfile, select_agent};
use crate::cooldown::Cooldown;
use crate::error::AetherError;
use crate::flow::{
    DanglingPolicy, FailureKind, Flow, FlowStatus, Lifecycle, Stage, Task, TaskStatus, Transition,
    evaluator,
};
use crate::gateway::{Decision, Gateway, GatewayError};
use crate::storage::Storage;

/// Delays between steps, by what the previous step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Nothing eligible yet, but the flow is not finished.
    pub idle_poll: Duration,
    pub integrity: Duration,
    pub decompose: Duration,
    /// Execute/audit, prune, approval parking and failures.
    pub standard: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(5000),
            integrity: Duration::from_millis(500),
            decompose: Duration::from_millis(3000),
            standard: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub pacing: Pacing,
    pub branching_factor: u32,
    pub max_audit_retries: u32,
    pub max_depth: u32,
    pub cooldown_secs: u64,
    pub dangling_policy: DanglingPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            branching_factor: 3,
            max_audit_retries: 2,
            max_depth: 3,
            cooldown_secs: 60,
            dangling_policy: DanglingPolicy::Wait,
        }
    }
}

impl LoopSettings {
    fn cooldown_for(&self, retry_after_secs: Option<u64>) -> u64 {
        retry_after_secs.unwrap_or(0).max(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryLevel {
    Info,
    Warning,
    Error,
    Cooldown,
}

/// A user-facing notice about the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub level: AdvisoryLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    TaskChanged {
        task_id: String,
        title: String,
        status: TaskStatus,
        stage: Stage,
    },
    FlowStatus(FlowStatus),
    Advisory(Advisory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Paused,
    CoolingDown { remaining_secs: u64 },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Call `step` again after this delay.
    Continue(Duration),
    Halt(HaltReason),
}

/// Shared run flag. Clearing it pauses the loop before its next step.
#[derive(Debug, Clone)]
pub struct RunHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RunHandle {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl RunHandle {
    pub fn pause(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    fn resume(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once the run flag is cleared.
    pub async fn wait_paused(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }
}

/// Drives one flow's tasks through integrity, judgment, execution and audit,
/// one task at a time.
pub struct FlowOrchestrator<G, S> {
    flow: Flow,
    gateway: G,
    storage: S,
    settings: LoopSettings,
    agents: Vec<AgentProfile>,
    cooldown: Cooldown,
    handle: RunHandle,
    latest_advisory: Option<Advisory>,
    events: Option<UnboundedSender<FlowEvent>>,
}

/// Asks the gateway for a plan and seeds a new idle flow with it.
///
/// Refused while `cooldown` is active; a quota failure starts one.
pub async fn plan_mission<G: Gateway>(
    gateway: &G,
    cooldown: &Cooldown,
    goal: &str,
    settings: &LoopSettings,
    owner_id: &str,
) -> Result<Flow, AetherError> {
    let goal = goal.trim();
    if goal.is_empty() {
        return Err(AetherError::EmptyGoal);
    }
    if cooldown.is_active() {
        return Err(AetherError::CoolingDown {
            remaining_secs: cooldown.remaining(),
        });
    }

    match gateway.plan(goal, settings.branching_factor).await {
        Ok(plan) => {
            info!(project = %plan.project_name, tasks = plan.tasks.len(), "mission planned");
            Ok(Flow::from_plan(
                plan.project_name,
                goal.to_string(),
                owner_id.to_string(),
                plan.tasks,
                settings.branching_factor,
            ))
        }
        Err(GatewayError::QuotaExhausted {
            retry_after_secs,
            message,
        }) => {
            let secs = settings.cooldown_for(retry_after_secs);
            warn!(secs, %message, "quota exhausted while planning");
            cooldown.start(secs);
            Err(AetherError::CoolingDown {
                remaining_secs: secs,
            })
        }
        Err(e) => Err(e.into()),
    }
}

impl<G: Gateway, S: Storage> FlowOrchestrator<G, S> {
    pub fn new(flow: Flow, gateway: G, storage: S, settings: LoopSettings) -> Self {
        Self {
            flow,
            gateway,
            storage,
            settings,
            agents: Vec::new(),
            cooldown: Cooldown::new(),
            handle: RunHandle::default(),
            latest_advisory: None,
            events: None,
        }
    }

    pub fn with_agents(mut self, agents: Vec<AgentProfile>) -> Self {
        self.agents = agents;
        self
    }

    /// Shares a cooldown with other users of the same quota (e.g. planning).
    pub fn with_cooldown(mut self, cooldown: Cooldown) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<FlowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn into_flow(self) -> Flow {
        self.flow
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub fn latest_advisory(&self) -> Option<&Advisory> {
        self.latest_advisory.as_ref()
    }

    /// Sets the run flag and marks the flow `running`.
    ///
    /// Tasks left mid-step by an interrupted process go back to `todo`.
    pub fn start(&mut self) {
        let interrupted: Vec<usize> = self
            .flow
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status.is_active())
            .map(|(i, _)| i)
            .collect();
        for idx in interrupted {
            warn!(task_id = %self.flow.tasks[idx].id, "requeueing interrupted task");
            Lifecycle::requeue(&mut self.flow.tasks[idx]);
            self.commit(idx);
        }

        self.handle.resume();
        self.set_flow_status(FlowStatus::Running);
        info!(flow_id = %self.flow.id, tasks = self.flow.tasks.len(), "flow started");
    }

    /// Releases a task parked in `waiting_approval`.
    pub fn approve(&mut self, task_id: &str) -> Result<(), AetherError> {
        self.flow.approve_task(task_id)?;
        if let Some(idx) = self.flow.tasks.iter().position(|t| t.id == task_id) {
            self.commit(idx);
        }
        self.advise(AdvisoryLevel::Info, format!("Task {task_id} approved"));
        Ok(())
    }

    /// Runs steps until the flow completes or the user pauses.
    ///
    /// A cooldown does not end the run: the loop waits it out and resumes.
    pub async fn run(&mut self) -> HaltReason {
        self.start();
        loop {
            match self.step().await {
                StepOutcome::Continue(delay) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.handle.wait_paused() => {}
                    }
                }
                StepOutcome::Halt(HaltReason::CoolingDown { remaining_secs }) => {
                    info!(remaining_secs, "waiting for cooldown");
                    tokio::select! {
                        _ = self.cooldown.wait_clear() => {}
                        _ = self.handle.wait_paused() => {}
                    }
                    if !self.handle.is_running() {
                        self.set_flow_status(FlowStatus::Paused);
                        return HaltReason::Paused;
                    }
                    if self.cooldown.is_active() {
                        continue;
                    }
                    self.set_flow_status(FlowStatus::Running);
                    self.advise(AdvisoryLevel::Info, "Cooldown finished, resuming");
                }
                StepOutcome::Halt(reason) => return reason,
            }
        }
    }

    /// One unit of work: pick the first eligible task and advance it one stage.
    pub async fn step(&mut self) -> StepOutcome {
        if !self.handle.is_running() {
            self.set_flow_status(FlowStatus::Paused);
            return StepOutcome::Halt(HaltReason::Paused);
        }
        if self.cooldown.is_active() {
            self.set_flow_status(FlowStatus::Paused);
            return StepOutcome::Halt(HaltReason::CoolingDown {
                remaining_secs: self.cooldown.remaining(),
            });
        }

        self.absorb_approvals();
        if self.settings.dangling_policy == DanglingPolicy::FailFast {
            self.fail_dangling();
        }

        if evaluator::is_complete(&self.flow.tasks) {
            self.set_flow_status(FlowStatus::Completed);
            self.handle.pause();
            info!(flow_id = %self.flow.id, "flow completed");
            self.advise(AdvisoryLevel::Info, "Mission complete");
            return StepOutcome::Halt(HaltReason::Completed);
        }

        let Some(idx) = evaluator::first_eligible(&self.flow.tasks) else {
            debug!(flow_id = %self.flow.id, "no eligible task, polling");
            return StepOutcome::Continue(self.settings.pacing.idle_poll);
        };
        self.advance(idx).await
    }

    async fn advance(&mut self, idx: usize) -> StepOutcome {
        let task = self.flow.tasks[idx].clone();
        debug!(task_id = %task.id, status = %task.status, stage = %task.stage, "advancing task");

        if task.status == TaskStatus::Todo && task.needs_approval() {
            Lifecycle::park_for_approval(&mut self.flow.tasks[idx]);
            self.commit(idx);
            self.advise(
                AdvisoryLevel::Info,
                format!(
                    "Task {} is waiting for approval: aether approve {} {}",
                    task.id, self.flow.id, task.id
                ),
            );
            return StepOutcome::Continue(self.settings.pacing.standard);
        }

        if task.status == TaskStatus::Rejected {
            return self.execute_and_audit(idx).await;
        }
        if task.stage == Stage::Bronze {
            return self.check_integrity(idx, &task).await;
        }
        self.judge(idx, &task).await
    }

    async fn check_integrity(&mut self, idx: usize, task: &Task) -> StepOutcome {
        let siblings = self.flow.siblings(&task.id);
        let result = self.gateway.validate_integrity(task, &siblings).await;
        let report = match result {
            Ok(report) => report,
            Err(e) => return self.on_gateway_error(idx, e),
        };

        let transition = Lifecycle::apply_integrity(&mut self.flow.tasks[idx], report);
        self.commit(idx);
        match transition {
            Transition::Failed(_) => {
                let reason = self.flow.tasks[idx].last_error.clone().unwrap_or_default();
                warn!(task_id = %task.id, %reason, "integrity check failed");
                self.advise(
                    AdvisoryLevel::Error,
                    format!("Task {} failed integrity: {reason}", task.id),
                );
                StepOutcome::Continue(self.settings.pacing.standard)
            }
            _ => StepOutcome::Continue(self.settings.pacing.integrity),
        }
    }

    async fn judge(&mut self, idx: usize, task: &Task) -> StepOutcome {
        let context = self.flow.context_digest();
        let result = self.gateway.judge(task, &context).await;
        let judgment = match result {
            Ok(j) => j,
            Err(e) => return self.on_gateway_error(idx, e),
        };
        debug!(task_id = %task.id, decision = ?judgment.decision, reasoning = %judgment.reasoning, "judged");

        match judgment.decision {
            Decision::Prune => {
                Lifecycle::prune(&mut self.flow.tasks[idx]);
                self.flow.telemetry.pruned_count += 1;
                self.commit(idx);
                info!(task_id = %task.id, "task pruned");
                StepOutcome::Continue(self.settings.pacing.standard)
            }
            Decision::Decompose if task.depth < self.settings.max_depth => {
                self.decompose(idx, task, &context).await
            }
            Decision::Decompose => {
                debug!(task_id = %task.id, depth = task.depth, "depth limit reached, executing instead");
                self.execute_and_audit(idx).await
            }
            Decision::Execute => self.execute_and_audit(idx).await,
        }
    }

    async fn decompose(&mut self, idx: usize, task: &Task, context: &str) -> StepOutcome {
        Lifecycle::begin_decomposition(&mut self.flow.tasks[idx]);
        self.commit(idx);

        let width = self.settings.branching_factor;
        let result = self.gateway.decompose(task, context, width).await;
        let drafts = match result {
            Ok(d) => d,
            Err(e) => return self.on_gateway_error(idx, e),
        };

        let inherited = evaluator::unsatisfied_dependencies(&self.flow.tasks, task);
        let parent = self.flow.tasks[idx].clone();
        let mut child_ids = Vec::new();
        for draft in drafts.into_iter().take(width.max(2) as usize) {
            let id = self.flow.unique_child_id(&parent.id, &draft.id);
            let child = Task::child(&parent, id.clone(), draft, inherited.clone());
            self.flow.telemetry.observe_depth(child.depth);
            self.flow.tasks.push(child);
            child_ids.push(id);
        }

        Lifecycle::finish_decomposition(&mut self.flow.tasks[idx], &child_ids);
        self.flow.telemetry.decomposed_count += 1;
        let first_child = self.flow.tasks.len() - child_ids.len();
        for child_idx in first_child..self.flow.tasks.len() {
            self.emit_task(child_idx);
        }
        self.commit(idx);
        info!(task_id = %task.id, children = child_ids.len(), "task decomposed");
        StepOutcome::Continue(self.settings.pacing.decompose)
    }

    async fn execute_and_audit(&mut self, idx: usize) -> StepOutcome {
        let task = self.flow.tasks[idx].clone();
        let agent = select_agent(&self.agents, &task.assigned_role, &self.flow.owner_id);
        let context = self.flow.context_digest();

        Lifecycle::begin_execution(&mut self.flow.tasks[idx]);
        self.commit(idx);
        debug!(task_id = %task.id, agent = %agent.name, "executing");
        let executed = self.gateway.execute(&task, &agent, &context).await;
        let result = match executed {
            Ok(r) => r,
            Err(e) => return self.on_gateway_error(idx, e),
        };
        self.flow.telemetry.executed_count += 1;

        Lifecycle::begin_audit(&mut self.flow.tasks[idx]);
        self.commit(idx);
        let audited = self.gateway.audit(&task, &result).await;
        let verdict = match audited {
            Ok(v) => v,
            Err(e) => return self.on_gateway_error(idx, e),
        };

        let transition = Lifecycle::apply_audit(
            &mut self.flow.tasks[idx],
            result.clone(),
            verdict,
            self.settings.max_audit_retries,
        );
        match transition {
            Transition::Completed => {
                self.flow.record_digest(&task.id, &result);
                info!(task_id = %task.id, "task completed");
                self.advise(AdvisoryLevel::Info, format!("Task {} completed", task.id));
            }
            Transition::Rejected { attempt } => {
                info!(task_id = %task.id, attempt, "result rejected by audit");
                self.advise(
                    AdvisoryLevel::Warning,
                    format!("Task {} rejected by audit (attempt {attempt})", task.id),
                );
            }
            _ => {
                warn!(task_id = %task.id, "audit retries exhausted");
                self.advise(
                    AdvisoryLevel::Error,
                    format!("Task {} failed after repeated audit rejections", task.id),
                );
            }
        }
        self.commit(idx);
        StepOutcome::Continue(self.settings.pacing.standard)
    }

    // Quota errors requeue the task and halt; anything else fails the task.
    fn on_gateway_error(&mut self, idx: usize, err: GatewayError) -> StepOutcome {
        let task_id = self.flow.tasks[idx].id.clone();

        if let GatewayError::QuotaExhausted {
            retry_after_secs,
            message,
        } = &err
        {
            let secs = self.settings.cooldown_for(*retry_after_secs);
            warn!(task_id = %task_id, secs, %message, "quota exhausted, cooling down");
            Lifecycle::requeue(&mut self.flow.tasks[idx]);
            self.commit(idx);
            self.cooldown.start(secs);
            self.set_flow_status(FlowStatus::Paused);
            self.advise(
                AdvisoryLevel::Cooldown,
                format!("Quota exhausted, cooling down for {secs}s"),
            );
            return StepOutcome::Halt(HaltReason::CoolingDown {
                remaining_secs: secs,
            });
        }

        warn!(task_id = %task_id, error = %err, "gateway call failed");
        Lifecycle::fail(&mut self.flow.tasks[idx], FailureKind::Gateway, err.to_string());
        self.commit(idx);
        self.advise(AdvisoryLevel::Error, format!("Task {task_id} failed: {err}"));
        StepOutcome::Continue(self.settings.pacing.standard)
    }

    fn fail_dangling(&mut self) {
        for (idx, missing) in evaluator::dangling_dependencies(&self.flow.tasks) {
            let reason = format!("unknown dependencies: {}", missing.join(", "));
            warn!(task_id = %self.flow.tasks[idx].id, %reason, "failing task with dangling dependencies");
            Lifecycle::fail(
                &mut self.flow.tasks[idx],
                FailureKind::DanglingDependency,
                reason,
            );
            self.commit(idx);
        }
    }

    fn set_flow_status(&mut self, status: FlowStatus) {
        if self.flow.status == status {
            return;
        }
        debug!(flow_id = %self.flow.id, from = %self.flow.status, to = %status, "flow status");
        self.flow.status = status;
        self.flow.touch();
        self.persist();
        self.emit(FlowEvent::FlowStatus(status));
    }

    /// Publishes the task's new state and saves the flow.
    fn commit(&mut self, idx: usize) {
        self.flow.touch();
        self.emit_task(idx);
        self.persist();
    }

    fn persist(&mut self) {
        self.absorb_approvals();
        if let Err(e) = self.storage.save(&self.flow) {
            warn!(flow_id = %self.flow.id, error = %e, "failed to persist flow");
            self.advise(
                AdvisoryLevel::Warning,
                format!("Progress could not be saved: {e}"),
            );
        }
    }

    // Picks up approvals another process saved for this flow, so the next
    // save does not overwrite them.
    fn absorb_approvals(&mut self) {
        let stored: Vec<Flow> = match self.storage.load(&self.flow.owner_id) {
            Ok(flows) => flows,
            Err(e) => {
                debug!(flow_id = %self.flow.id, error = %e, "could not read stored flow");
                return;
            }
        };
        let Some(stored) = stored.into_iter().find(|f| f.id == self.flow.id) else {
            return;
        };
        for task in stored.tasks.iter().filter(|t| t.approved) {
            let Some(idx) = self.flow.tasks.iter().position(|t| t.id == task.id) else {
                continue;
            };
            if self.flow.tasks[idx].approved {
                continue;
            }
            if self.flow.approve_task(&task.id).is_ok() {
                info!(task_id = %task.id, "approval picked up from storage");
                self.emit_task(idx);
            }
        }
    }

    fn advise(&mut self, level: AdvisoryLevel, message: impl Into<String>) {
        let advisory = Advisory {
            level,
            message: message.into(),
        };
        self.emit(FlowEvent::Advisory(advisory.clone()));
        self.latest_advisory = Some(advisory);
    }

    fn emit_task(&self, idx: usize) {
        if let Some(task) = self.flow.tasks.get(idx) {
            self.emit(FlowEvent::TaskChanged {
                task_id: task.id.clone(),
                title: task.title.clone(),
                status: task.status,
                stage: task.stage,
            });
        }
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    use super::*;
    use crate::flow::TaskDraft;
    use crate::gateway::{AuditVerdict, IntegrityReport, Judgment, MissionPlan};
    use crate::storage::{JsonlStorage, MemoryStorage, Record, StorageError};

    /// Gateway whose answers are scripted per task id.
    #[derive(Default)]
    struct ScriptedGateway {
        plan: Vec<TaskDraft>,
        decisions: HashMap<String, Decision>,
        default_decision: Decision,
        invalid: HashSet<String>,
        failing_execute: HashSet<String>,
        subtasks: Vec<TaskDraft>,
        audits: Mutex<HashMap<String, VecDeque<bool>>>,
        quota_on_execute: Mutex<u32>,
        /// 1-based execute calls that hit the quota.
        execute_quota_at: Vec<usize>,
        quota_on_decompose: Mutex<u32>,
        quota_on_plan: bool,
        pause_during_execute: Option<RunHandle>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self, prefix: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .cloned()
                .collect()
        }

        fn audits(self, id: &str, script: &[bool]) -> Self {
            self.audits
                .lock()
                .unwrap()
                .insert(id.to_string(), script.iter().copied().collect());
            self
        }

        fn quota() -> GatewayError {
            GatewayError::QuotaExhausted {
                retry_after_secs: None,
                message: "429 RESOURCE_EXHAUSTED".into(),
            }
        }
    }

    impl Gateway for ScriptedGateway {
        async fn plan(&self, _goal: &str, _width: u32) -> Result<MissionPlan, GatewayError> {
            if self.quota_on_plan {
                return Err(Self::quota());
            }
            Ok(MissionPlan {
                project_name: "Scripted".into(),
                tasks: self.plan.clone(),
            })
        }

        async fn validate_integrity(
            &self,
            task: &Task,
            _siblings: &[&Task],
        ) -> Result<IntegrityReport, GatewayError> {
            self.record(format!("integrity:{}", task.id));
            if self.invalid.contains(&task.id) {
                return Ok(IntegrityReport {
                    is_valid: false,
                    error: Some("contradictory requirements".into()),
                    ..IntegrityReport::default()
                });
            }
            Ok(IntegrityReport::valid())
        }

        async fn judge(&self, task: &Task, _context: &str) -> Result<Judgment, GatewayError> {
            self.record(format!("judge:{}", task.id));
            let decision = self
                .decisions
                .get(&task.id)
                .copied()
                .unwrap_or(self.default_decision);
            Ok(Judgment {
                decision,
                reasoning: String::new(),
            })
        }

        async fn decompose(
            &self,
            task: &Task,
            _context: &str,
            _width: u32,
        ) -> Result<Vec<TaskDraft>, GatewayError> {
            self.record(format!("decompose:{}", task.id));
            {
                let mut quota = self.quota_on_decompose.lock().unwrap();
                if *quota > 0 {
                    *quota -= 1;
                    return Err(Self::quota());
                }
            }
            Ok(self.subtasks.clone())
        }

        async fn execute(
            &self,
            task: &Task,
            _agent: &AgentProfile,
            _context: &str,
        ) -> Result<String, GatewayError> {
            self.record(format!("execute:{}", task.id));
            if let Some(handle) = &self.pause_during_execute {
                handle.pause();
            }
            if self.execute_quota_at.contains(&self.calls("execute").len()) {
                return Err(Self::quota());
            }
            {
                let mut quota = self.quota_on_execute.lock().unwrap();
                if *quota > 0 {
                    *quota -= 1;
                    return Err(Self::quota());
                }
            }
            if self.failing_execute.contains(&task.id) {
                return Err(GatewayError::Timeout(120));
            }
            Ok(format!("result of {}", task.id))
        }

        async fn audit(&self, task: &Task, _result: &str) -> Result<AuditVerdict, GatewayError> {
            self.record(format!("audit:{}", task.id));
            let approved = self
                .audits
                .lock()
                .unwrap()
                .get_mut(&task.id)
                .and_then(|q| q.pop_front())
                .unwrap_or(true);
            Ok(AuditVerdict {
                approved,
                feedback: if approved { String::new() } else { "needs detail".into() },
            })
        }
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn save<R: Record>(&self, _record: &R) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk full".into()))
        }

        fn load<R: Record>(&self, _owner_id: &str) -> Result<Vec<R>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn draft(id: &str, deps: &[&str]) -> TaskDraft {
        TaskDraft {
            id: id.into(),
            title: format!("Task {id}"),
            description: String::new(),
            role: "engineer".into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            requires_approval: false,
        }
    }

    fn flow_of(drafts: Vec<TaskDraft>) -> Flow {
        Flow::from_plan("Test".into(), "goal".into(), "owner".into(), drafts, 3)
    }

    fn orchestrator(
        drafts: Vec<TaskDraft>,
        gateway: ScriptedGateway,
    ) -> FlowOrchestrator<ScriptedGateway, MemoryStorage> {
        FlowOrchestrator::new(
            flow_of(drafts),
            gateway,
            MemoryStorage::new(),
            LoopSettings::default(),
        )
    }

    /// Steps without sleeping, checking that no task is left mid-stage between steps.
    async fn drive<S: Storage>(
        orch: &mut FlowOrchestrator<ScriptedGateway, S>,
        max_steps: usize,
    ) -> HaltReason {
        orch.start();
        for _ in 0..max_steps {
            let outcome = orch.step().await;
            let active = orch
                .flow()
                .tasks
                .iter()
                .filter(|t| t.status.is_active())
                .count();
            assert_eq!(active, 0, "a task was left mid-stage");
            if let StepOutcome::Halt(reason) = outcome {
                return reason;
            }
        }
        panic!("flow did not halt within {max_steps} steps");
    }

    fn status(orch: &FlowOrchestrator<ScriptedGateway, impl Storage>, id: &str) -> TaskStatus {
        orch.flow().task(id).unwrap().status
    }

    #[tokio::test]
    async fn dependent_runs_after_its_dependency() {
        let mut orch = orchestrator(
            vec![draft("b", &["a"]), draft("a", &[])],
            ScriptedGateway::default(),
        );
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);

        assert_eq!(
            orch.gateway.calls("execute"),
            vec!["execute:a", "execute:b"]
        );
        for id in ["a", "b"] {
            let task = orch.flow().task(id).unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.stage, Stage::Gold);
        }
        assert_eq!(orch.flow().status, FlowStatus::Completed);
        assert_eq!(orch.flow().context_memory["a"], "result of a");
        assert_eq!(orch.flow().telemetry.executed_count, 2);
    }

    #[tokio::test]
    async fn integrity_runs_before_judgment() {
        let mut orch = orchestrator(vec![draft("a", &[])], ScriptedGateway::default());
        orch.start();

        assert_eq!(
            orch.step().await,
            StepOutcome::Continue(Pacing::default().integrity)
        );
        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.stage, Stage::Silver);
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(orch.gateway.calls("judge").is_empty());
    }

    #[tokio::test]
    async fn pruned_task_is_counted_and_satisfies_dependents() {
        let gateway = ScriptedGateway {
            decisions: HashMap::from([("b".to_string(), Decision::Prune)]),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(
            vec![draft("a", &[]), draft("b", &[]), draft("c", &["b"])],
            gateway,
        );
        assert_eq!(drive(&mut orch, 30).await, HaltReason::Completed);

        assert_eq!(status(&orch, "b"), TaskStatus::Pruned);
        assert_eq!(orch.flow().telemetry.pruned_count, 1);
        assert_eq!(status(&orch, "c"), TaskStatus::Completed);
        assert!(!orch.gateway.calls("execute").contains(&"execute:b".to_string()));
        assert_eq!(orch.gateway.calls("judge:b").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_on_execute_requeues_and_cools_down() {
        let gateway = ScriptedGateway {
            quota_on_execute: Mutex::new(1),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);

        let halt = drive(&mut orch, 5).await;
        assert_eq!(halt, HaltReason::CoolingDown { remaining_secs: 60 });

        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.stage, Stage::Silver);
        assert!(task.failure.is_none());
        assert_eq!(orch.flow().status, FlowStatus::Paused);
        assert!(orch.cooldown().remaining() > 0);
        assert_eq!(
            orch.latest_advisory().map(|a| a.level),
            Some(AdvisoryLevel::Cooldown)
        );

        // Gated until the countdown clears.
        assert!(matches!(
            orch.step().await,
            StepOutcome::Halt(HaltReason::CoolingDown { .. })
        ));
        assert_eq!(orch.gateway.calls("execute").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_cooldown() {
        struct SlowQuota;
        impl Gateway for SlowQuota {
            async fn plan(&self, _: &str, _: u32) -> Result<MissionPlan, GatewayError> {
                unreachable!()
            }
            async fn validate_integrity(
                &self,
                _: &Task,
                _: &[&Task],
            ) -> Result<IntegrityReport, GatewayError> {
                Err(GatewayError::QuotaExhausted {
                    retry_after_secs: Some(90),
                    message: "quota".into(),
                })
            }
            async fn judge(&self, _: &Task, _: &str) -> Result<Judgment, GatewayError> {
                unreachable!()
            }
            async fn decompose(
                &self,
                _: &Task,
                _: &str,
                _: u32,
            ) -> Result<Vec<TaskDraft>, GatewayError> {
                unreachable!()
            }
            async fn execute(
                &self,
                _: &Task,
                _: &AgentProfile,
                _: &str,
            ) -> Result<String, GatewayError> {
                unreachable!()
            }
            async fn audit(&self, _: &Task, _: &str) -> Result<AuditVerdict, GatewayError> {
                unreachable!()
            }
        }

        let mut orch = FlowOrchestrator::new(
            flow_of(vec![draft("a", &[])]),
            SlowQuota,
            MemoryStorage::new(),
            LoopSettings::default(),
        );
        orch.start();
        assert_eq!(
            orch.step().await,
            StepOutcome::Halt(HaltReason::CoolingDown { remaining_secs: 90 })
        );
        assert_eq!(orch.flow().task("a").unwrap().stage, Stage::Bronze);
    }

    #[tokio::test]
    async fn audit_rejections_exhaust_retries() {
        let gateway = ScriptedGateway::default().audits("a", &[false, false, false]);
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);

        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureKind::AuditExhausted));
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.last_error.as_deref(), Some("needs detail"));
        assert_eq!(orch.gateway.calls("execute").len(), 3);
        // Rejected tasks go straight back to execution.
        assert_eq!(orch.gateway.calls("judge").len(), 1);
        assert!(!orch.flow().context_memory.contains_key("a"));
    }

    #[tokio::test]
    async fn rejected_once_then_approved() {
        let gateway = ScriptedGateway::default().audits("a", &[false, true]);
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);

        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.stage, Stage::Gold);
        assert_eq!(task.retry_count, 1);
        assert!(orch.flow().context_memory.contains_key("a"));
    }

    #[tokio::test]
    async fn decomposition_appends_children_one_level_deeper() {
        let gateway = ScriptedGateway {
            decisions: HashMap::from([("a".to_string(), Decision::Decompose)]),
            subtasks: vec![draft("x", &[]), draft("y", &[]), draft("z", &[])],
            ..ScriptedGateway::default()
        };
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![draft("a", &[])]),
            gateway,
            MemoryStorage::new(),
            LoopSettings {
                branching_factor: 2,
                ..LoopSettings::default()
            },
        );
        assert_eq!(drive(&mut orch, 30).await, HaltReason::Completed);

        let flow = orch.flow();
        assert_eq!(flow.tasks.len(), 3);
        let parent = flow.task("a").unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(parent.stage, Stage::Silver);
        for id in ["a.x", "a.y"] {
            let child = flow.task(id).unwrap();
            assert_eq!(child.depth, 1);
            assert_eq!(child.parent_id.as_deref(), Some("a"));
            assert_eq!(child.status, TaskStatus::Completed);
        }
        assert!(flow.task("a.z").is_none());
        assert_eq!(flow.telemetry.max_depth, 1);
        assert_eq!(flow.telemetry.decomposed_count, 1);
        assert_eq!(orch.gateway.calls("execute"), vec!["execute:a.x", "execute:a.y"]);
    }

    #[tokio::test]
    async fn decomposition_stops_at_max_depth() {
        let gateway = ScriptedGateway {
            default_decision: Decision::Decompose,
            subtasks: vec![draft("x", &[]), draft("y", &[])],
            ..ScriptedGateway::default()
        };
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![draft("a", &[])]),
            gateway,
            MemoryStorage::new(),
            LoopSettings {
                max_depth: 2,
                ..LoopSettings::default()
            },
        );
        assert_eq!(drive(&mut orch, 60).await, HaltReason::Completed);

        let flow = orch.flow();
        // a → a.x, a.y → four grandchildren, which execute instead of splitting.
        assert_eq!(flow.tasks.len(), 7);
        assert!(flow.tasks.iter().all(|t| t.depth <= 2));
        assert_eq!(flow.telemetry.max_depth, 2);
        assert_eq!(flow.telemetry.decomposed_count, 3);
        assert_eq!(orch.gateway.calls("execute").len(), 4);
        assert!(flow.task("a.x.y").is_some());
    }

    #[tokio::test]
    async fn integrity_failure_is_final_and_blocks_dependents() {
        let gateway = ScriptedGateway {
            invalid: HashSet::from(["a".to_string()]),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[]), draft("b", &["a"])], gateway);
        orch.start();

        orch.step().await;
        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureKind::Integrity));
        assert_eq!(task.last_error.as_deref(), Some("contradictory requirements"));

        assert_eq!(
            orch.step().await,
            StepOutcome::Continue(Pacing::default().idle_poll)
        );
        assert_eq!(orch.gateway.calls("integrity:a").len(), 1);
        assert_eq!(status(&orch, "b"), TaskStatus::Todo);
        assert_eq!(orch.flow().status, FlowStatus::Running);
    }

    #[tokio::test]
    async fn gateway_failure_fails_task_and_loop_continues() {
        let gateway = ScriptedGateway {
            failing_execute: HashSet::from(["a".to_string()]),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[]), draft("b", &[])], gateway);
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);

        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureKind::Gateway));
        assert!(task.last_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(status(&orch, "b"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn storage_failure_is_only_a_warning() {
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![draft("a", &[])]),
            ScriptedGateway::default(),
            FailingStorage,
            LoopSettings::default(),
        );
        orch.start();
        orch.step().await;
        assert_eq!(orch.flow().task("a").unwrap().stage, Stage::Silver);
        assert_eq!(
            orch.latest_advisory().map(|a| a.level),
            Some(AdvisoryLevel::Warning)
        );
        assert_eq!(drive(&mut orch, 10).await, HaltReason::Completed);
    }

    #[tokio::test]
    async fn dangling_dependency_fail_fast() {
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![draft("a", &["ghost"]), draft("b", &[])]),
            ScriptedGateway::default(),
            MemoryStorage::new(),
            LoopSettings {
                dangling_policy: DanglingPolicy::FailFast,
                ..LoopSettings::default()
            },
        );
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);

        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureKind::DanglingDependency));
        assert!(task.last_error.as_deref().unwrap().contains("ghost"));
        assert_eq!(status(&orch, "b"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn dangling_dependency_waits_by_default() {
        let mut orch = orchestrator(vec![draft("a", &["ghost"])], ScriptedGateway::default());
        orch.start();
        assert_eq!(
            orch.step().await,
            StepOutcome::Continue(Pacing::default().idle_poll)
        );
        assert_eq!(status(&orch, "a"), TaskStatus::Todo);
    }

    #[tokio::test]
    async fn approval_gate_parks_until_approved() {
        let mut gated = draft("a", &[]);
        gated.requires_approval = true;
        let mut orch = orchestrator(vec![gated, draft("b", &["a"])], ScriptedGateway::default());
        orch.start();

        orch.step().await;
        assert_eq!(status(&orch, "a"), TaskStatus::WaitingApproval);
        assert_eq!(
            orch.step().await,
            StepOutcome::Continue(Pacing::default().idle_poll)
        );
        assert!(matches!(
            orch.approve("b"),
            Err(AetherError::InvalidTransition { .. })
        ));

        orch.approve("a").unwrap();
        assert_eq!(status(&orch, "a"), TaskStatus::Todo);
        assert_eq!(drive(&mut orch, 20).await, HaltReason::Completed);
        assert_eq!(status(&orch, "a"), TaskStatus::Completed);
        assert_eq!(status(&orch, "b"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn empty_flow_completes_immediately() {
        let mut orch = orchestrator(vec![], ScriptedGateway::default());
        assert_eq!(drive(&mut orch, 1).await, HaltReason::Completed);
        assert_eq!(orch.flow().status, FlowStatus::Completed);
    }

    #[tokio::test]
    async fn pause_halts_before_next_step() {
        let mut orch = orchestrator(vec![draft("a", &[])], ScriptedGateway::default());
        orch.start();
        orch.handle().pause();
        assert_eq!(orch.step().await, StepOutcome::Halt(HaltReason::Paused));
        assert_eq!(orch.flow().status, FlowStatus::Paused);
        assert!(orch.gateway.calls("").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_a_call_applies_its_result_then_halts() {
        let mut orch = orchestrator(
            vec![draft("a", &[]), draft("b", &[])],
            ScriptedGateway::default(),
        );
        orch.gateway.pause_during_execute = Some(orch.handle());

        assert_eq!(orch.run().await, HaltReason::Paused);
        let a = orch.flow().task("a").unwrap();
        assert_eq!(a.status, TaskStatus::Completed);
        assert_eq!(a.stage, Stage::Gold);
        assert!(orch.flow().context_memory.contains_key("a"));

        let b = orch.flow().task("b").unwrap();
        assert_eq!(b.status, TaskStatus::Todo);
        assert_eq!(b.stage, Stage::Bronze);
        assert!(orch.gateway.calls("integrity:b").is_empty());
        assert_eq!(orch.flow().status, FlowStatus::Paused);
    }

    #[tokio::test]
    async fn decomposition_uses_the_longer_delay() {
        let gateway = ScriptedGateway {
            decisions: HashMap::from([("a".to_string(), Decision::Decompose)]),
            subtasks: vec![draft("x", &[]), draft("y", &[])],
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);
        orch.start();

        let pacing = Pacing::default();
        assert_eq!(orch.step().await, StepOutcome::Continue(pacing.integrity));
        assert_eq!(orch.step().await, StepOutcome::Continue(pacing.decompose));
        assert!(pacing.decompose > pacing.standard);
        assert_eq!(orch.flow().tasks.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_on_decompose_requeues_without_children() {
        let gateway = ScriptedGateway {
            decisions: HashMap::from([("a".to_string(), Decision::Decompose)]),
            subtasks: vec![draft("x", &[]), draft("y", &[])],
            quota_on_decompose: Mutex::new(1),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);

        let halt = drive(&mut orch, 5).await;
        assert_eq!(halt, HaltReason::CoolingDown { remaining_secs: 60 });
        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.failure.is_none());
        assert_eq!(orch.flow().tasks.len(), 1);
        assert_eq!(orch.flow().telemetry.decomposed_count, 0);
        assert_eq!(orch.flow().status, FlowStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_on_rejected_retry_keeps_feedback_and_count() {
        let gateway = ScriptedGateway {
            execute_quota_at: vec![2],
            ..ScriptedGateway::default()
        }
        .audits("a", &[false]);
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);

        let halt = drive(&mut orch, 5).await;
        assert!(matches!(halt, HaltReason::CoolingDown { .. }));
        let task = orch.flow().task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.audit_feedback.as_deref(), Some("needs detail"));
        assert!(task.failure.is_none());
        assert_eq!(orch.gateway.calls("execute").len(), 2);
    }

    #[tokio::test]
    async fn approval_saved_elsewhere_survives_pause() {
        let dir = tempfile::tempdir().unwrap();
        let mut gated = draft("a", &[]);
        gated.requires_approval = true;
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![gated]),
            ScriptedGateway::default(),
            JsonlStorage::new(dir.path()).unwrap(),
            LoopSettings::default(),
        );
        orch.start();
        orch.step().await;
        assert_eq!(
            orch.step().await,
            StepOutcome::Continue(Pacing::default().idle_poll)
        );

        // `aether approve` from another terminal.
        let other = JsonlStorage::new(dir.path()).unwrap();
        let mut flow = other.load::<Flow>("owner").unwrap().remove(0);
        flow.approve_task("a").unwrap();
        other.save(&flow).unwrap();

        orch.handle().pause();
        assert_eq!(orch.step().await, StepOutcome::Halt(HaltReason::Paused));

        let reloaded = JsonlStorage::new(dir.path()).unwrap();
        let flow = reloaded.load::<Flow>("owner").unwrap().remove(0);
        let task = flow.task("a").unwrap();
        assert!(task.approved);
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(flow.status, FlowStatus::Paused);
    }

    #[tokio::test]
    async fn running_loop_picks_up_approval_saved_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let mut gated = draft("a", &[]);
        gated.requires_approval = true;
        let mut orch = FlowOrchestrator::new(
            flow_of(vec![gated]),
            ScriptedGateway::default(),
            JsonlStorage::new(dir.path()).unwrap(),
            LoopSettings::default(),
        );
        orch.start();
        orch.step().await;
        assert_eq!(status(&orch, "a"), TaskStatus::WaitingApproval);

        let other = JsonlStorage::new(dir.path()).unwrap();
        let mut flow = other.load::<Flow>("owner").unwrap().remove(0);
        flow.approve_task("a").unwrap();
        other.save(&flow).unwrap();

        assert_eq!(drive(&mut orch, 10).await, HaltReason::Completed);
        assert_eq!(status(&orch, "a"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn start_requeues_interrupted_tasks() {
        let mut flow = flow_of(vec![draft("a", &[])]);
        flow.tasks[0].status = TaskStatus::Auditing;
        let mut orch = FlowOrchestrator::new(
            flow,
            ScriptedGateway::default(),
            MemoryStorage::new(),
            LoopSettings::default(),
        );
        orch.start();
        assert_eq!(status(&orch, "a"), TaskStatus::Todo);
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let mut orch = orchestrator(vec![draft("a", &[])], ScriptedGateway::default());
        drive(&mut orch, 10).await;
        let saved: Vec<Flow> = orch.storage().load("owner").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(&saved[0], orch.flow());
    }

    #[tokio::test]
    async fn events_are_published() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut orch = orchestrator(vec![draft("a", &[])], ScriptedGateway::default())
            .with_events(tx);
        drive(&mut orch, 10).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&FlowEvent::FlowStatus(FlowStatus::Running)));
        assert!(events.contains(&FlowEvent::TaskChanged {
            task_id: "a".into(),
            title: "Task a".into(),
            status: TaskStatus::Completed,
            stage: Stage::Gold,
        }));
        assert!(events.contains(&FlowEvent::FlowStatus(FlowStatus::Completed)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_resumes_after_cooldown() {
        let gateway = ScriptedGateway {
            quota_on_execute: Mutex::new(1),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);

        let started = tokio::time::Instant::now();
        assert_eq!(orch.run().await, HaltReason::Completed);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(status(&orch, "a"), TaskStatus::Completed);
        assert_eq!(orch.gateway.calls("execute").len(), 2);
        assert_eq!(orch.flow().status, FlowStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_paused_during_cooldown() {
        let gateway = ScriptedGateway {
            quota_on_execute: Mutex::new(1),
            ..ScriptedGateway::default()
        };
        let mut orch = orchestrator(vec![draft("a", &[])], gateway);
        let handle = orch.handle();
        tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            handle.pause();
        });

        assert_eq!(orch.run().await, HaltReason::Paused);
        assert_eq!(orch.flow().status, FlowStatus::Paused);
        assert_eq!(status(&orch, "a"), TaskStatus::Todo);
        assert!(orch.cooldown().is_active());
    }

    #[tokio::test]
    async fn plan_mission_seeds_idle_flow() {
        let gateway = ScriptedGateway {
            plan: vec![draft("a", &[]), draft("b", &["a"])],
            ..ScriptedGateway::default()
        };
        let flow = plan_mission(
            &gateway,
            &Cooldown::new(),
            "  ship it ",
            &LoopSettings::default(),
            "owner",
        )
        .await
        .unwrap();
        assert_eq!(flow.name, "Scripted");
        assert_eq!(flow.goal, "ship it");
        assert_eq!(flow.status, FlowStatus::Idle);
        assert_eq!(flow.tasks.len(), 2);
    }

    #[tokio::test]
    async fn plan_mission_rejects_empty_goal() {
        let result = plan_mission(
            &ScriptedGateway::default(),
            &Cooldown::new(),
            "   ",
            &LoopSettings::default(),
            "owner",
        )
        .await;
        assert!(matches!(result, Err(AetherError::EmptyGoal)));
    }

    #[tokio::test(start_paused = true)]
    async fn plan_mission_gated_by_cooldown() {
        let gateway = ScriptedGateway {
            quota_on_plan: true,
            ..ScriptedGateway::default()
        };
        let cooldown = Cooldown::new();
        let settings = LoopSettings::default();

        let first = plan_mission(&gateway, &cooldown, "goal", &settings, "owner").await;
        assert!(matches!(
            first,
            Err(AetherError::CoolingDown { remaining_secs: 60 })
        ));
        assert!(cooldown.is_active());

        let ok = ScriptedGateway {
            plan: vec![draft("a", &[])],
            ..ScriptedGateway::default()
        };
        let second = plan_mission(&ok, &cooldown, "goal", &settings, "owner").await;
        assert!(matches!(second, Err(AetherError::CoolingDown { .. })));

        cooldown.wait_clear().await;
        assert!(plan_mission(&ok, &cooldown, "goal", &settings, "owner").await.is_ok());
    }
}
