use std::time::Duration;

use tokio::time::{sleep, timeout};

use super::parse;
use super::{AuditVerdict, Gateway, GatewayError, IntegrityReport, Judgment, MissionPlan};
use crate::agent::AgentProfile;
use crate::flow::{Task, TaskDraft};
use crate::gemini::{ContentGenerator, GenerateContentRequest};

/// Retry schedule applied to quota errors before they escape the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRetry {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
}

impl Default for QuotaRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay_ms: 10_000,
            factor: 1.5,
        }
    }
}

impl QuotaRetry {
    /// delay = base_delay_ms * factor^attempt, attempt counted from 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.base_delay_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(ms.round() as u64)
    }
}

/// [`Gateway`] backed by a `generateContent` model.
pub struct LlmGateway<C> {
    client: C,
    model: String,
    call_timeout: Duration,
    retry: QuotaRetry,
}

impl<C: ContentGenerator> LlmGateway<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout: Duration::from_secs(120),
            retry: QuotaRetry::default(),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_quota_retry(mut self, retry: QuotaRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Sends `req`, retrying quota errors, and returns the response text.
    async fn call(
        &self,
        operation: &'static str,
        req: GenerateContentRequest,
    ) -> Result<String, GatewayError> {
        let mut attempt = 0;
        loop {
            let outcome = timeout(self.call_timeout, self.client.generate(&req)).await;
            match outcome {
                Err(_) => {
                    tracing::warn!(operation, timeout_secs = self.call_timeout.as_secs(), "gateway call timed out");
                    return Err(GatewayError::Timeout(self.call_timeout.as_secs()));
                }
                Ok(Ok(response)) => {
                    return response
                        .text()
                        .ok_or_else(|| GatewayError::malformed(operation, "empty response"));
                }
                Ok(Err(e)) if e.is_quota_exhausted() => {
                    if attempt < self.retry.retries {
                        let delay = self.retry.delay_for_attempt(attempt);
                        attempt += 1;
                        tracing::warn!(
                            operation,
                            attempt,
                            max = self.retry.retries,
                            delay_ms = delay.as_millis() as u64,
                            "rate limit hit, retrying"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(GatewayError::QuotaExhausted {
                        retry_after_secs: e.retry_after_ms().map(|ms| ms.div_ceil(1000)),
                        message: e.to_string(),
                    });
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn json_request(&self, system: &str, prompt: String) -> GenerateContentRequest {
        GenerateContentRequest::user_prompt(&self.model, prompt)
            .with_system(system)
            .expect_json()
    }
}

fn describe(task: &Task) -> String {
    let mut text = format!("Task [{}] \"{}\"\nDescription: {}", task.id, task.title, task.description);
    if !task.guidance.recommendations.is_empty() {
        text.push_str(&format!(
            "\nRecommendations: {}",
            task.guidance.recommendations.join("; ")
        ));
    }
    if !task.guidance.pitfalls.is_empty() {
        text.push_str(&format!("\nPitfalls: {}", task.guidance.pitfalls.join("; ")));
    }
    text
}

impl<C: ContentGenerator> Gateway for LlmGateway<C> {
    async fn plan(&self, goal: &str, width: u32) -> Result<MissionPlan, GatewayError> {
        let req = self.json_request(
            "You are the Aether meta-agent. Decompose goals into a DAG of high-level tasks. \
             Output strictly JSON.",
            format!(
                "Architect a mission for: \"{goal}\"\n\
                 \n\
                 Format:\n\
                 {{\"projectName\": \"<name>\", \"tasks\": [\n\
                   {{\"id\": \"<short id without dots>\", \"title\": \"<title>\", \"description\": \"<what to do>\", \
                 \"agentRole\": \"<role>\", \"dependencies\": [\"<task id>\"], \"requiresApproval\": false}}\n\
                 ]}}\n\
                 \n\
                 Rules:\n\
                 - Produce between 2 and {} top-level tasks\n\
                 - dependencies may only reference ids from this list\n\
                 - the dependency graph must be acyclic",
                width.max(2) * 2
            ),
        );
        let text = self.call("plan", req).await?;
        parse::parse_plan(&text)
    }

    async fn validate_integrity(
        &self,
        task: &Task,
        siblings: &[&Task],
    ) -> Result<IntegrityReport, GatewayError> {
        let sibling_list = if siblings.is_empty() {
            "(none)".to_string()
        } else {
            siblings
                .iter()
                .map(|s| format!("- [{}] {}", s.id, s.title))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let req = self.json_request(
            "You validate task definitions before they are executed. Output strictly JSON.",
            format!(
                "{}\n\nSibling tasks:\n{sibling_list}\n\n\
                 Check that the task is well-defined, achievable and does not duplicate a sibling.\n\
                 Format: {{\"isValid\": true, \"error\": null, \"recommendations\": [\"...\"], \"pitfalls\": [\"...\"]}}",
                describe(task)
            ),
        );
        let text = self.call("integrity", req).await?;
        parse::parse_integrity(&text)
    }

    async fn judge(&self, task: &Task, context: &str) -> Result<Judgment, GatewayError> {
        let req = self.json_request(
            "You decide how a task should be handled. Output strictly JSON.",
            format!(
                "{}\nDepth: {}\n\nContext from completed tasks:\n{context}\n\n\
                 Decide one of: \"execute\" (do it directly), \"decompose\" (split into sub-steps), \
                 \"prune\" (redundant or already covered by context).\n\
                 Format: {{\"decision\": \"execute\", \"reasoning\": \"...\"}}",
                describe(task),
                task.depth
            ),
        );
        let text = self.call("judge", req).await?;
        parse::parse_judgment(&text)
    }

    async fn decompose(
        &self,
        task: &Task,
        context: &str,
        width: u32,
    ) -> Result<Vec<TaskDraft>, GatewayError> {
        let req = self.json_request(
            "You split a task into sequential sub-steps. Output strictly JSON.",
            format!(
                "{}\n\nContext from completed tasks:\n{context}\n\n\
                 Produce between 2 and {} subtasks.\n\
                 Format: {{\"subtasks\": [{{\"id\": \"<short id without dots>\", \"title\": \"...\", \
                 \"description\": \"...\", \"agentRole\": \"...\"}}]}}",
                describe(task),
                width.max(2)
            ),
        );
        let text = self.call("decompose", req).await?;
        parse::parse_subtasks(&text, width)
    }

    async fn execute(
        &self,
        task: &Task,
        agent: &AgentProfile,
        context: &str,
    ) -> Result<String, GatewayError> {
        let model = if agent.model_id.is_empty() {
            self.model.as_str()
        } else {
            agent.model_id.as_str()
        };
        let mut prompt = format!("Execute: {}\n\nContext:\n{context}", describe(task));
        if let Some(feedback) = &task.audit_feedback {
            prompt.push_str(&format!(
                "\n\nA previous attempt was rejected by the auditor. Address this feedback:\n{feedback}"
            ));
        }
        let req = GenerateContentRequest::user_prompt(model, prompt)
            .with_system(&agent.system_prompt)
            .with_temperature(agent.temperature);
        self.call("execute", req).await
    }

    async fn audit(&self, task: &Task, result: &str) -> Result<AuditVerdict, GatewayError> {
        let req = self.json_request(
            "You are a strict quality auditor. Output strictly JSON.",
            format!(
                "{}\n\nResult to audit:\n{result}\n\n\
                 Approve only if the result fully accomplishes the task.\n\
                 Format: {{\"approved\": true, \"feedback\": \"...\"}}",
                describe(task)
            ),
        );
        let text = self.call("audit", req).await?;
        parse::parse_audit(&text)
    }
}
