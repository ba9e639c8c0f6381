use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use aether::agent::AgentProfile;
use aether::cli::{Cli, Command};
use aether::config::AetherConfig;
use aether::cooldown::Cooldown;
use aether::error::AetherError;
use aether::flow::{Flow, Task, TaskDraft};
use aether::gateway::{
    AuditVerdict, Gateway, GatewayError, IntegrityReport, Judgment, LlmGateway, MissionPlan,
    OfflineGateway,
};
use aether::gemini::GeminiClient;
use aether::logging;
use aether::orchestrator::{FlowOrchestrator, plan_mission};
use aether::storage::{JsonlStorage, MemoryStorage, Storage};
use aether::ui::{FlowProgress, print_flow, print_flow_list};

const DEMO_GOAL: &str = "Research the market for a recipe app, design the screens and write the launch announcement";

/// The gateway chosen at startup.
enum Backend {
    Live(LlmGateway<GeminiClient>),
    Offline(OfflineGateway),
}

impl Backend {
    fn from_config(config: &AetherConfig) -> Result<Self> {
        if config.is_offline() {
            info!("no API key configured, using the offline gateway");
            return Ok(Backend::Offline(OfflineGateway));
        }
        let client = GeminiClient::new(config.api_key.clone())
            .context("failed to build the Gemini client")?;
        Ok(Backend::Live(
            LlmGateway::new(client, config.model.clone())
                .with_timeout(config.gateway_timeout())
                .with_quota_retry(config.quota_retry()),
        ))
    }
}

impl Gateway for Backend {
    async fn plan(&self, goal: &str, width: u32) -> Result<MissionPlan, GatewayError> {
        match self {
            Backend::Live(g) => g.plan(goal, width).await,
            Backend::Offline(g) => g.plan(goal, width).await,
        }
    }

    async fn validate_integrity(
        &self,
        task: &Task,
        siblings: &[&Task],
    ) -> Result<IntegrityReport, GatewayError> {
        match self {
            Backend::Live(g) => g.validate_integrity(task, siblings).await,
            Backend::Offline(g) => g.validate_integrity(task, siblings).await,
        }
    }

    async fn judge(&self, task: &Task, context: &str) -> Result<Judgment, GatewayError> {
        match self {
            Backend::Live(g) => g.judge(task, context).await,
            Backend::Offline(g) => g.judge(task, context).await,
        }
    }

    async fn decompose(
        &self,
        task: &Task,
        context: &str,
        width: u32,
    ) -> Result<Vec<TaskDraft>, GatewayError> {
        match self {
            Backend::Live(g) => g.decompose(task, context, width).await,
            Backend::Offline(g) => g.decompose(task, context, width).await,
        }
    }

    async fn execute(
        &self,
        task: &Task,
        agent: &AgentProfile,
        context: &str,
    ) -> Result<String, GatewayError> {
        match self {
            Backend::Live(g) => g.execute(task, agent, context).await,
            Backend::Offline(g) => g.execute(task, agent, context).await,
        }
    }

    async fn audit(&self, task: &Task, result: &str) -> Result<AuditVerdict, GatewayError> {
        match self {
            Backend::Live(g) => g.audit(task, result).await,
            Backend::Offline(g) => g.audit(task, result).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = AetherConfig::load()?;
    config.apply_overrides(cli.model, cli.branching, cli.offline)?;

    match cli.command {
        Command::Plan { goal } => plan(&config, &goal).await,
        Command::Run { flow_id } => run(&config, flow_id.as_deref()).await,
        Command::Status { flow_id } => status(&config, flow_id.as_deref()),
        Command::Approve { flow_id, task_id } => approve(&config, &flow_id, &task_id),
        Command::Export { flow_id, out } => export(&config, &flow_id, out),
        Command::Demo { goal } => demo(&config, goal.as_deref().unwrap_or(DEMO_GOAL)).await,
    }
}

async fn plan(config: &AetherConfig, goal: &str) -> Result<()> {
    let storage = JsonlStorage::new(&config.data_dir)?;
    let backend = Backend::from_config(config)?;
    let flow = plan_mission(
        &backend,
        &Cooldown::new(),
        goal,
        &config.loop_settings(),
        &config.owner_id,
    )
    .await?;
    storage.save(&flow)?;
    print_flow(&flow);
    println!("\nRun it with: aether run {}", flow.id);
    Ok(())
}

async fn run(config: &AetherConfig, flow_id: Option<&str>) -> Result<()> {
    let storage = JsonlStorage::new(&config.data_dir)?;
    let flow = load_flow(&storage, &config.owner_id, flow_id)?;
    let agents = agent_profiles(config, &storage)?;
    let backend = Backend::from_config(config)?;

    let orchestrator = FlowOrchestrator::new(flow, backend, storage, config.loop_settings())
        .with_agents(agents);
    let flow = drive(orchestrator).await;
    print_flow(&flow);
    Ok(())
}

async fn demo(config: &AetherConfig, goal: &str) -> Result<()> {
    let gateway = OfflineGateway;
    let settings = config.loop_settings();
    let flow = plan_mission(&gateway, &Cooldown::new(), goal, &settings, &config.owner_id).await?;
    print_flow(&flow);
    println!();

    let orchestrator = FlowOrchestrator::new(flow, gateway, MemoryStorage::new(), settings)
        .with_agents(config.agent_profiles());
    let flow = drive(orchestrator).await;
    print_flow(&flow);
    Ok(())
}

/// Runs the loop with a spinner until it halts; Ctrl-C pauses after the current step.
async fn drive<G: Gateway, S: Storage>(orchestrator: FlowOrchestrator<G, S>) -> Flow {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut orchestrator = orchestrator.with_events(tx);
    let progress = FlowProgress::start(orchestrator.flow());

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.pause();
        }
    });

    let reason = {
        let run = orchestrator.run();
        tokio::pin!(run);
        loop {
            tokio::select! {
                reason = &mut run => break reason,
                Some(event) = rx.recv() => progress.event(&event),
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        progress.event(&event);
    }
    progress.finish(reason);
    orchestrator.into_flow()
}

fn status(config: &AetherConfig, flow_id: Option<&str>) -> Result<()> {
    let storage = JsonlStorage::new(&config.data_dir)?;
    match flow_id {
        Some(id) => print_flow(&load_flow(&storage, &config.owner_id, Some(id))?),
        None => {
            let flows: Vec<Flow> = storage.load(&config.owner_id)?;
            if flows.is_empty() {
                return Err(AetherError::NoFlows.into());
            }
            print_flow_list(&flows);
        }
    }
    Ok(())
}

fn approve(config: &AetherConfig, flow_id: &str, task_id: &str) -> Result<()> {
    let storage = JsonlStorage::new(&config.data_dir)?;
    let mut flow = load_flow(&storage, &config.owner_id, Some(flow_id))?;
    flow.approve_task(task_id)?;
    storage.save(&flow)?;
    println!("Approved {task_id}. Resume with: aether run {flow_id}");
    Ok(())
}

fn export(config: &AetherConfig, flow_id: &str, out: Option<PathBuf>) -> Result<()> {
    let storage = JsonlStorage::new(&config.data_dir)?;
    let flow = load_flow(&storage, &config.owner_id, Some(flow_id))?;
    let json = serde_json::to_string_pretty(&flow.report())?;
    match out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// The flow with `flow_id`, or the most recently updated one.
fn load_flow(
    storage: &impl Storage,
    owner_id: &str,
    flow_id: Option<&str>,
) -> Result<Flow, AetherError> {
    let flows: Vec<Flow> = storage.load(owner_id)?;
    match flow_id {
        Some(id) => flows
            .into_iter()
            .find(|f| f.id == id)
            .ok_or_else(|| AetherError::FlowNotFound(id.to_string())),
        None => flows
            .into_iter()
            .max_by_key(|f| f.updated_at)
            .ok_or(AetherError::NoFlows),
    }
}

/// Configured profiles are saved for later runs; without any, the saved ones are used.
fn agent_profiles(config: &AetherConfig, storage: &impl Storage) -> Result<Vec<AgentProfile>> {
    let configured = config.agent_profiles();
    if configured.is_empty() {
        return Ok(storage.load(&config.owner_id)?);
    }
    for agent in &configured {
        storage.save(agent)?;
    }
    Ok(configured)
}
