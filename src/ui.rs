//! Interface de terminal do AETHER — spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner do loop e `console` para cores. O
//! [`FlowProgress`] mostra os eventos da missão enquanto ela executa.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::flow::{Flow, FlowStatus, Stage, Task, TaskStatus};
use crate::orchestrator::{Advisory, AdvisoryLevel, FlowEvent, HaltReason};

/// Spinner que acompanha a execução de uma missão.
pub struct FlowProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
}

impl FlowProgress {
    /// Inicia o spinner com o nome da missão.
    pub fn start(flow: &Flow) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{} ({} tasks)", flow.name, flow.tasks.len()));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
        }
    }

    /// Mostra um evento acima do spinner.
    pub fn event(&self, event: &FlowEvent) {
        match event {
            FlowEvent::TaskChanged {
                task_id,
                title,
                status,
                stage,
            } => {
                if status.is_active() {
                    self.pb.set_message(format!("{status}: [{task_id}] {title}"));
                    return;
                }
                let mark = match status {
                    TaskStatus::Completed => self.green.apply_to("✓"),
                    TaskStatus::Failed => self.red.apply_to("✗"),
                    TaskStatus::Rejected | TaskStatus::WaitingApproval => {
                        self.yellow.apply_to("↻")
                    }
                    _ => self.cyan.apply_to("·"),
                };
                self.pb.println(format!(
                    "  {mark} [{task_id}] {title} {} {}",
                    status_style(*status).apply_to(status),
                    stage_style(*stage).apply_to(stage)
                ));
            }
            FlowEvent::FlowStatus(status) => {
                self.pb.set_message(format!("flow {status}"));
            }
            FlowEvent::Advisory(advisory) => self.advisory(advisory),
        }
    }

    fn advisory(&self, advisory: &Advisory) {
        let styled = match advisory.level {
            AdvisoryLevel::Info => return,
            AdvisoryLevel::Warning => self.yellow.apply_to("!"),
            AdvisoryLevel::Error => self.red.apply_to("!"),
            AdvisoryLevel::Cooldown => self.cyan.apply_to("⏸"),
        };
        self.pb.println(format!("  {styled} {}", advisory.message));
    }

    /// Finaliza o spinner e mostra por que o loop parou.
    pub fn finish(&self, reason: HaltReason) {
        self.pb.finish_and_clear();
        match reason {
            HaltReason::Completed => {
                println!("  {} Mission complete", self.green.apply_to("✓"));
            }
            HaltReason::Paused => {
                println!("  {} Paused, run again to resume", self.yellow.apply_to("⏸"));
            }
            HaltReason::CoolingDown { remaining_secs } => {
                println!(
                    "  {} Cooling down ({remaining_secs}s remaining)",
                    self.yellow.apply_to("⏸")
                );
            }
        }
    }
}

fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Completed => Style::new().green(),
        TaskStatus::Failed => Style::new().red(),
        TaskStatus::Pruned => Style::new().dim(),
        TaskStatus::Rejected | TaskStatus::WaitingApproval => Style::new().yellow(),
        _ => Style::new().cyan(),
    }
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Bronze => Style::new().color256(130),
        Stage::Silver => Style::new().white(),
        Stage::Gold => Style::new().yellow().bold(),
    }
}

fn flow_status_style(status: FlowStatus) -> Style {
    match status {
        FlowStatus::Completed => Style::new().green(),
        FlowStatus::Failed => Style::new().red(),
        FlowStatus::Paused => Style::new().yellow(),
        _ => Style::new().cyan(),
    }
}

/// One line per task, children indented under their parent's depth.
pub fn task_line(task: &Task) -> String {
    let indent = "  ".repeat(task.depth as usize);
    let mut line = format!(
        "{indent}[{}] {} {} {} ({})",
        task.id,
        task.title,
        status_style(task.status).apply_to(task.status),
        stage_style(task.stage).apply_to(task.stage),
        task.assigned_role
    );
    if !task.dependencies.is_empty() {
        line.push_str(&format!(" after {}", task.dependencies.join(", ")));
    }
    if let Some(err) = &task.last_error {
        line.push_str(&format!(": {err}"));
    }
    line
}

/// Imprime a missão com suas tarefas e telemetria.
pub fn print_flow(flow: &Flow) {
    let bold = Style::new().bold();
    println!(
        "{} {} {}",
        bold.apply_to(&flow.name),
        Style::new().dim().apply_to(&flow.id),
        flow_status_style(flow.status).apply_to(flow.status)
    );
    for task in &flow.tasks {
        println!("  {}", task_line(task));
    }
    let t = &flow.telemetry;
    println!(
        "{}",
        Style::new().dim().apply_to(format!(
            "  depth {} · pruned {} · decomposed {} · executed {}",
            t.max_depth, t.pruned_count, t.decomposed_count, t.executed_count
        ))
    );
}

/// Uma linha por missão, para `aether status` sem argumento.
pub fn print_flow_list(flows: &[Flow]) {
    for flow in flows {
        let done = flow
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .count();
        println!(
            "{} {} {} {done}/{}",
            flow.id,
            flow.name,
            flow_status_style(flow.status).apply_to(flow.status),
            flow.tasks.len()
        );
    }
}
