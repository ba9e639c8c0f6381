//! Interface de linha de comando do AETHER baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (plan, run, status,
//! approve, export, demo) e flags globais (--model, --branching, --offline,
//! --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// AETHER — Orquestrador de missões com decomposição recursiva por LLM.
#[derive(Debug, Parser)]
#[command(name = "aether", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Modelo Gemini a usar nesta sessão.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Número máximo de subtarefas por decomposição.
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(2..))]
    pub branching: Option<u32>,

    /// Usa o gateway offline mesmo com chave configurada.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Planeja uma missão a partir de um objetivo e a persiste.
    Plan {
        /// Objetivo em linguagem natural.
        goal: String,
    },

    /// Executa o loop sobre uma missão (a mais recente se omitida).
    Run {
        flow_id: Option<String>,
    },

    /// Lista as missões, ou as tarefas de uma missão.
    Status {
        flow_id: Option<String>,
    },

    /// Aprova uma tarefa aguardando aprovação.
    Approve {
        flow_id: String,
        task_id: String,
    },

    /// Exporta o relatório JSON de uma missão.
    Export {
        flow_id: String,

        /// Arquivo de saída; stdout se omitido.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Planeja e executa uma missão offline, em memória.
    Demo {
        goal: Option<String>,
    },
}
