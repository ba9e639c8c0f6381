//! Configuração do AETHER carregada a partir de `aether.toml`.
//!
//! A struct [`AetherConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `GEMINI_API_KEY` tem precedência sobre o arquivo;
//! flags da CLI têm precedência sobre ambos.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::AgentProfile;
use crate::flow::DanglingPolicy;
use crate::gateway::QuotaRetry;
use crate::orchestrator::{LoopSettings, Pacing};

pub const CONFIG_FILE: &str = "aether.toml";
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Configuração de nível superior carregada de `aether.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AetherConfig {
    /// Chave da API Gemini. Vazia significa modo offline.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Dono dos registros persistidos.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    /// Diretório dos arquivos JSONL.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Número máximo de subtarefas por decomposição.
    #[serde(default = "default_branching_factor")]
    pub branching_factor: u32,

    /// Rejeições de auditoria toleradas antes de falhar a tarefa.
    #[serde(default = "default_max_audit_retries")]
    pub max_audit_retries: u32,

    /// Profundidade a partir da qual uma decisão `decompose` vira `execute`.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Duração mínima do cooldown após esgotar a cota.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Retentativas internas do gateway para erros de cota.
    #[serde(default = "default_quota_retries")]
    pub quota_retries: u32,

    /// Atraso base em milissegundos para o backoff de cota (fator 1.5).
    #[serde(default = "default_quota_retry_delay_ms")]
    pub quota_retry_delay_ms: u64,

    #[serde(default)]
    pub dangling_policy: DanglingPolicy,

    #[serde(default)]
    pub pacing: PacingConfig,

    /// Perfis de agente; vazio usa o perfil embutido.
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

/// Atrasos entre passos do loop, em milissegundos.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_integrity_ms")]
    pub integrity_ms: u64,
    #[serde(default = "default_decompose_ms")]
    pub decompose_ms: u64,
    #[serde(default = "default_standard_ms")]
    pub standard_ms: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_owner_id() -> String {
    "local".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".aether")
}

fn default_branching_factor() -> u32 {
    3
}

fn default_max_audit_retries() -> u32 {
    2
}

fn default_max_depth() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_gateway_timeout_secs() -> u64 {
    120
}

fn default_quota_retries() -> u32 {
    3
}

fn default_quota_retry_delay_ms() -> u64 {
    10_000
}

fn default_idle_poll_ms() -> u64 {
    5000
}

fn default_integrity_ms() -> u64 {
    500
}

fn default_decompose_ms() -> u64 {
    3000
}

fn default_standard_ms() -> u64 {
    1500
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
            integrity_ms: default_integrity_ms(),
            decompose_ms: default_decompose_ms(),
            standard_ms: default_standard_ms(),
        }
    }
}

impl PacingConfig {
    pub fn to_pacing(&self) -> Pacing {
        Pacing {
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            integrity: Duration::from_millis(self.integrity_ms),
            decompose: Duration::from_millis(self.decompose_ms),
            standard: Duration::from_millis(self.standard_ms),
        }
    }
}

impl Default for AetherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            owner_id: default_owner_id(),
            data_dir: default_data_dir(),
            branching_factor: default_branching_factor(),
            max_audit_retries: default_max_audit_retries(),
            max_depth: default_max_depth(),
            cooldown_secs: default_cooldown_secs(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            quota_retries: default_quota_retries(),
            quota_retry_delay_ms: default_quota_retry_delay_ms(),
            dangling_policy: DanglingPolicy::default(),
            pacing: PacingConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl AetherConfig {
    /// Carrega a configuração de `aether.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE), std::env::var(API_KEY_VAR).ok())
    }

    /// Carrega de `path`; `env_key`, se não vazia, substitui a chave do arquivo.
    pub fn load_from(path: &Path, env_key: Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<AetherConfig>(&contents)
                .with_context(|| format!("invalid config in {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Some(key) = env_key
            && !key.is_empty()
        {
            config.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    /// Aplica os flags da CLI, que têm precedência sobre arquivo e ambiente,
    /// e valida o resultado.
    pub fn apply_overrides(
        &mut self,
        model: Option<String>,
        branching: Option<u32>,
        offline: bool,
    ) -> Result<()> {
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(branching) = branching {
            self.branching_factor = branching;
        }
        if offline {
            self.api_key.clear();
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.branching_factor < 2 {
            anyhow::bail!(
                "branching_factor must be at least 2, got {}",
                self.branching_factor
            );
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }
        Ok(())
    }

    /// Sem chave configurada o gateway offline é usado.
    pub fn is_offline(&self) -> bool {
        self.api_key.trim().is_empty()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            pacing: self.pacing.to_pacing(),
            branching_factor: self.branching_factor,
            max_audit_retries: self.max_audit_retries,
            max_depth: self.max_depth,
            cooldown_secs: self.cooldown_secs,
            dangling_policy: self.dangling_policy,
        }
    }

    pub fn quota_retry(&self) -> QuotaRetry {
        QuotaRetry {
            retries: self.quota_retries,
            base_delay_ms: self.quota_retry_delay_ms,
            ..QuotaRetry::default()
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    /// Perfis configurados, com o dono preenchido quando ausente.
    pub fn agent_profiles(&self) -> Vec<AgentProfile> {
        self.agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let mut agent = agent.clone();
                if agent.owner_id.is_empty() {
                    agent.owner_id = self.owner_id.clone();
                }
                if agent.id.is_empty() {
                    agent.id = format!("agent-{}-{i}", agent.role.to_lowercase());
                }
                agent
            })
            .collect()
    }
}
