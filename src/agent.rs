//! Perfis de agente usados para executar tarefas.
//!
//! Cada tarefa carrega um `assigned_role`; o perfil escolhido é o primeiro cujo
//! papel coincide (sem diferenciar maiúsculas), ou o primeiro da lista, ou o
//! perfil embutido "Architect-Prime".

use serde::{Deserialize, Serialize};

/// Configuração de um agente executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    /// Modelo a usar; vazio significa o modelo padrão da configuração.
    #[serde(default)]
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.2
}

impl AgentProfile {
    /// Perfil embutido usado quando nenhum outro foi configurado.
    pub fn architect(owner_id: &str) -> Self {
        Self {
            id: format!("agent-arch-{owner_id}"),
            owner_id: owner_id.to_string(),
            name: "Architect-Prime".to_string(),
            role: "architect".to_string(),
            system_prompt: "You are a systems architecture expert. Analyse requirements, \
                            then produce a complete, concrete deliverable for the task."
                .to_string(),
            model_id: String::new(),
            temperature: default_temperature(),
        }
    }
}

/// Escolhe o perfil para `role`.
pub fn select_agent(profiles: &[AgentProfile], role: &str, owner_id: &str) -> AgentProfile {
    profiles
        .iter()
        .find(|p| p.role.eq_ignore_ascii_case(role))
        .or_else(|| profiles.first())
        .cloned()
        .unwrap_or_else(|| AgentProfile::architect(owner_id))
}
