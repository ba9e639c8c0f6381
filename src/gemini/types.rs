//! Tipos de dados para requisições e respostas do endpoint `generateContent`.
//!
//! Todas as structs usam `camelCase` no JSON, conforme o formato da API Gemini.
//! O modelo não faz parte do corpo: ele é codificado na URL pelo cliente.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Modelo alvo (ex.: "gemini-2.5-flash"). Vai na URL, não no corpo.
    #[serde(skip)]
    pub model: String,
    /// Turnos da conversa; normalmente um único turno do usuário.
    pub contents: Vec<Content>,
    /// Instrução de sistema opcional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Parâmetros de geração opcionais.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    /// Requisição de um único turno do usuário.
    pub fn user_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            contents: vec![Content::user(prompt)],
            system_instruction: None,
            generation_config: None,
        }
    }

    /// Define a instrução de sistema.
    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(Content {
            role: None,
            parts: vec![Part {
                text: instruction.into(),
            }],
        });
        self
    }

    /// Pede ao modelo uma resposta estritamente em JSON.
    pub fn expect_json(mut self) -> Self {
        let config = self.generation_config.get_or_insert_with(GenerationConfig::default);
        config.response_mime_type = Some("application/json".to_string());
        self
    }

    /// Define a temperatura de amostragem.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        let config = self.generation_config.get_or_insert_with(GenerationConfig::default);
        config.temperature = Some(temperature);
        self
    }
}

/// Um turno da conversa, composto por partes textuais.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// Papel do remetente: "user" ou "model". Ausente em instruções de sistema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Partes textuais do turno.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

/// Parâmetros de geração.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Resposta do endpoint `generateContent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    /// Candidatos gerados; a API normalmente devolve apenas um.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Estatísticas de uso de tokens.
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    /// Versão do modelo que respondeu.
    #[serde(default)]
    pub model_version: Option<String>,
}

impl GenerateContentResponse {
    /// Texto concatenado do primeiro candidato, sem espaços nas pontas.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    /// Motivo da parada (ex.: "STOP", "MAX_TOKENS", "SAFETY").
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

/// Envelope de erro devolvido pela API (`{"error": {...}}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    /// Status textual, ex.: "RESOURCE_EXHAUSTED", "INVALID_ARGUMENT".
    #[serde(default)]
    pub status: String,
}
