//! Tipos de erro para o cliente da API Gemini.
//!
//! Define [`LlmError`] com variantes para rate limiting, erros da API
//! e erros de rede. Usa `thiserror` para derivar `Display` e `Error`.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API Gemini.
///
/// - [`RateLimited`](LlmError::RateLimited) — HTTP 429 ou status `RESOURCE_EXHAUSTED`
/// - [`ApiError`](LlmError::ApiError) — qualquer outro erro HTTP (4xx/5xx)
/// - [`NetworkError`](LlmError::NetworkError) — falha na camada de rede
#[derive(Debug, Error)]
pub enum LlmError {
    /// Cota esgotada. `retry_after_ms` vem do cabeçalho `retry-after`, quando presente.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },

    /// Erro retornado pela API (ex.: 400 argumento inválido, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout do reqwest).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl LlmError {
    /// Indica se o provedor pediu para recuar (cota esgotada).
    ///
    /// Além da variante tipada, alguns proxies transformam o 429 num erro
    /// genérico em que só o texto carrega o sinal.
    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, message } => {
                *status == 429 || mentions_quota(message)
            }
            LlmError::NetworkError(e) => {
                e.status().is_some_and(|s| s.as_u16() == 429) || mentions_quota(&e.to_string())
            }
        }
    }

    /// Espera sugerida pelo servidor, quando enviada.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

fn mentions_quota(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("429") || lower.contains("quota") || lower.contains("resource_exhausted")
}
