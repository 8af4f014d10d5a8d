//! # Cliente LLM - Requisições com Retry, Jitter e Circuit Breaker
//!
//! Este é o único caminho de saída para o provedor LLM. Todos os quatro
//! agentes passam por aqui, e é aqui que moram as políticas de rede:
//! rate limiting, prazo por requisição, classificação de erro, retry com
//! backoff e o breaker de taxa de erros.
//!
//! ## Fluxo de uma chamada:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           chat()                                  │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │ (por tentativa)
//!    ┌────────────────────────┼──────────────────────────────┐
//!    ▼                        ▼                              ▼
//! ┌──────────┐         ┌─────────────┐               ┌──────────────┐
//! │ 1. rate  │         │ 2. breaker  │               │ 3. HTTP POST │
//! │ limiter  │    →    │ de taxa de  │       →       │ com deadline │
//! │ acquire  │         │ erros       │               │ de 120s      │
//! └──────────┘         └─────────────┘               └──────────────┘
//!                                                           │
//!    ┌──────────────────────────────────────────────────────┘
//!    ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ 4. classifica o status │ 5. decide retry │ 6. extrai content     │
//! │    (transiente?)       │    com jitter   │    e usage            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Política de retry:
//!
//! | Falha               | Transiente | Política                        |
//! |---------------------|------------|---------------------------------|
//! | 429                 | sim        | backoff 1s, 2s, 4s (±25%)       |
//! | 500-599             | sim        | um único retry após ~5s         |
//! | timeout             | sim        | um único retry após ~5s         |
//! | rede/conexão        | sim        | um único retry após ~5s         |
//! | 400, 401, 403, 404… | não        | falha imediata                  |
//!
//! No máximo 3 tentativas no total. O jitter de ±25% evita que clientes
//! independentes sincronizem seus retries em cima de um servidor que já
//! está sofrendo.
//!
//! ## Breaker de taxa de erros:
//!
//! Janela deslizante de 60s com os instantes de erros "sérios"
//! (não-transientes ou 5xx). Com 5 ou mais na janela, novas chamadas
//! falham com `CircuitBreaker` antes de tocar a rede.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{SwarmError, SwarmResult};
use crate::protocol::AgentKind;
use crate::ratelimit::TokenBucket;

// ============================================================================
// CONSTANTES DA POLÍTICA
// ============================================================================

/// Tentativas máximas por chamada (incluindo a primeira).
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Backoff base por tentativa para 429, em segundos.
const RATE_LIMIT_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// Espera antes do único retry de 5xx/timeout/rede.
const SERVER_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Jitter uniforme aplicado a toda espera: ±25%.
const JITTER_RATIO: f64 = 0.25;

/// Piso de qualquer espera com jitter.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Janela do breaker de taxa de erros.
pub const API_ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Erros na janela que abrem o breaker.
pub const API_ERROR_RATE_LIMIT: usize = 5;

/// Teto de tokens de completion pedido ao provedor.
const MAX_COMPLETION_TOKENS: u32 = 4096;

// ============================================================================
// TIPOS DE TRANSPORTE
// ============================================================================

/// Um turno da conversa enviada ao modelo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Uso de tokens reportado pelo provedor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ChatUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Resposta crua do modelo: texto + uso.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: ChatUsage,
}

/// Contrato do transporte LLM.
///
/// O trait é a costura de teste do orquestrador: em produção a única
/// implementação é `LlmClient`; nos testes, um fake roteirizado devolve
/// respostas pré-programadas sem tocar a rede.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Uma rodada completa: mensagens → texto + uso.
    ///
    /// `agent` identifica quem chamou, apenas para observabilidade.
    async fn chat(&self, messages: &[ChatMessage], agent: AgentKind) -> SwarmResult<ChatResponse>;
}

// ============================================================================
// BREAKER DE TAXA DE ERROS
// ============================================================================

/// Janela deslizante de instantes de erros sérios.
struct ErrorRateWindow {
    window: Duration,
    limit: usize,
    samples: Mutex<VecDeque<Instant>>,
}

impl ErrorRateWindow {
    fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Remove amostras velhas e falha se a janela está cheia.
    fn check(&self) -> SwarmResult<()> {
        let mut samples = self.samples.lock().expect("error window lock poisoned");
        let cutoff = Instant::now() - self.window;
        while samples.front().is_some_and(|t| *t < cutoff) {
            samples.pop_front();
        }
        if samples.len() >= self.limit {
            return Err(SwarmError::CircuitBreaker(format!(
                "API error rate limit: {} errors in the last {}s",
                samples.len(),
                self.window.as_secs()
            )));
        }
        Ok(())
    }

    /// Registra um erro sério agora.
    fn record(&self) {
        let mut samples = self.samples.lock().expect("error window lock poisoned");
        samples.push_back(Instant::now());
    }
}

// ============================================================================
// CLASSIFICAÇÃO DE STATUS
// ============================================================================

/// Um status HTTP não-2xx é transiente? (tabela da política acima)
fn status_is_transient(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Erros sérios (para o breaker): não-transientes ou 5xx.
/// 429 e timeout ficam de fora: são pressão, não quebra.
fn counts_toward_error_rate(err: &SwarmError) -> bool {
    match err {
        SwarmError::Api { status, transient, .. } => !transient || (500..=599).contains(status),
        _ => false,
    }
}

// ============================================================================
// JITTER
// ============================================================================

/// Aplica jitter uniforme de ±25% e o piso de 100ms.
fn jittered(base: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
    let delayed = Duration::from_secs_f64(base.as_secs_f64() * factor);
    delayed.max(MIN_RETRY_DELAY)
}

// ============================================================================
// PARSE DO ENVELOPE
// ============================================================================

/// Extrai `content` e `usage` do envelope chat-completions.
fn parse_chat_response(body: &serde_json::Value) -> SwarmResult<ChatResponse> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let Some(content) = content else {
        return Err(SwarmError::Api {
            status: 200,
            message: "provider returned no completion content".into(),
            transient: false,
        });
    };

    let usage = body.get("usage");
    let prompt_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(ChatResponse {
        content,
        usage: ChatUsage { prompt_tokens, completion_tokens },
    })
}

/// Mensagem de erro do provedor, quando o corpo traz uma.
fn extract_provider_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.len() > 200 {
                format!("{}...", &trimmed[..200])
            } else {
                trimmed.to_string()
            }
        })
}

// ============================================================================
// CLIENTE
// ============================================================================

/// Cliente HTTP único do processo.
///
/// Reusa a mesma conexão (pool do reqwest) e serializa o ritmo pelo
/// token bucket. Criado uma vez no intake e compartilhado pelos agentes.
pub struct LlmClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
    limiter: TokenBucket,
    error_window: ErrorRateWindow,
}

impl LlmClient {
    pub fn new(settings: &Settings, limiter: TokenBucket) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            request_timeout: settings.request_timeout,
            limiter,
            error_window: ErrorRateWindow::new(API_ERROR_RATE_WINDOW, API_ERROR_RATE_LIMIT),
        }
    }

    /// Uma tentativa: rate limiter → breaker → POST → classificação.
    async fn single_attempt(
        &self,
        messages: &[ChatMessage],
        agent: AgentKind,
    ) -> SwarmResult<ChatResponse> {
        self.limiter.acquire().await;
        self.error_window.check()?;

        let wire_messages: Vec<_> = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let body = json!({
            "model": self.model,
            "messages": wire_messages,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": 0.2,
            "top_p": 0.95,
            "stream": false,
        });

        let request = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        // O deadline cobre o envio E a leitura do corpo: uma resposta que
        // começa a chegar mas trava no meio também conta como timeout.
        let result = tokio::time::timeout(self.request_timeout, async {
            let response = request.await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok::<(u16, String), reqwest::Error>((status, text))
        })
        .await;

        let (status, text) = match result {
            Err(_) => {
                return Err(SwarmError::Timeout {
                    seconds: self.request_timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                // Falha de rede/conexão sem resposta HTTP.
                return Err(SwarmError::Api {
                    status: 0,
                    message: e.to_string(),
                    transient: true,
                });
            }
            Ok(Ok(pair)) => pair,
        };

        if !(200..=299).contains(&status) {
            return Err(SwarmError::Api {
                status,
                message: extract_provider_error(&text),
                transient: status_is_transient(status),
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            SwarmError::Api {
                status,
                message: format!("provider returned invalid JSON: {}", e),
                transient: false,
            }
        })?;

        let response = parse_chat_response(&parsed)?;
        debug!(
            agent = %agent,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "LLM call finished"
        );
        Ok(response)
    }
}

#[async_trait]
impl ChatApi for LlmClient {
    #[tracing::instrument(
        name = "llm_chat",
        skip_all,
        fields(agent = %agent, attempts = tracing::field::Empty)
    )]
    async fn chat(&self, messages: &[ChatMessage], agent: AgentKind) -> SwarmResult<ChatResponse> {
        let span = tracing::Span::current();
        let mut server_retry_used = false;

        for attempt in 1..=MAX_RATE_LIMIT_RETRIES {
            match self.single_attempt(messages, agent).await {
                Ok(response) => {
                    span.record("attempts", attempt);
                    if attempt > 1 {
                        info!(agent = %agent, attempt, "Retry bem sucedido");
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if counts_toward_error_rate(&err) {
                        self.error_window.record();
                    }

                    let retries_remain = attempt < MAX_RATE_LIMIT_RETRIES;
                    let delay = match &err {
                        // 429: backoff progressivo enquanto houver tentativas.
                        SwarmError::Api { status: 429, .. } if retries_remain => {
                            let base = RATE_LIMIT_DELAYS_SECS
                                [(attempt as usize - 1).min(RATE_LIMIT_DELAYS_SECS.len() - 1)];
                            Some(jittered(Duration::from_secs(base)))
                        }
                        // 5xx / timeout / rede: um único retry no total.
                        SwarmError::Api { transient: true, .. } | SwarmError::Timeout { .. }
                            if retries_remain && !server_retry_used =>
                        {
                            server_retry_used = true;
                            Some(jittered(SERVER_ERROR_DELAY))
                        }
                        _ => None,
                    };

                    match delay {
                        Some(delay) => {
                            warn!(
                                agent = %agent,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Tentativa falhou, aguardando retry"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            span.record("attempts", attempt);
                            return Err(err);
                        }
                    }
                }
            }
        }

        // O loop acima sempre retorna na última tentativa; chegar aqui
        // é um erro de lógica.
        Err(SwarmError::Internal("retry loop exhausted without a result".into()))
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================================================
    // Classificação de status
    // ========================================================================

    #[test]
    fn test_status_classification() {
        assert!(status_is_transient(429));
        assert!(status_is_transient(500));
        assert!(status_is_transient(503));
        assert!(status_is_transient(599));

        assert!(!status_is_transient(400));
        assert!(!status_is_transient(401));
        assert!(!status_is_transient(403));
        assert!(!status_is_transient(404));
        assert!(!status_is_transient(418));
    }

    #[test]
    fn test_error_rate_counting() {
        // 5xx conta; 429 e timeout não; 4xx conta.
        let server = SwarmError::Api { status: 503, message: "".into(), transient: true };
        assert!(counts_toward_error_rate(&server));

        let rate = SwarmError::Api { status: 429, message: "".into(), transient: true };
        assert!(!counts_toward_error_rate(&rate));

        let auth = SwarmError::Api { status: 401, message: "".into(), transient: false };
        assert!(counts_toward_error_rate(&auth));

        assert!(!counts_toward_error_rate(&SwarmError::Timeout { seconds: 120 }));
    }

    // ========================================================================
    // Jitter
    // ========================================================================

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..200 {
            let delay = jittered(base);
            assert!(delay >= Duration::from_secs_f64(3.0), "jitter abaixo de -25%: {:?}", delay);
            assert!(delay <= Duration::from_secs_f64(5.0), "jitter acima de +25%: {:?}", delay);
        }
    }

    #[test]
    fn test_jitter_clamps_to_minimum() {
        let tiny = Duration::from_millis(10);
        for _ in 0..50 {
            assert!(jittered(tiny) >= MIN_RETRY_DELAY);
        }
    }

    // ========================================================================
    // Janela de erros
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_error_window_trips_at_limit() {
        let window = ErrorRateWindow::new(Duration::from_secs(60), 5);
        for _ in 0..4 {
            window.record();
        }
        assert!(window.check().is_ok());

        window.record();
        let err = window.check().unwrap_err();
        assert!(matches!(err, SwarmError::CircuitBreaker(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_window_expires_old_samples() {
        let window = ErrorRateWindow::new(Duration::from_secs(60), 5);
        for _ in 0..5 {
            window.record();
        }
        assert!(window.check().is_err());

        // Depois da janela, as amostras caducam e o breaker fecha.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(window.check().is_ok());
    }

    // ========================================================================
    // Parse do envelope
    // ========================================================================

    #[test]
    fn test_parse_chat_response() {
        let body = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hello" } }
            ],
            "usage": { "prompt_tokens": 12, "completion_tokens": 34 }
        });
        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.completion_tokens, 34);
        assert_eq!(response.usage.total(), 46);
    }

    #[test]
    fn test_parse_missing_usage_defaults_to_zero() {
        let body = json!({
            "choices": [ { "message": { "content": "ok" } } ]
        });
        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.usage, ChatUsage::default());
    }

    #[test]
    fn test_parse_missing_content_is_error() {
        let body = json!({ "choices": [] });
        let err = parse_chat_response(&body).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_extract_provider_error() {
        let body = r#"{"error":{"message":"model not found","code":404}}"#;
        assert_eq!(extract_provider_error(body), "model not found");

        // Corpo não-JSON vira mensagem truncada.
        let plain = "x".repeat(500);
        let message = extract_provider_error(&plain);
        assert!(message.len() <= 203);
        assert!(message.ends_with("..."));
    }
}
