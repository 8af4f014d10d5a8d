//! # Módulo de Erros Estruturados
//!
//! Define a taxonomia fechada de falhas do orquestrador.
//!
//! ## Para todos entenderem:
//!
//! Quando algo dá errado, a primeira pergunta é sempre a mesma:
//! **vale a pena tentar de novo?**
//!
//! - Rede caiu, servidor devolveu 503, requisição estourou o prazo →
//!   falha *transiente*, tentar de novo pode funcionar.
//! - Spec inválida, caminho fora do workspace, orçamento estourado →
//!   falha *definitiva*, tentar de novo só desperdiça tokens.
//!
//! Cada variante carrega essa resposta consigo, e o orquestrador e o
//! cliente LLM consultam `is_transient()` em todo ponto de decisão.
//!
//! ## Categorias:
//!
//! | Variante         | Transiente | Origem                | Exit code |
//! |------------------|------------|-----------------------|-----------|
//! | Validation       | não        | validadores, caminhos | 1         |
//! | Api              | depende    | cliente LLM           | 2         |
//! | Timeout          | sim        | cliente LLM           | 2         |
//! | LimitExceeded    | não        | orçamentos da Task    | 2         |
//! | CircuitBreaker   | não        | os três breakers      | 2         |
//! | Aborted          | não        | sinal ou CLI          | 2         |
//! | Verification     | não        | modo estrito          | 3         |
//! | Internal         | não*       | I/O, banco, inesperado| 4         |
//!
//! (*) Para `Internal`, `is_transient` inspeciona a mensagem em busca de
//! indícios de erro de rede, porque nem toda biblioteca classifica.

use std::fmt;
use thiserror::Error;

// ============================================================================
// TIPO DE LIMITE
// ============================================================================

/// Qual orçamento da Task foi estourado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    WallClock,
    ApiCalls,
    Tokens,
}

impl LimitKind {
    /// Etiqueta persistida em logs e mensagens.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WallClock => "wall_clock",
            Self::ApiCalls => "api_calls",
            Self::Tokens => "tokens",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TAXONOMIA DE ERROS
// ============================================================================

/// Conjunto fechado de erros do orquestrador.
///
/// O atributo `#[error(...)]` define a mensagem curta exibida ao usuário
/// e persistida em `Task.error_message`.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Entrada ou caminho viola um contrato declarado.
    /// Sempre fatal: o downstream não tem como se recuperar.
    #[error("{0}")]
    Validation(String),

    /// O provedor LLM devolveu não-2xx ou a conexão falhou.
    ///
    /// `status == 0` indica falha de rede/conexão sem resposta HTTP.
    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        transient: bool,
    },

    /// O prazo por requisição expirou antes da resposta chegar.
    #[error("API request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Um orçamento da Task foi estourado. Carrega qual.
    #[error("{message}")]
    LimitExceeded { limit: LimitKind, message: String },

    /// Um dos três circuit breakers disparou.
    #[error("{0}")]
    CircuitBreaker(String),

    /// Aborto manual via sinal (INT/TERM) ou CLI, ou arquivo de
    /// parada de emergência presente.
    #[error("{0}")]
    Aborted(String),

    /// Verificação estrita reprovou o projeto final.
    #[error("{0}")]
    Verification(String),

    /// Falha inesperada de I/O, banco ou serialização.
    #[error("{0}")]
    Internal(String),
}

impl SwarmError {
    /// Constrói o erro canônico de estouro de orçamento.
    pub fn limit_exceeded(limit: LimitKind, used: u64, max: u64) -> Self {
        let message = match limit {
            LimitKind::WallClock => {
                format!("Wall clock limit exceeded: {}s elapsed of {}s allowed", used, max)
            }
            LimitKind::ApiCalls => {
                format!("API call limit exceeded: {} calls of {} allowed", used, max)
            }
            LimitKind::Tokens => {
                format!("Token limit exceeded: {} tokens of {} allowed", used, max)
            }
        };
        Self::LimitExceeded { limit, message }
    }

    /// Erro de aborto manual (sinal INT/TERM ou comando `abort`).
    pub fn manual_abort() -> Self {
        Self::Aborted("Manual abort requested".to_string())
    }

    /// Indica se vale a pena tentar de novo.
    ///
    /// Variantes classificadas carregam a resposta; `Internal` cai na
    /// heurística de substrings porque erros de I/O crus não vêm
    /// etiquetados.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            Self::Validation(_)
            | Self::LimitExceeded { .. }
            | Self::CircuitBreaker(_)
            | Self::Aborted(_)
            | Self::Verification(_) => false,
            Self::Internal(message) => looks_like_network_error(message),
        }
    }

    /// Mapeia a variante para o exit code do processo.
    ///
    /// 0 = sucesso; 1 = validação; 2 = API/timeout/orçamento/breaker/
    /// aborto; 3 = verificação estrita; 4 = inesperado.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::Api { .. }
            | Self::Timeout { .. }
            | Self::LimitExceeded { .. }
            | Self::CircuitBreaker(_)
            | Self::Aborted(_) => 2,
            Self::Verification(_) => 3,
            Self::Internal(_) => 4,
        }
    }
}

/// Heurística para erros não classificados: procura indícios comuns de
/// falha de rede na mensagem.
fn looks_like_network_error(message: &str) -> bool {
    const HINTS: &[&str] = &[
        "connection refused",
        "connection reset",
        "broken pipe",
        "network",
        "timed out",
        "temporarily unavailable",
        "dns error",
    ];
    let lowered = message.to_lowercase();
    HINTS.iter().any(|hint| lowered.contains(hint))
}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for SwarmError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(format!("state store error: {}", err))
    }
}

/// Atalho para resultados do orquestrador.
pub type SwarmResult<T> = Result<T, SwarmError>;

// ============================================================================
// TESTES
// ============================================================================
