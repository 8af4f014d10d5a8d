//! # Módulo de Orçamentos da Task
//!
//! Define os tetos de recursos que uma Task pode consumir e o ponto
//! único de verificação usado antes de **cada** chamada de agente.
//!
//! ## Para todos entenderem:
//!
//! Imagine que você dá um cartão de crédito para um assistente fazer
//! compras. Você define três regras:
//! - Prazo: as compras precisam acabar em 90 minutos
//! - Quantidade: no máximo 80 compras
//! - Valor: no máximo 200 mil em tokens
//!
//! Antes de cada compra, o assistente confere as três regras.
//! Se qualquer uma estourou, ele para na hora, sem fazer a compra.
//!
//! ## Por que verificar ANTES da chamada?
//!
//! Os contadores vêm do banco de estado (a fonte de verdade), então o
//! estouro é detectado antes de gastar mais uma chamada, e a Task falha
//! com `LimitExceeded` carregando qual orçamento estourou.
//!
//! ## Limites configuráveis:
//!
//! | Limite                      | Padrão  | Variável de ambiente          |
//! |-----------------------------|---------|-------------------------------|
//! | wall clock                  | 90 min  | DROIDSWARM_WALL_CLOCK_SECS    |
//! | chamadas de API             | 80      | DROIDSWARM_MAX_API_CALLS      |
//! | tokens totais               | 200 000 | DROIDSWARM_MAX_TOKENS         |
//! | tentativas por step         | 3       | DROIDSWARM_MAX_STEP_RETRIES   |

use std::time::Duration;

use crate::errors::{LimitKind, SwarmError, SwarmResult};

// ============================================================================
// PADRÕES
// ============================================================================

/// Tempo máximo de parede de uma Task: 90 minutos.
pub const DEFAULT_WALL_CLOCK_SECS: u64 = 90 * 60;

/// Número máximo de chamadas de API por Task.
pub const DEFAULT_MAX_API_CALLS: u64 = 80;

/// Número máximo de tokens (prompt + completion) por Task.
pub const DEFAULT_MAX_TOTAL_TOKENS: u64 = 200_000;

/// Tentativas máximas por step (Coder + Critic).
pub const DEFAULT_MAX_STEP_RETRIES: u32 = 3;

/// Falhas transientes consecutivas antes do breaker disparar.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Rejeições consecutivas do Critic antes do breaker de feedback
/// disparar. Dobro do limite transiente: rejeições são mais baratas
/// que falhas de infraestrutura, então toleramos mais.
pub const FEEDBACK_LOOP_LIMIT: u32 = 2 * CONSECUTIVE_FAILURE_LIMIT;

/// Espaço livre mínimo em disco exigido no intake: 100 MB.
pub const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024;

// ============================================================================
// ORÇAMENTOS
// ============================================================================

/// Tetos de recursos de uma Task.
///
/// Todos os campos têm valores padrão seguros; `from_env` permite
/// ajustar sem recompilar.
#[derive(Debug, Clone)]
pub struct Budgets {
    /// Tempo máximo de parede desde o início da Task.
    pub wall_clock: Duration,

    /// Chamadas de API permitidas (`api_call_count` deve ficar abaixo).
    pub max_api_calls: u64,

    /// Tokens totais permitidos (`total_tokens` deve ficar abaixo).
    pub max_total_tokens: u64,

    /// Tentativas máximas por entrada no loop de step.
    pub max_step_retries: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(DEFAULT_WALL_CLOCK_SECS),
            max_api_calls: DEFAULT_MAX_API_CALLS,
            max_total_tokens: DEFAULT_MAX_TOTAL_TOKENS,
            max_step_retries: DEFAULT_MAX_STEP_RETRIES,
        }
    }
}

impl Budgets {
    /// Cria orçamentos a partir de variáveis de ambiente.
    pub fn from_env() -> Self {
        let mut budgets = Self::default();

        if let Ok(val) = std::env::var("DROIDSWARM_WALL_CLOCK_SECS") {
            if let Ok(n) = val.parse() {
                budgets.wall_clock = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("DROIDSWARM_MAX_API_CALLS") {
            if let Ok(n) = val.parse() {
                budgets.max_api_calls = n;
            }
        }

        if let Ok(val) = std::env::var("DROIDSWARM_MAX_TOKENS") {
            if let Ok(n) = val.parse() {
                budgets.max_total_tokens = n;
            }
        }

        if let Ok(val) = std::env::var("DROIDSWARM_MAX_STEP_RETRIES") {
            if let Ok(n) = val.parse() {
                budgets.max_step_retries = n;
            }
        }

        budgets
    }

    /// Verifica os três orçamentos de uma vez.
    ///
    /// `elapsed` é o tempo de parede desde o início da Task;
    /// `api_call_count` e `total_tokens` vêm dos contadores persistidos.
    /// O primeiro orçamento estourado vira o erro.
    pub fn check(&self, elapsed: Duration, api_call_count: u64, total_tokens: u64) -> SwarmResult<()> {
        if elapsed > self.wall_clock {
            return Err(SwarmError::limit_exceeded(
                LimitKind::WallClock,
                elapsed.as_secs(),
                self.wall_clock.as_secs(),
            ));
        }
        if api_call_count >= self.max_api_calls {
            return Err(SwarmError::limit_exceeded(
                LimitKind::ApiCalls,
                api_call_count,
                self.max_api_calls,
            ));
        }
        if total_tokens >= self.max_total_tokens {
            return Err(SwarmError::limit_exceeded(
                LimitKind::Tokens,
                total_tokens,
                self.max_total_tokens,
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let budgets = Budgets::default();
        assert_eq!(budgets.wall_clock, Duration::from_secs(5400));
        assert_eq!(budgets.max_api_calls, 80);
        assert_eq!(budgets.max_total_tokens, 200_000);
        assert_eq!(budgets.max_step_retries, 3);
    }

    #[test]
    fn test_check_within_budgets() {
        let budgets = Budgets::default();
        assert!(budgets.check(Duration::from_secs(60), 10, 50_000).is_ok());
    }

    #[test]
    fn test_wall_clock_breach() {
        let budgets = Budgets::default();
        let err = budgets
            .check(Duration::from_secs(5401), 0, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            SwarmError::LimitExceeded { limit: LimitKind::WallClock, .. }
        ));
    }

    #[test]
    fn test_api_call_breach_at_limit() {
        // O orçamento exige `api_call_count < max`: chegar em 80 já estoura.
        let budgets = Budgets::default();
        assert!(budgets.check(Duration::ZERO, 79, 0).is_ok());
        let err = budgets.check(Duration::ZERO, 80, 0).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::LimitExceeded { limit: LimitKind::ApiCalls, .. }
        ));
    }

    #[test]
    fn test_token_breach_at_limit() {
        let budgets = Budgets::default();
        assert!(budgets.check(Duration::ZERO, 0, 199_999).is_ok());
        let err = budgets.check(Duration::ZERO, 0, 200_000).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::LimitExceeded { limit: LimitKind::Tokens, .. }
        ));
        assert!(err.to_string().contains("Token limit"));
    }

    #[test]
    fn test_breaker_thresholds() {
        assert_eq!(CONSECUTIVE_FAILURE_LIMIT, 3);
        assert_eq!(FEEDBACK_LOOP_LIMIT, 6);
    }
}
