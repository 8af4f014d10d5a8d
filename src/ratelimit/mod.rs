//! # Módulo de Rate Limiting - Token Bucket
//!
//! Controla o ritmo das chamadas ao provedor LLM com um balde de tokens.
//!
//! ## Para todos entenderem:
//!
//! Imagine um balde que pinga uma ficha a cada dois segundos e comporta
//! no máximo cinco fichas. Cada chamada de API custa uma ficha:
//! - Tem ficha no balde? Pega uma e segue na hora.
//! - Balde vazio? Espera o próximo pingo e tenta de novo.
//!
//! O "burst" é o tamanho do balde: permite rajadas curtas sem esperar,
//! desde que o ritmo médio fique dentro do combinado.
//!
//! ## Garantia:
//!
//! `acquire()` nunca falha: no pior caso, dorme até a próxima ficha.
//! O relógio é monotônico, então relógio de parede ajustado no meio da
//! execução não quebra a contabilidade.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Ritmo padrão: 30 requisições por minuto.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

/// Rajada padrão: 5 fichas.
pub const DEFAULT_BURST: u32 = 5;

/// Estado mutável do balde, protegido por mutex.
///
/// O lock nunca é mantido através de um `.await`: calculamos quanto
/// esperar, soltamos o lock e só então dormimos.
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket com reabastecimento proporcional ao tempo decorrido.
pub struct TokenBucket {
    /// Fichas adicionadas por `interval`.
    tokens_per_interval: u32,

    /// Janela de reabastecimento.
    interval: Duration,

    /// Capacidade máxima do balde. Começa cheio.
    burst: u32,

    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Cria um balde cheio com o ritmo e a rajada informados.
    pub fn new(tokens_per_interval: u32, interval: Duration, burst: u32) -> Self {
        let tokens_per_interval = tokens_per_interval.max(1);
        let burst = burst.max(1);
        Self {
            tokens_per_interval,
            interval,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Cria um balde a partir das variáveis de ambiente.
    ///
    /// - `DROIDSWARM_RATE_LIMIT_RPM`: requisições por minuto (padrão 30)
    /// - `DROIDSWARM_RATE_LIMIT_BURST`: tamanho da rajada (padrão 5)
    pub fn from_env() -> Self {
        let rpm = std::env::var("DROIDSWARM_RATE_LIMIT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);
        let burst = std::env::var("DROIDSWARM_RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BURST);
        Self::new(rpm, Duration::from_secs(60), burst)
    }

    /// Consome uma ficha, dormindo o necessário até ela existir.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                // Tempo mínimo até uma ficha inteira existir.
                let missing = 1.0 - state.tokens;
                let per_token =
                    self.interval.as_secs_f64() / self.tokens_per_interval as f64;
                Duration::from_secs_f64(missing * per_token)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Reabastece proporcionalmente ao tempo decorrido, limitado ao burst.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let earned = elapsed.as_secs_f64() * self.tokens_per_interval as f64
            / self.interval.as_secs_f64();
        if earned > 0.0 {
            state.tokens = (state.tokens + earned).min(self.burst as f64);
            state.last_refill = now;
        }
    }

    /// Fichas disponíveis agora (apenas para testes e observação).
    #[cfg(test)]
    fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        self.refill(&mut state);
        state.tokens
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(60, Duration::from_secs(60), 3);
        assert_eq!(bucket.available(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let bucket = TokenBucket::new(60, Duration::from_secs(60), 3);
        let start = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        bucket.acquire().await;
        // Três fichas da rajada inicial: nenhuma espera.
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_bucket_waits_for_refill() {
        // 60 por minuto = uma ficha por segundo.
        let bucket = TokenBucket::new(60, Duration::from_secs(60), 1);
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(990) && waited <= Duration::from_millis(1100),
            "esperava ~1s, esperou {:?}",
            waited
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_burst() {
        let bucket = TokenBucket::new(60, Duration::from_secs(60), 2);
        bucket.acquire().await;
        bucket.acquire().await;

        // Muito tempo parado não acumula além do burst.
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(bucket.available(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_eventually_returns() {
        let bucket = TokenBucket::new(6, Duration::from_secs(60), 1);
        // Esvazia e pede mais três: cada uma leva ~10s de relógio virtual.
        bucket.acquire().await;
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(29));
    }

    #[test]
    fn test_zero_configs_are_clamped() {
        let bucket = TokenBucket::new(0, Duration::from_secs(60), 0);
        assert_eq!(bucket.tokens_per_interval, 1);
        assert_eq!(bucket.burst, 1);
    }
}
