//! # Heartbeat - Sinal de Vida para Observadores
//!
//! Enquanto uma Task está ativa, uma tarefa de fundo escreve
//! `{"task_id": ..., "timestamp": ...}` num arquivo fixo a cada 30s.
//!
//! É a única concorrência do processo além dos handlers de sinal, e é
//! isolada de propósito: não lê nem escreve nada do orquestrador, só o
//! próprio arquivo. Observadores externos (UI, scripts de monitoração)
//! usam o timestamp para saber se o orquestrador está vivo.

use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Intervalo padrão entre batidas.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Tarefa de fundo do heartbeat. `stop()` cancela na hora.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Começa a bater: escreve imediatamente e depois a cada intervalo.
    pub fn spawn(path: PathBuf, task_id: String, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                write_beat(&path, &task_id);
            }
        });
        Self { handle }
    }

    /// Para o heartbeat. Chamado no escopo de saída garantida da Task.
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Uma batida. Falha de escrita é logada e ignorada: o heartbeat nunca
/// derruba a Task que ele observa.
fn write_beat(path: &std::path::Path, task_id: &str) {
    let beat = json!({
        "task_id": task_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if let Err(e) = std::fs::write(path, beat.to_string()) {
        warn!(error = %e, path = %path.display(), "Falha ao escrever heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_beat_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");

        let heartbeat = Heartbeat::spawn(path.clone(), "task-1".into(), HEARTBEAT_INTERVAL);
        // Cede o runtime para a primeira batida acontecer.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let beat: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(beat["task_id"], "task-1");
        assert!(beat["timestamp"].is_string());

        heartbeat.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_keep_coming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");

        let heartbeat = Heartbeat::spawn(path.clone(), "task-1".into(), Duration::from_secs(30));
        tokio::task::yield_now().await;
        let first = std::fs::read_to_string(&path).unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        let second = std::fs::read_to_string(&path).unwrap();

        // O timestamp muda entre batidas (relógio de parede real, então
        // comparamos apenas que ambos são válidos e o arquivo foi reescrito).
        assert!(serde_json::from_str::<serde_json::Value>(&first).is_ok());
        assert!(serde_json::from_str::<serde_json::Value>(&second).is_ok());

        heartbeat.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_beats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");

        let heartbeat = Heartbeat::spawn(path.clone(), "task-1".into(), Duration::from_secs(30));
        tokio::task::yield_now().await;
        heartbeat.stop();

        std::fs::remove_file(&path).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(!path.exists());
    }
}
