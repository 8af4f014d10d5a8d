//! # Módulo de PID - Exclusão de Instância Única
//!
//! Garante no máximo uma Task ativa por raiz de estado, usando um
//! arquivo de PID com detecção de PID morto.
//!
//! ## Protocolo:
//!
//! 1. Arquivo existe? Lê o PID gravado.
//!    - Processo vivo (teste com sinal 0) → rejeita com
//!      `Another task is running (PID n)`.
//!    - Processo morto ou conteúdo ilegível → remove o arquivo em
//!      silêncio e segue (um crash anterior deixou lixo para trás).
//! 2. Grava o próprio PID.
//! 3. Na saída (qualquer caminho), remove o arquivo **apenas se ele
//!    ainda contém o próprio PID** — outra instância pode tê-lo tomado
//!    entre um crash nosso e a limpeza.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{SwarmError, SwarmResult};

/// Posse do arquivo de PID durante uma Task.
///
/// `release` é idempotente e também roda no `Drop`, para o arquivo não
/// sobreviver a um unwind inesperado.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    own_pid: u32,
    held: bool,
}

impl PidLock {
    /// Adquire a exclusão, limpando PID morto se houver.
    pub fn acquire(path: &Path) -> SwarmResult<Self> {
        if let Some(existing) = read_pid(path) {
            if pid_alive(existing) {
                return Err(SwarmError::Validation(format!(
                    "Another task is running (PID {})",
                    existing
                )));
            }
            debug!(pid = existing, "PID morto no arquivo, removendo");
            let _ = std::fs::remove_file(path);
        } else if path.exists() {
            // Conteúdo ilegível: trata como lixo de um crash anterior.
            debug!(path = %path.display(), "Arquivo de PID ilegível, removendo");
            let _ = std::fs::remove_file(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let own_pid = std::process::id();
        std::fs::write(path, format!("{}\n", own_pid))?;
        info!(pid = own_pid, path = %path.display(), "Exclusão de instância adquirida");

        Ok(Self {
            path: path.to_path_buf(),
            own_pid,
            held: true,
        })
    }

    /// Solta a exclusão se o arquivo ainda é nosso.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;

        match read_pid(&self.path) {
            Some(pid) if pid == self.own_pid as i32 => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(error = %e, "Falha ao remover arquivo de PID");
                }
            }
            Some(other) => {
                warn!(pid = other, "Arquivo de PID pertence a outro processo, mantendo");
            }
            None => {}
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lê o PID gravado no arquivo, se existir e for um número.
pub fn read_pid(path: &Path) -> Option<i32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

/// O processo existe? Sinal 0 não entrega nada, só testa a existência.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Envia TERM para o processo dono da Task ativa (comando `abort`).
pub fn send_term(pid: i32) -> SwarmResult<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| {
        SwarmError::Internal(format!("falha ao sinalizar PID {}: {}", pid, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");

        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");

        let mut lock = PidLock::acquire(&path).unwrap();
        lock.release();
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_live_pid_rejects_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");

        // O próprio processo de teste está vivo, então o arquivo com o
        // nosso PID representa uma instância ativa.
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let err = PidLock::acquire(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Another task is running"));
        assert!(message.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_stale_pid_is_cleaned_silently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");

        // PID fora do intervalo de qualquer pid_max plausível.
        std::fs::write(&path, "2000000000\n").unwrap();

        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
        drop(lock);
    }

    #[test]
    fn test_garbage_content_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");
        std::fs::write(&path, "not-a-pid\n").unwrap();

        let _lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
    }

    #[test]
    fn test_release_keeps_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.pid");

        let mut lock = PidLock::acquire(&path).unwrap();
        // Outra instância "tomou" o arquivo no meio do caminho.
        std::fs::write(&path, "424242\n").unwrap();
        lock.release();
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pid_alive_rejects_nonpositive() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
        assert!(pid_alive(std::process::id() as i32));
    }
}
