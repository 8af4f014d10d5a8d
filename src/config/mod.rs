// Module: Config
// Process-wide settings resolved from the environment, plus the layout
// of the state root on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{SwarmError, SwarmResult};

/// Prazo padrão por requisição ao provedor LLM.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Endpoint padrão (formato chat-completions).
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Modelo padrão quando `DROIDSWARM_MODEL` não está definido.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuração do processo, montada uma vez no início.
///
/// Tudo vem de variáveis de ambiente com defaults seguros; só a chave
/// de API é obrigatória.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Chave de API do provedor LLM (`DROIDSWARM_API_KEY`, obrigatória).
    pub api_key: String,

    /// Endpoint de chat completions (`DROIDSWARM_API_URL`).
    pub api_url: String,

    /// Identificador do modelo (`DROIDSWARM_MODEL`).
    pub model: String,

    /// Prazo por requisição (`DROIDSWARM_API_TIMEOUT_SECS`).
    pub request_timeout: Duration,

    /// Raiz de estado (`DROIDSWARM_HOME`, padrão `~/.droidswarm`).
    pub home: PathBuf,

    /// Raiz dos workspaces (`DROIDSWARM_WORKSPACES`, padrão
    /// `<home>/workspaces`).
    pub workspaces_root: PathBuf,

    /// Modo debug (`DROIDSWARM_DEBUG`): logs mais verbosos.
    pub debug: bool,
}

/// Raiz de estado, resolvida sem exigir a chave de API.
///
/// Os comandos `abort` e `cleanup` só precisam dos caminhos, então a
/// resolução da raiz fica separada de `Settings::from_env`.
pub fn state_home_from_env() -> PathBuf {
    std::env::var("DROIDSWARM_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_home())
}

/// Raiz dos workspaces, com o mesmo critério.
pub fn workspaces_root_from_env(home: &Path) -> PathBuf {
    std::env::var("DROIDSWARM_WORKSPACES")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join("workspaces"))
}

impl Settings {
    /// Resolve a configuração a partir do ambiente.
    ///
    /// Falha apenas quando `DROIDSWARM_API_KEY` está ausente ou vazia.
    pub fn from_env() -> SwarmResult<Self> {
        let api_key = std::env::var("DROIDSWARM_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                SwarmError::Validation(
                    "variável DROIDSWARM_API_KEY ausente: defina a chave do provedor LLM".into(),
                )
            })?;

        let api_url = std::env::var("DROIDSWARM_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let model = std::env::var("DROIDSWARM_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let request_timeout = std::env::var("DROIDSWARM_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let home = state_home_from_env();
        let workspaces_root = workspaces_root_from_env(&home);

        let debug = std::env::var("DROIDSWARM_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            api_key,
            api_url,
            model,
            request_timeout,
            home,
            workspaces_root,
            debug,
        })
    }

    /// Banco de estado embutido.
    pub fn db_path(&self) -> PathBuf {
        self.home.join("state.db")
    }

    /// Arquivo de PID para exclusão de instância única.
    pub fn pid_path(&self) -> PathBuf {
        self.home.join("orchestrator.pid")
    }

    /// Arquivo de heartbeat escrito a cada 30 segundos.
    pub fn heartbeat_path(&self) -> PathBuf {
        self.home.join("heartbeat.json")
    }

    /// Diretório de logs (um arquivo por dia, mantido por observadores).
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Sentinela de parada de emergência dentro da raiz de workspaces.
    /// A presença do arquivo aborta a Task na próxima verificação.
    pub fn emergency_stop_path(&self) -> PathBuf {
        self.workspaces_root.join("EMERGENCY_STOP")
    }

    /// Workspace de uma Task específica.
    pub fn workspace_dir(&self, task_id: &str) -> PathBuf {
        self.workspaces_root.join(task_id)
    }
}

fn default_home() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => Path::new(&home).join(".droidswarm"),
        Err(_) => PathBuf::from(".droidswarm"),
    }
}
