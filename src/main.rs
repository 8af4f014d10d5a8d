//! # droidswarm - Orquestrador de Geração de Apps Android
//!
//! Este é o **ponto de entrada** do droidswarm, o orquestrador que
//! transforma uma especificação declarativa de app em uma árvore de
//! arquivos gerados, coordenando quatro agentes LLM (Planner, Coder,
//! Critic, Verifier) sob orçamentos duros de tempo, chamadas e tokens.
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa a CLI** (`clap`): `agent`, `abort`, `cleanup`
//! 2. **Inicializa a telemetria** (tracing + OTEL opcional)
//! 3. **Monta a pilha**: banco de estado, rate limiter, cliente LLM
//! 4. **Roda a Task** pelo orquestrador
//! 5. **Mapeia o resultado** para o exit code do processo
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! # Gerar um app
//! droidswarm agent --message 'build app: {"app_name":"TodoApp",...}'
//!
//! # Abortar a Task ativa
//! droidswarm abort --task-id 550e8400-e29b-41d4-a716-446655440000
//!
//! # Limpar workspaces com mais de 7 dias
//! droidswarm cleanup --older-than 7 --failed-only
//! ```
//!
//! ## Exit codes:
//!
//! | Código | Significado                                  |
//! |--------|----------------------------------------------|
//! | 0      | sucesso (inclui COMPLETED_WITH_WARNINGS)     |
//! | 1      | erro de validação                            |
//! | 2      | API / timeout / orçamento / circuit breaker  |
//! | 3      | verificação estrita reprovou                 |
//! | 4      | erro inesperado                              |

// ============================================================================
// DECLARAÇÃO DE MÓDULOS
// ============================================================================

/// Os quatro agentes LLM (Planner, Coder, Critic, Verifier).
mod agents;

/// Cliente LLM: retry, jitter, deadline, breaker de taxa de erros.
mod client;

/// Configuração do processo a partir do ambiente.
mod config;

/// Taxonomia fechada de erros e mapeamento para exit codes.
mod errors;

/// Orçamentos de Task (tempo, chamadas, tokens) e limiares dos breakers.
mod limits;

/// Máquina de estados da Task, loop de steps, heartbeat, sinais.
mod orchestrator;

/// Confinamento de caminhos dentro do workspace.
mod paths;

/// Exclusão de instância única via arquivo de PID.
mod pidfile;

/// Estruturas de dados do protocolo entre agentes e orquestrador.
mod protocol;

/// Token bucket para o ritmo das chamadas de API.
mod ratelimit;

/// Banco de estado (SQLite) e escrita atômica de arquivos.
mod store;

/// Logging estruturado e exportação OTEL opcional.
mod telemetry;

/// Validação de TaskSpec e Plan.
mod validation;

// ============================================================================
// IMPORTS
// ============================================================================

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, Level};

use config::Settings;
use errors::SwarmError;
use orchestrator::{Orchestrator, OrchestratorConfig};
use protocol::{TaskSpec, TaskState};
use store::StateStore;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

/// Prefixo obrigatório da mensagem do comando `agent`.
const BUILD_PREFIX: &str = "build app:";

// ============================================================================
// CLI
// ============================================================================

/// Orquestrador multi-agente para geração de projetos Android.
#[derive(Parser)]
#[command(name = "droidswarm")]
#[command(about = "Multi-agent Android project generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roda uma Task: planeja, gera, revisa e verifica um projeto.
    Agent {
        /// Mensagem no formato `build app: <JSON do TaskSpec>`.
        #[arg(short, long)]
        message: String,

        /// Nota do Verifier abaixo de 0.5 falha a Task em vez de
        /// completar com avisos.
        #[arg(long, default_value = "false")]
        strict_verification: bool,
    },

    /// Aborta a Task ativa enviando TERM para o processo dono.
    Abort {
        /// UUID da Task a abortar.
        #[arg(long)]
        task_id: String,
    },

    /// Remove workspaces de Tasks encerradas há mais de N dias.
    Cleanup {
        /// Idade mínima em dias.
        #[arg(long)]
        older_than: i64,

        /// Limpa apenas Tasks que terminaram em FAILED.
        #[arg(long, default_value = "false")]
        failed_only: bool,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env();
    if std::env::var("DROIDSWARM_DEBUG").map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        == Ok(true)
    {
        telemetry_config.log_level = Level::DEBUG;
    }
    if let Err(e) = init_telemetry(telemetry_config) {
        eprintln!("Warning: failed to initialize telemetry: {}", e);
    }

    let code = match cli.command {
        Commands::Agent { message, strict_verification } => {
            run_agent(&message, strict_verification).await
        }
        Commands::Abort { task_id } => run_abort(&task_id).await,
        Commands::Cleanup { older_than, failed_only } => {
            run_cleanup(older_than, failed_only).await
        }
    };

    shutdown_telemetry();
    std::process::exit(code);
}

// ============================================================================
// COMANDO: AGENT
// ============================================================================

/// Roda uma Task completa e devolve o exit code.
async fn run_agent(message: &str, strict_verification: bool) -> i32 {
    let spec = match parse_build_message(message) {
        Ok(spec) => spec,
        Err(err) => {
            error!(error = %err, "Mensagem inválida");
            return err.exit_code();
        }
    };

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "Configuração incompleta");
            return err.exit_code();
        }
    };

    // Reserva o diretório de logs do layout de estado; quem escreve
    // nele são observadores externos.
    if let Err(e) = std::fs::create_dir_all(settings.logs_dir()) {
        error!(error = %e, "Falha ao criar diretório de logs");
    }

    let store = match StateStore::open(&settings.db_path(), &settings.workspaces_root).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "Falha ao abrir o banco de estado");
            return err.exit_code();
        }
    };

    let limiter = ratelimit::TokenBucket::from_env();
    let client = Arc::new(client::LlmClient::new(&settings, limiter));
    let orchestrator = Orchestrator::new(
        store,
        client,
        limits::Budgets::from_env(),
        OrchestratorConfig::from_settings(&settings, strict_verification),
    );

    match orchestrator.run(spec).await {
        Ok(outcome) => {
            let label = match outcome.state {
                TaskState::CompletedWithWarnings => "completed with warnings",
                _ => "completed",
            };
            println!(
                "Task {} {}: {} files, {} API calls, {} tokens, quality {:.2}",
                outcome.task_id,
                label,
                outcome.files.len(),
                outcome.api_call_count,
                outcome.total_tokens,
                outcome.quality_score,
            );
            0
        }
        Err(err) => {
            eprintln!("Task failed: {}", err);
            err.exit_code()
        }
    }
}

/// Extrai o TaskSpec de `build app: <JSON>`.
fn parse_build_message(message: &str) -> Result<TaskSpec, SwarmError> {
    let trimmed = message.trim();
    let Some(payload) = trimmed.strip_prefix(BUILD_PREFIX) else {
        return Err(SwarmError::Validation(format!(
            "mensagem deve começar com '{}'",
            BUILD_PREFIX
        )));
    };
    serde_json::from_str(payload.trim())
        .map_err(|e| SwarmError::Validation(format!("TaskSpec inválido: {}", e)))
}

// ============================================================================
// COMANDO: ABORT
// ============================================================================

/// Sinaliza TERM para o orquestrador dono da Task ativa.
async fn run_abort(task_id: &str) -> i32 {
    let home = config::state_home_from_env();
    let workspaces = config::workspaces_root_from_env(&home);

    let store = match StateStore::open(&home.join("state.db"), &workspaces).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Falha ao abrir o banco de estado");
            return err.exit_code();
        }
    };

    match store.get_task(task_id).await {
        Ok(Some(task)) if !task.state.is_terminal() => {}
        Ok(Some(task)) => {
            eprintln!("Task {} already finished ({})", task_id, task.state);
            return 1;
        }
        Ok(None) => {
            eprintln!("Task {} not found", task_id);
            return 1;
        }
        Err(err) => {
            error!(error = %err, "Falha ao consultar a Task");
            return err.exit_code();
        }
    }

    let pid_path = home.join("orchestrator.pid");
    let Some(pid) = pidfile::read_pid(&pid_path) else {
        eprintln!("No active orchestrator (PID file missing)");
        return 1;
    };

    match pidfile::send_term(pid) {
        Ok(()) => {
            info!(task_id, pid, "TERM enviado");
            println!("Abort requested for task {} (PID {})", task_id, pid);
            0
        }
        Err(err) => {
            error!(error = %err, "Falha ao enviar TERM");
            err.exit_code()
        }
    }
}

// ============================================================================
// COMANDO: CLEANUP
// ============================================================================

/// Remove workspaces de Tasks terminais antigas.
///
/// Só toca em Tasks com estado terminal e `end_time` mais velho que o
/// corte; a Task ativa (se houver) nunca é candidata.
async fn run_cleanup(older_than_days: i64, failed_only: bool) -> i32 {
    let home = config::state_home_from_env();
    let workspaces = config::workspaces_root_from_env(&home);

    let store = match StateStore::open(&home.join("state.db"), &workspaces).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Falha ao abrir o banco de estado");
            return err.exit_code();
        }
    };

    let tasks = match store.list_tasks().await {
        Ok(tasks) => tasks,
        Err(err) => {
            error!(error = %err, "Falha ao listar Tasks");
            return err.exit_code();
        }
    };

    let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
    let mut removed = 0usize;

    for task in tasks {
        if !task.state.is_terminal() {
            continue;
        }
        if failed_only && task.state != TaskState::Failed {
            continue;
        }
        let Some(end_time) = task.end_time.as_deref() else {
            continue;
        };
        let Ok(ended) = chrono::DateTime::parse_from_rfc3339(end_time) else {
            continue;
        };
        if ended.with_timezone(&chrono::Utc) > cutoff {
            continue;
        }

        let workspace = store.workspace_dir(&task.task_id);
        if workspace.is_dir() {
            match std::fs::remove_dir_all(&workspace) {
                Ok(()) => {
                    info!(task_id = %task.task_id, "Workspace removido");
                    removed += 1;
                }
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e, "Falha ao remover workspace");
                }
            }
        }
    }

    println!("Removed {} workspace(s)", removed);
    0
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_message() {
        let message = r#"build app: {
            "app_name": "TodoApp",
            "features": ["add_task"],
            "architecture": "MVVM",
            "ui_system": "Compose",
            "min_sdk": 24,
            "target_sdk": 34,
            "gradle_version": "8.2.0",
            "kotlin_version": "1.9.20"
        }"#;
        let spec = parse_build_message(message).unwrap();
        assert_eq!(spec.app_name, "TodoApp");
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let err = parse_build_message(r#"{"app_name": "X"}"#).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        let err = parse_build_message("build app: not json").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let message = "  build app: {\"app_name\":\"A\",\"features\":[\"f\"],\
                       \"architecture\":\"MVP\",\"ui_system\":\"XML\",\"min_sdk\":21,\
                       \"target_sdk\":34,\"gradle_version\":\"8.0.0\",\"kotlin_version\":\"1.9.0\"}  ";
        let spec = parse_build_message(message).unwrap();
        assert_eq!(spec.app_name, "A");
    }
}
