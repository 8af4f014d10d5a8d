//! # Orquestrador - Máquina de Estados da Task
//!
//! Este é o coração do sistema: o driver single-threaded que leva uma
//! Task de `PLANNING` até um estado terminal, coordenando os quatro
//! agentes sob orçamentos duros e teardown garantido.
//!
//! ## Fluxo de uma Task:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ intake: valida spec → disco livre → exclusão por PID → cria Task │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             ▼
//!                    PLANNING ── Planner + validação do plano
//!                             ▼
//!                    EXECUTING ── loop de steps (Coder ⇄ Critic)
//!                             ▼
//!                    VERIFYING ── Verifier + nota de qualidade
//!                             ▼
//!          COMPLETED │ COMPLETED_WITH_WARNINGS │ FAILED
//! ```
//!
//! ## Dois orçamentos para dois tipos de falha:
//!
//! Falhas **transientes** (rede, 5xx, timeout) e falhas **semânticas**
//! (REJECT do Critic) não dividem contador. Cada uma tem seu breaker:
//! - 3 falhas transientes consecutivas → CircuitBreaker
//! - 6 rejeições consecutivas do Critic → CircuitBreaker
//!
//! Misturar os dois é armadilha conhecida: uma rede instável mascararia
//! um modelo travado, e vice-versa. Os contadores zeram apenas quando um
//! step é aceito.
//!
//! ## Saída garantida:
//!
//! Aconteça o que acontecer (sucesso, erro, sinal), o mesmo escopo
//! final desliga o heartbeat, solta o arquivo de PID e fecha o banco.
//! O handler de sinal nunca encerra o processo: ele só levanta a flag
//! `abort_requested`, que o driver observa em todo ponto de reentrada.

pub mod heartbeat;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::{Coder, Critic, Planner, Verifier};
use crate::client::{ChatApi, ChatUsage};
use crate::config::Settings;
use crate::errors::{SwarmError, SwarmResult};
use crate::limits::{Budgets, CONSECUTIVE_FAILURE_LIMIT, FEEDBACK_LOOP_LIMIT, MIN_FREE_DISK_BYTES};
use crate::pidfile::PidLock;
use crate::protocol::{
    AgentKind, CriticDecision, CriticIssue, Step, StepRecord, TaskSpec, TaskState,
};
use crate::store::StateStore;
use crate::validation;
use heartbeat::{Heartbeat, HEARTBEAT_INTERVAL};

// ============================================================================
// CONFIGURAÇÃO E RESULTADO
// ============================================================================

/// Caminhos e opções do orquestrador, resolvidos no intake.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Arquivo de PID para exclusão de instância única.
    pub pid_path: PathBuf,

    /// Arquivo de heartbeat.
    pub heartbeat_path: PathBuf,

    /// Sentinela de parada de emergência.
    pub emergency_stop_path: PathBuf,

    /// Com verificação estrita, nota abaixo de 0.5 falha a Task.
    pub strict_verification: bool,

    /// Espaço livre mínimo exigido no intake.
    pub min_free_disk_bytes: u64,

    /// Intervalo do heartbeat.
    pub heartbeat_interval: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings, strict_verification: bool) -> Self {
        Self {
            pid_path: settings.pid_path(),
            heartbeat_path: settings.heartbeat_path(),
            emergency_stop_path: settings.emergency_stop_path(),
            strict_verification,
            min_free_disk_bytes: MIN_FREE_DISK_BYTES,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Resultado final de uma Task bem-sucedida (ou completa com avisos).
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub state: TaskState,
    pub files: Vec<String>,
    pub quality_score: f64,
    pub api_call_count: u64,
    pub total_tokens: u64,
}

/// Estado mutável de uma execução, local ao driver.
struct RunState {
    task_id: String,
    started: Instant,
    api_calls: u64,
    tokens: u64,
    consecutive_failures: u32,
    consecutive_critic_rejections: u32,
    completed_files: Vec<String>,
}

impl RunState {
    fn new(task_id: String) -> Self {
        Self {
            task_id,
            started: Instant::now(),
            api_calls: 0,
            tokens: 0,
            consecutive_failures: 0,
            consecutive_critic_rejections: 0,
            completed_files: Vec::new(),
        }
    }
}

/// Resultado de uma passada do loop de step.
enum StepPass {
    /// Arquivo aceito e gravado.
    Accepted,
    /// Tentativas esgotadas com REJECT; os issues voltam para o driver
    /// reentrar com números de tentativa novos. O contador de rejeições
    /// (que só zera em aceite) limita as reentradas.
    Rejected(Vec<CriticIssue>),
}

// ============================================================================
// ORQUESTRADOR
// ============================================================================

/// O driver de Tasks. Um por processo; serializa tudo.
pub struct Orchestrator {
    store: Arc<StateStore>,
    planner: Planner,
    coder: Coder,
    critic: Critic,
    verifier: Verifier,
    budgets: Budgets,
    config: OrchestratorConfig,
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<StateStore>,
        client: Arc<dyn ChatApi>,
        budgets: Budgets,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            planner: Planner::new(Arc::clone(&client)),
            coder: Coder::new(Arc::clone(&client)),
            critic: Critic::new(Arc::clone(&client)),
            verifier: Verifier::new(client),
            budgets,
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Executa uma Task do começo ao fim.
    ///
    /// O intake (validação, disco, PID, criação) acontece antes do
    /// escopo de saída garantida; tudo depois dele passa pelo teardown:
    /// heartbeat parado, PID solto, banco fechado, e em caso de erro a
    /// Task marcada FAILED com a mensagem curta do erro.
    pub async fn run(&self, spec: TaskSpec) -> SwarmResult<TaskOutcome> {
        // ====================================================================
        // INTAKE
        // ====================================================================
        validation::validate_task_spec(&spec).map_err(validation::into_error)?;
        self.check_free_disk()?;

        let mut pid_lock = PidLock::acquire(&self.config.pid_path)?;

        let task_id = Uuid::new_v4().to_string();
        let start_time = chrono::Utc::now().to_rfc3339();
        self.store.create_task(&task_id, &spec, &start_time).await?;
        info!(%task_id, app = %spec.app_name, "Task iniciada");

        let watcher = self.spawn_signal_watcher(task_id.clone());
        let beat = Heartbeat::spawn(
            self.config.heartbeat_path.clone(),
            task_id.clone(),
            self.config.heartbeat_interval,
        );

        let mut state = RunState::new(task_id.clone());
        let result = self.drive(&mut state, &spec).await;

        // ====================================================================
        // SAÍDA GARANTIDA
        // ====================================================================
        beat.stop();
        watcher.abort();
        if let Err(err) = &result {
            error!(%task_id, error = %err, "Task falhou");
            let _ = self
                .store
                .update_task_state(&task_id, TaskState::Failed, Some(&err.to_string()))
                .await;
        }
        pid_lock.release();
        self.store.close().await;

        result
    }

    /// Flag compartilhada de aborto (escrita pelo handler de sinal).
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    // ========================================================================
    // MÁQUINA DE ESTADOS
    // ========================================================================

    async fn drive(&self, state: &mut RunState, spec: &TaskSpec) -> SwarmResult<TaskOutcome> {
        // ------------------------------------------------------------ PLANNING
        self.gates(state)?;
        let (plan, usage) = self.planner.create_plan(spec).await?;
        self.record(state, AgentKind::Planner, usage).await?;

        validation::validate_plan(&plan).map_err(validation::into_error)?;
        self.store.store_plan(&state.task_id, &plan).await?;
        self.store
            .update_task_state(&state.task_id, TaskState::Executing, None)
            .await?;

        // ----------------------------------------------------------- EXECUTING
        for step in plan.ordered_steps() {
            self.run_step(state, spec, step).await?;
        }

        // ----------------------------------------------------------- VERIFYING
        self.store
            .update_task_state(&state.task_id, TaskState::Verifying, None)
            .await?;
        self.gates(state)?;

        let (report, usage) = self
            .verifier
            .verify_project(&state.completed_files, spec)
            .await?;
        self.record(state, AgentKind::Verifier, usage).await?;

        let final_state = if report.quality_score >= 0.5 {
            TaskState::Completed
        } else if self.config.strict_verification {
            return Err(SwarmError::Verification(format!(
                "Strict verification failed: quality score {:.2} below 0.50",
                report.quality_score
            )));
        } else {
            for warning in &report.warnings {
                warn!(task_id = %state.task_id, warning = %warning, "Aviso do Verifier");
            }
            TaskState::CompletedWithWarnings
        };

        self.store
            .update_task_state(&state.task_id, final_state, None)
            .await?;
        info!(
            task_id = %state.task_id,
            state = final_state.as_str(),
            files = state.completed_files.len(),
            api_calls = state.api_calls,
            tokens = state.tokens,
            quality = report.quality_score,
            "Task encerrada"
        );

        Ok(TaskOutcome {
            task_id: state.task_id.clone(),
            state: final_state,
            files: state.completed_files.clone(),
            quality_score: report.quality_score,
            api_call_count: state.api_calls,
            total_tokens: state.tokens,
        })
    }

    // ========================================================================
    // LOOP DE STEP
    // ========================================================================

    /// Executa um step até aceite ou erro.
    ///
    /// Rejeição com tentativas esgotadas é falha *semântica*: o driver
    /// reentra no loop carregando os últimos issues, e o breaker de
    /// feedback (que só zera em aceite) garante o término.
    async fn run_step(&self, state: &mut RunState, spec: &TaskSpec, step: &Step) -> SwarmResult<()> {
        info!(
            task_id = %state.task_id,
            step = step.step_number,
            file = %step.file_path,
            "Executando step"
        );

        let mut carried_issues: Option<Vec<CriticIssue>> = None;
        loop {
            match self
                .step_pass(state, spec, step, carried_issues.take())
                .await?
            {
                StepPass::Accepted => return Ok(()),
                StepPass::Rejected(issues) => carried_issues = Some(issues),
            }
        }
    }

    /// Uma passada: até `max_step_retries` tentativas de Coder + Critic.
    async fn step_pass(
        &self,
        state: &mut RunState,
        spec: &TaskSpec,
        step: &Step,
        mut issues: Option<Vec<CriticIssue>>,
    ) -> SwarmResult<StepPass> {
        let max_attempts = self.budgets.max_step_retries;

        for attempt in 1..=max_attempts {
            // Ponto de reentrada: aborto, parada de emergência, breaker
            // de feedback e orçamentos, nessa ordem.
            self.gates(state)?;

            // ---------------------------------------------------------- CODER
            let generated = self
                .coder
                .generate_file(step, spec, &state.completed_files, issues.as_deref())
                .await;

            let (content, usage) = match generated {
                Ok(pair) => pair,
                Err(err) if err.is_transient() => {
                    state.consecutive_failures += 1;
                    warn!(
                        step = step.step_number,
                        attempt,
                        consecutive = state.consecutive_failures,
                        error = %err,
                        "Falha transiente do Coder"
                    );
                    if state.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
                        return Err(SwarmError::CircuitBreaker(format!(
                            "{} consecutive transient failures",
                            state.consecutive_failures
                        )));
                    }
                    if attempt < max_attempts {
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            self.record(state, AgentKind::Coder, usage).await?;

            // --------------------------------------------------------- CRITIC
            self.gates(state)?;
            let (verdict, usage) = self
                .critic
                .review_file(&step.file_path, &content, step, spec)
                .await?;
            self.record(state, AgentKind::Critic, usage).await?;

            self.store
                .record_step(&StepRecord {
                    task_id: state.task_id.clone(),
                    step_number: step.step_number,
                    file_path: step.file_path.clone(),
                    attempt,
                    coder_output: content.clone(),
                    critic_decision: Some(verdict.decision),
                    critic_issues: verdict.issues.clone(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
                .await?;

            match verdict.decision {
                CriticDecision::Accept => {
                    self.store
                        .write_file(&state.task_id, &step.file_path, &content)
                        .await?;
                    state.completed_files.push(step.file_path.clone());
                    state.consecutive_failures = 0;
                    state.consecutive_critic_rejections = 0;
                    info!(
                        step = step.step_number,
                        file = %step.file_path,
                        attempt,
                        "Step aceito"
                    );
                    return Ok(StepPass::Accepted);
                }
                CriticDecision::Reject => {
                    state.consecutive_critic_rejections += 1;
                    warn!(
                        step = step.step_number,
                        attempt,
                        rejections = state.consecutive_critic_rejections,
                        "Step rejeitado pelo Critic"
                    );
                    if state.consecutive_critic_rejections >= FEEDBACK_LOOP_LIMIT {
                        return Err(SwarmError::CircuitBreaker(
                            "Coder unable to satisfy Critic requirements".into(),
                        ));
                    }
                    if attempt < max_attempts {
                        issues = Some(verdict.issues);
                        continue;
                    }

                    let summary = verdict
                        .issues
                        .iter()
                        .take(3)
                        .map(|i| i.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    warn!(
                        step = step.step_number,
                        issues = %summary,
                        "Tentativas esgotadas com rejeição, reentrando com feedback"
                    );
                    return Ok(StepPass::Rejected(verdict.issues));
                }
            }
        }

        Err(SwarmError::Internal("step loop exhausted without a result".into()))
    }

    // ========================================================================
    // PORTÕES E CONTABILIDADE
    // ========================================================================

    /// Verificações de reentrada, na ordem: aborto, parada de
    /// emergência, breaker de feedback, orçamentos.
    fn gates(&self, state: &RunState) -> SwarmResult<()> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(SwarmError::manual_abort());
        }
        if self.config.emergency_stop_path.exists() {
            return Err(SwarmError::Aborted("Emergency stop file detected".into()));
        }
        if state.consecutive_critic_rejections >= FEEDBACK_LOOP_LIMIT {
            return Err(SwarmError::CircuitBreaker(
                "Coder unable to satisfy Critic requirements".into(),
            ));
        }
        self.budgets
            .check(state.started.elapsed(), state.api_calls, state.tokens)
    }

    /// Registra a chamada de API e sincroniza os contadores locais com
    /// os persistidos (fonte de verdade para os orçamentos).
    async fn record(
        &self,
        state: &mut RunState,
        agent: AgentKind,
        usage: ChatUsage,
    ) -> SwarmResult<()> {
        let (calls, tokens) = self
            .store
            .record_api_call(
                &state.task_id,
                agent,
                usage.prompt_tokens,
                usage.completion_tokens,
            )
            .await?;
        state.api_calls = calls;
        state.tokens = tokens;
        Ok(())
    }

    /// Exige espaço livre mínimo na raiz dos workspaces.
    fn check_free_disk(&self) -> SwarmResult<()> {
        if self.config.min_free_disk_bytes == 0 {
            return Ok(());
        }
        let probe = self
            .config
            .emergency_stop_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        match nix::sys::statvfs::statvfs(&probe) {
            Ok(stat) => {
                let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
                if free < self.config.min_free_disk_bytes {
                    return Err(SwarmError::Internal(format!(
                        "insufficient disk space: {} bytes free, {} required",
                        free, self.config.min_free_disk_bytes
                    )));
                }
                Ok(())
            }
            Err(e) => {
                // Sem statvfs não dá para saber; segue com aviso.
                warn!(error = %e, "Não foi possível medir espaço livre");
                Ok(())
            }
        }
    }

    /// Handler de sinal: levanta a flag e marca FAILED em melhor
    /// esforço. Nunca encerra o processo; o driver observa a flag no
    /// próximo ponto de reentrada.
    fn spawn_signal_watcher(&self, task_id: String) -> JoinHandle<()> {
        let abort = Arc::clone(&self.abort);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Handler de SIGTERM indisponível");
                        std::future::pending::<()>().await;
                    }
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate => {}
            }

            warn!(%task_id, "Sinal recebido, abortando no próximo ponto de verificação");
            abort.store(true, Ordering::SeqCst);
            let _ = store
                .update_task_state(&task_id, TaskState::Failed, Some("Manual abort requested"))
                .await;
        })
    }
}

// ============================================================================
// TESTES - CENÁRIOS PONTA A PONTA
// ============================================================================
