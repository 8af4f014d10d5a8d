//! # Módulo de Protocolo do Swarm - Estruturas de Dados
//!
//! Este módulo define todas as **estruturas de dados** que circulam entre os
//! quatro agentes (Planner, Coder, Critic, Verifier) e o orquestrador.
//!
//! ## O que é o protocolo do swarm?
//!
//! É o "idioma" comum entre o usuário, o orquestrador e os agentes LLM.
//! Ele descreve:
//! - **O quê** gerar (o `TaskSpec` com nome do app, features, SDKs)
//! - **Como** gerar (o `Plan` com steps ordenados, um arquivo por step)
//! - **O veredito** de cada arquivo (o `CriticOutput` com ACCEPT/REJECT)
//! - **A avaliação final** do projeto (o `VerifierReport`)
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! TaskSpec ──► Planner ──► Plan
//!                          └── Step[] (um arquivo por step)
//!                                └── Coder ──► conteúdo
//!                                      └── Critic ──► CriticOutput
//!                                                      └── CriticIssue[]
//! arquivos aceitos ──► Verifier ──► VerifierReport
//! ```
//!
//! ## Registros persistidos:
//!
//! `Task`, `StepRecord` e `ApiCallRecord` são as linhas do banco de estado.
//! `Task` é mutável apenas pelo orquestrador até entrar em estado terminal;
//! os outros dois são append-only.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ESPECIFICAÇÃO DE ENTRADA: TASK SPEC
// ============================================================================

/// Especificação declarativa de um aplicativo a gerar.
///
/// Esta é a entrada imutável de uma Task. Chega pela CLI como JSON
/// (`agent --message 'build app: {...}'`) e é validada antes de qualquer
/// chamada de agente.
///
/// ## Exemplo:
/// ```json
/// {
///   "app_name": "TodoApp",
///   "features": ["add_task", "list_tasks", "complete_task"],
///   "architecture": "MVVM",
///   "ui_system": "Compose",
///   "min_sdk": 24,
///   "target_sdk": 34,
///   "gradle_version": "8.2.0",
///   "kotlin_version": "1.9.20"
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TaskSpec {
    /// Nome do aplicativo. Identificador de até 256 caracteres,
    /// não pode ser palavra reservada de Kotlin.
    pub app_name: String,

    /// Lista ordenada de features (1 a 10, distintas).
    ///
    /// Cada feature é um identificador de até 128 caracteres.
    /// A ordem é preservada e influencia o plano gerado.
    pub features: Vec<String>,

    /// Arquitetura do app gerado.
    pub architecture: Architecture,

    /// Sistema de UI do app gerado.
    pub ui_system: UiSystem,

    /// SDK mínimo do Android (21 a 34, `min_sdk <= target_sdk`).
    pub min_sdk: u32,

    /// SDK alvo do Android (21 a 34).
    pub target_sdk: u32,

    /// Versão do Gradle em formato semver (ex: "8.2.0").
    pub gradle_version: String,

    /// Versão do Kotlin em formato semver (ex: "1.9.20").
    pub kotlin_version: String,
}

/// Arquitetura suportada para o app gerado.
///
/// A comparação é case-sensitive: "mvvm" é rejeitado na validação.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Architecture {
    MVVM,
    MVP,
    MVI,
}

/// Sistema de UI suportado para o app gerado.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum UiSystem {
    Compose,
    XML,
}

// ============================================================================
// SAÍDA DO PLANNER: PLAN E STEP
// ============================================================================

/// Um passo do plano: produzir exatamente um arquivo em um caminho.
///
/// Imutável depois de armazenado. O Planner devolve uma lista de steps
/// em JSON; a validação garante números únicos, caminhos seguros e grafo
/// de dependências fechado.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Step {
    /// Número do step, positivo e único dentro do plano.
    ///
    /// A execução segue a ordem crescente de `step_number`; a validação
    /// exige que toda dependência aponte para um número menor, então a
    /// ordem sequencial é sempre uma ordem topológica válida.
    pub step_number: u32,

    /// Fase do plano. Apenas informativa, não afeta o agendamento.
    pub phase: Phase,

    /// Caminho relativo do arquivo dentro do workspace da Task.
    pub file_path: String,

    /// Tipo do arquivo a gerar.
    pub file_type: FileType,

    /// Números de steps anteriores dos quais este depende.
    #[serde(default)]
    pub dependencies: Vec<u32>,

    /// Descrição do que o arquivo deve conter. Vai no prompt do Coder.
    pub description: String,
}

/// Fase de um step. Informativo: ajuda a ler o plano, nada mais.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Core,
    Feature,
    Polish,
}

/// Tipo de arquivo gerado por um step.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Kotlin,
    Xml,
    Gradle,
    Manifest,
}

/// Plano completo: sequência ordenada de 1 a 25 steps.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Devolve os steps em ordem crescente de `step_number`.
    ///
    /// O Planner normalmente já devolve ordenado, mas a execução não
    /// depende disso.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_number);
        steps
    }
}

// ============================================================================
// ESTADO DA TASK
// ============================================================================

/// Estados do ciclo de vida de uma Task.
///
/// As transições são monotônicas:
///
/// ```text
/// PLANNING → EXECUTING → VERIFYING → COMPLETED
///                                  → COMPLETED_WITH_WARNINGS
/// (qualquer estado não-terminal) → FAILED
/// ```
///
/// Estados terminais nunca mudam. O banco de estado recusa escritas em
/// Tasks terminais.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Planning,
    Executing,
    Verifying,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl TaskState {
    /// Um estado terminal sela a Task: nenhuma escrita posterior.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed
        )
    }

    /// Nome persistido no banco (mesma grafia do JSON).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Verifying => "VERIFYING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            Self::Failed => "FAILED",
        }
    }

    /// Reconstrói o estado a partir do nome persistido.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLANNING" => Some(Self::Planning),
            "EXECUTING" => Some(Self::Executing),
            "VERIFYING" => Some(Self::Verifying),
            "COMPLETED" => Some(Self::Completed),
            "COMPLETED_WITH_WARNINGS" => Some(Self::CompletedWithWarnings),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registro persistente de uma Task.
///
/// Criado no intake, mutado apenas pelo orquestrador, selado ao entrar
/// em estado terminal. Os contadores `api_call_count` e `total_tokens`
/// são não-decrescentes e iguais à soma dos `ApiCallRecord` da Task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Task {
    /// UUID v4 gerado no intake. Também nomeia o diretório de workspace.
    pub task_id: String,

    /// Estado atual do ciclo de vida.
    pub state: TaskState,

    /// Especificação de entrada, imutável.
    pub task_spec: TaskSpec,

    /// Plano gerado. `None` até o Planner ter sucesso.
    pub plan: Option<Plan>,

    /// Total de chamadas de API feitas por esta Task.
    pub api_call_count: u64,

    /// Total de tokens (prompt + completion) consumidos por esta Task.
    pub total_tokens: u64,

    /// Início da Task em ISO8601.
    pub start_time: String,

    /// Fim da Task em ISO8601. `None` enquanto ativa.
    pub end_time: Option<String>,

    /// Mensagem curta de erro quando `state == FAILED`.
    pub error_message: Option<String>,
}

// ============================================================================
// VEREDITO DO CRITIC
// ============================================================================

/// Decisão vinculante do Critic sobre uma saída do Coder.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriticDecision {
    Accept,
    Reject,
}

/// Severidade de um problema apontado pelo Critic.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Blocker,
    Major,
    Minor,
}

/// Um problema individual apontado pelo Critic.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CriticIssue {
    pub severity: Severity,

    /// Linha do arquivo onde o problema foi encontrado, se aplicável.
    #[serde(default)]
    pub line: Option<u32>,

    pub message: String,
}

/// Saída estruturada do Critic: `{decision, issues[]}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CriticOutput {
    pub decision: CriticDecision,

    #[serde(default)]
    pub issues: Vec<CriticIssue>,
}

impl CriticOutput {
    /// Veredito de aceitação sem ressalvas.
    ///
    /// Usado como fallback quando a resposta do Critic é inválida:
    /// o Critic é consultivo, então uma resposta malformada não pode
    /// bloquear a Task para sempre.
    pub fn accept() -> Self {
        Self {
            decision: CriticDecision::Accept,
            issues: Vec::new(),
        }
    }
}

// ============================================================================
// RELATÓRIO DO VERIFIER
// ============================================================================

/// Relatório final do Verifier sobre o projeto completo.
///
/// `quality_score` fica em [0, 1]. Abaixo de 0.5 a Task termina em
/// `COMPLETED_WITH_WARNINGS` (ou `FAILED` com verificação estrita).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VerifierReport {
    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default)]
    pub missing_items: Vec<String>,

    #[serde(default = "default_quality_score")]
    pub quality_score: f64,
}

/// Nota neutra usada quando a resposta do Verifier não pôde ser lida.
fn default_quality_score() -> f64 {
    0.5
}

impl Default for VerifierReport {
    fn default() -> Self {
        Self {
            warnings: Vec::new(),
            missing_items: Vec::new(),
            quality_score: default_quality_score(),
        }
    }
}

// ============================================================================
// REGISTROS APPEND-ONLY
// ============================================================================

/// Registro persistente de uma tentativa de step (append-only).
///
/// Uma linha por tentativa do Coder, com o veredito do Critic quando
/// houve um. `attempt` nunca passa de 3.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepRecord {
    pub task_id: String,
    pub step_number: u32,
    pub file_path: String,
    pub attempt: u32,
    pub coder_output: String,
    pub critic_decision: Option<CriticDecision>,
    pub critic_issues: Vec<CriticIssue>,
    pub timestamp: String,
}

/// Registro persistente de uma chamada de API (append-only).
///
/// A inserção acontece na mesma transação que o incremento dos
/// contadores da Task pai, então contadores e registros nunca divergem.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiCallRecord {
    pub task_id: String,
    pub agent: AgentKind,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub timestamp: String,
}

/// Qual agente fez a chamada. Usado em logs e no registro de chamadas.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Planner,
    Coder,
    Critic,
    Verifier,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Critic => "critic",
            Self::Verifier => "verifier",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "coder" => Some(Self::Coder),
            "critic" => Some(Self::Critic),
            "verifier" => Some(Self::Verifier),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_spec_json() -> serde_json::Value {
        json!({
            "app_name": "TodoApp",
            "features": ["add_task", "list_tasks", "complete_task"],
            "architecture": "MVVM",
            "ui_system": "Compose",
            "min_sdk": 24,
            "target_sdk": 34,
            "gradle_version": "8.2.0",
            "kotlin_version": "1.9.20"
        })
    }

    #[test]
    fn test_task_spec_roundtrip() {
        let spec: TaskSpec = serde_json::from_value(sample_spec_json()).unwrap();
        assert_eq!(spec.app_name, "TodoApp");
        assert_eq!(spec.architecture, Architecture::MVVM);
        assert_eq!(spec.ui_system, UiSystem::Compose);
        assert_eq!(spec.features.len(), 3);

        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back, sample_spec_json());
    }

    #[test]
    fn test_architecture_is_case_sensitive() {
        let result: Result<Architecture, _> = serde_json::from_value(json!("mvvm"));
        assert!(result.is_err());
        let ok: Architecture = serde_json::from_value(json!("MVVM")).unwrap();
        assert_eq!(ok, Architecture::MVVM);
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: Step = serde_json::from_value(json!({
            "step_number": 1,
            "phase": "setup",
            "file_path": "app/build.gradle",
            "file_type": "gradle",
            "description": "Module build script"
        }))
        .unwrap();
        assert!(step.dependencies.is_empty());
        assert_eq!(step.phase, Phase::Setup);
        assert_eq!(step.file_type, FileType::Gradle);
    }

    #[test]
    fn test_task_state_terminality() {
        assert!(!TaskState::Planning.is_terminal());
        assert!(!TaskState::Executing.is_terminal());
        assert!(!TaskState::Verifying.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::CompletedWithWarnings.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn test_task_state_parse_roundtrip() {
        for state in [
            TaskState::Planning,
            TaskState::Executing,
            TaskState::Verifying,
            TaskState::Completed,
            TaskState::CompletedWithWarnings,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("RUNNING"), None);
    }

    #[test]
    fn test_critic_output_screaming_case() {
        let out: CriticOutput = serde_json::from_value(json!({
            "decision": "REJECT",
            "issues": [
                { "severity": "BLOCKER", "line": 10, "message": "missing import" }
            ]
        }))
        .unwrap();
        assert_eq!(out.decision, CriticDecision::Reject);
        assert_eq!(out.issues[0].severity, Severity::Blocker);

        // Minúsculas não são aceitas.
        let bad: Result<CriticOutput, _> =
            serde_json::from_value(json!({ "decision": "accept", "issues": [] }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_verifier_report_defaults() {
        let report: VerifierReport = serde_json::from_value(json!({})).unwrap();
        assert!(report.warnings.is_empty());
        assert!(report.missing_items.is_empty());
        assert_eq!(report.quality_score, 0.5);
    }

    #[test]
    fn test_plan_ordered_steps() {
        let plan = Plan {
            steps: vec![
                Step {
                    step_number: 3,
                    phase: Phase::Feature,
                    file_path: "c.kt".into(),
                    file_type: FileType::Kotlin,
                    dependencies: vec![1],
                    description: "c".into(),
                },
                Step {
                    step_number: 1,
                    phase: Phase::Setup,
                    file_path: "a.kt".into(),
                    file_type: FileType::Kotlin,
                    dependencies: vec![],
                    description: "a".into(),
                },
            ],
        };
        let ordered = plan.ordered_steps();
        assert_eq!(ordered[0].step_number, 1);
        assert_eq!(ordered[1].step_number, 3);
    }

    #[test]
    fn test_agent_kind_names() {
        assert_eq!(AgentKind::Planner.as_str(), "planner");
        assert_eq!(AgentKind::parse("critic"), Some(AgentKind::Critic));
        assert_eq!(AgentKind::parse("reviewer"), None);
    }
}
