//! # Agente Planner - Spec para Plano
//!
//! O Planner transforma o `TaskSpec` em um plano de steps, um arquivo
//! por step. É a primeira chamada de LLM de toda Task.
//!
//! ## Por que o Planner não tem fallback?
//!
//! O Critic e o Verifier são consultivos: se a resposta vier quebrada,
//! dá para seguir em frente com um padrão seguro. O Planner não: tudo
//! que vem depois depende de um plano bem formado. Resposta inválida
//! aqui é erro fatal, sem retry semântico.
//!
//! ## Validação em duas camadas:
//!
//! 1. **Forma** (`jsonschema`): a resposta é um array de 1 a 25 objetos
//!    com os campos certos e enums válidos.
//! 2. **Semântica** (módulo `validation`): números únicos, caminhos
//!    seguros, dependências presentes e anteriores. Essa camada roda no
//!    orquestrador, depois que o plano chega inteiro.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{spec_summary, strip_code_fences};
use crate::client::{ChatApi, ChatMessage, ChatUsage};
use crate::errors::{SwarmError, SwarmResult};
use crate::protocol::{AgentKind, Plan, Step, TaskSpec};

// ============================================================================
// SCHEMA DA RESPOSTA
// ============================================================================

/// Schema da resposta esperada: um array de steps.
///
/// Compilado uma vez; a validação de forma acontece antes de qualquer
/// tentativa de desserializar para os tipos do protocolo, para a
/// mensagem de erro apontar o campo problemático.
static PLAN_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = json!({
        "type": "array",
        "minItems": 1,
        "maxItems": 25,
        "items": {
            "type": "object",
            "required": ["step_number", "phase", "file_path", "file_type", "description"],
            "properties": {
                "step_number": { "type": "integer", "minimum": 1 },
                "phase": { "type": "string", "enum": ["setup", "core", "feature", "polish"] },
                "file_path": { "type": "string", "minLength": 1 },
                "file_type": { "type": "string", "enum": ["kotlin", "xml", "gradle", "manifest"] },
                "dependencies": { "type": "array", "items": { "type": "integer", "minimum": 1 } },
                "description": { "type": "string", "minLength": 1 }
            }
        }
    });
    JSONSchema::compile(&schema).expect("valid plan schema")
});

// ============================================================================
// PLANNER
// ============================================================================

/// Agente que gera o plano. Sem estado entre chamadas.
pub struct Planner {
    client: Arc<dyn ChatApi>,
}

impl Planner {
    pub fn new(client: Arc<dyn ChatApi>) -> Self {
        Self { client }
    }

    /// Gera e parseia o plano para a spec.
    ///
    /// Falhas de parse ou de forma são `Validation` (fatais): um plano
    /// ilegível não tem recuperação possível.
    pub async fn create_plan(&self, spec: &TaskSpec) -> SwarmResult<(Plan, ChatUsage)> {
        let messages = [
            ChatMessage::system(
                "You are the Planner of an Android project generator. \
                 Given an app specification, produce a build plan as a JSON array of steps. \
                 Each step creates exactly one file. Respond with the JSON array only, no prose. \
                 Step fields: step_number (1-based, unique), phase (setup|core|feature|polish), \
                 file_path (relative, forward slashes), file_type (kotlin|xml|gradle|manifest), \
                 dependencies (array of earlier step numbers), description. \
                 Use at most 25 steps and make every dependency refer to an earlier step.",
            ),
            ChatMessage::user(format!("Specification:\n{}", spec_summary(spec))),
        ];

        let response = self.client.chat(&messages, AgentKind::Planner).await?;
        let plan = parse_plan(&response.content)?;

        info!(steps = plan.steps.len(), "Plano recebido do Planner");
        Ok((plan, response.usage))
    }
}

/// Parseia e valida a forma da resposta do Planner.
fn parse_plan(raw: &str) -> SwarmResult<Plan> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        SwarmError::Validation(format!("Planner devolveu JSON inválido: {}", e))
    })?;

    if let Err(violations) = PLAN_SCHEMA.validate(&value) {
        let details: Vec<String> = violations
            .map(|v| format!("{} at {}", v, v.instance_path))
            .take(3)
            .collect();
        return Err(SwarmError::Validation(format!(
            "Planner devolveu plano fora do formato: [{}]",
            details.join("; ")
        )));
    }

    let steps: Vec<Step> = serde_json::from_value(value).map_err(|e| {
        SwarmError::Validation(format!("Planner devolveu plano fora do formato: {}", e))
    })?;

    Ok(Plan { steps })
}

// ============================================================================
// TESTES
// ============================================================================
