// Module: Agents
// The four stateless LLM roles. Each one builds a prompt, runs a single
// round-trip through the shared ChatApi transport, and parses the reply.
// None of them retains state between calls; retry decisions belong to
// the orchestrator, never to the agents.

pub mod coder;
pub mod critic;
pub mod planner;
pub mod verifier;

pub use coder::Coder;
pub use critic::Critic;
pub use planner::Planner;
pub use verifier::Verifier;

use crate::protocol::TaskSpec;

/// Remove cercas de markdown (```json ... ```) de uma resposta.
///
/// Modelos adoram embrulhar JSON em cercas mesmo quando instruídos a não
/// fazer isso. Tiramos a primeira e a última linha de cerca, se houver.
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Pula o rótulo da linguagem ("json", "kotlin", ...) até a quebra.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => return trimmed,
    };
    match body.rfind("```") {
        Some(pos) => body[..pos].trim_end(),
        None => body.trim_end(),
    }
}

/// Resumo da spec embutido nos prompts de todos os agentes.
pub(crate) fn spec_summary(spec: &TaskSpec) -> String {
    format!(
        "App: {}\nFeatures: {}\nArchitecture: {:?}\nUI system: {:?}\nSDK range: {}..{}\nGradle: {}\nKotlin: {}",
        spec.app_name,
        spec.features.join(", "),
        spec.architecture,
        spec.ui_system,
        spec.min_sdk,
        spec.target_sdk,
        spec.gradle_version,
        spec.kotlin_version,
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Transporte roteirizado para testar agentes sem rede.

    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::client::{ChatApi, ChatMessage, ChatResponse, ChatUsage};
    use crate::errors::{SwarmError, SwarmResult};
    use crate::protocol::AgentKind;

    /// Um item do roteiro: ou uma resposta, ou um erro para devolver.
    ///
    /// Toda resposta custa 100 tokens de prompt e 50 de completion, o
    /// que deixa a aritmética dos testes de orçamento previsível.
    pub enum Scripted {
        Reply(String),
        Fail(SwarmError),
    }

    /// ChatApi falso que devolve as respostas na ordem do roteiro.
    pub struct ScriptedChat {
        script: Mutex<Vec<Scripted>>,
        pub calls: Mutex<Vec<AgentKind>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        pub fn new(script: Vec<Scripted>) -> Self {
            let mut script = script;
            script.reverse(); // pop() tira do fim
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedChat {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            agent: AgentKind,
        ) -> SwarmResult<ChatResponse> {
            self.calls.lock().unwrap().push(agent);
            let joined = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(joined);

            match self.script.lock().unwrap().pop() {
                Some(Scripted::Reply(content)) => Ok(ChatResponse {
                    content,
                    usage: ChatUsage { prompt_tokens: 100, completion_tokens: 50 },
                }),
                Some(Scripted::Fail(err)) => Err(err),
                None => Err(SwarmError::Internal("script exhausted".into())),
            }
        }
    }
}
