//! # Agente Critic - Revisão com Fail-Open
//!
//! O Critic revisa cada saída do Coder e devolve um veredito JSON:
//! `{"decision": "ACCEPT"|"REJECT", "issues": [...]}`.
//!
//! ## Por que fail-open?
//!
//! O Critic é consultivo. Se a resposta vier malformada (JSON quebrado,
//! decision inválida, issues que não é array) ou o transporte falhar, a
//! saída vira ACCEPT com um aviso no log. A alternativa, falhar a Task
//! inteira porque um modelo ruidoso respondeu torto, bloquearia todo
//! progresso sem ganho nenhum: o Verifier ainda olha o projeto no final.

use std::sync::Arc;
use tracing::warn;

use super::{spec_summary, strip_code_fences};
use crate::client::{ChatApi, ChatMessage, ChatUsage};
use crate::errors::SwarmResult;
use crate::protocol::{AgentKind, CriticOutput, Step, TaskSpec};

/// Agente que revisa arquivos gerados. Sem estado entre chamadas.
pub struct Critic {
    client: Arc<dyn ChatApi>,
}

impl Critic {
    pub fn new(client: Arc<dyn ChatApi>) -> Self {
        Self { client }
    }

    /// Revisa um arquivo gerado e devolve o veredito.
    ///
    /// Nunca propaga erro: transporte quebrado ou resposta ilegível
    /// degradam para ACCEPT (com aviso e uso zerado).
    pub async fn review_file(
        &self,
        file_path: &str,
        content: &str,
        step: &Step,
        spec: &TaskSpec,
    ) -> SwarmResult<(CriticOutput, ChatUsage)> {
        let messages = [
            ChatMessage::system(
                "You are the Critic of an Android project generator. \
                 Review the file for correctness against its description and the project spec. \
                 Reply with JSON only: {\"decision\": \"ACCEPT\"|\"REJECT\", \"issues\": \
                 [{\"severity\": \"BLOCKER\"|\"MAJOR\"|\"MINOR\", \"line\": <int|null>, \
                 \"message\": \"...\"}]}. Reject only for real defects.",
            ),
            ChatMessage::user(format!(
                "Project:\n{}\n\nFile: {}\nPurpose: {}\n\nContent:\n{}",
                spec_summary(spec),
                file_path,
                step.description,
                content,
            )),
        ];

        let response = match self.client.chat(&messages, AgentKind::Critic).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    file = file_path,
                    error = %err,
                    "Transporte do Critic falhou, aceitando por padrão"
                );
                return Ok((CriticOutput::accept(), ChatUsage::default()));
            }
        };

        let output = parse_verdict(&response.content, file_path);
        Ok((output, response.usage))
    }
}

/// Parseia o veredito, degradando para ACCEPT quando ilegível.
fn parse_verdict(raw: &str, file_path: &str) -> CriticOutput {
    let cleaned = strip_code_fences(raw);
    match serde_json::from_str::<CriticOutput>(cleaned) {
        Ok(output) => output,
        Err(err) => {
            warn!(
                file = file_path,
                error = %err,
                "Veredito do Critic ilegível, aceitando por padrão"
            );
            CriticOutput::accept()
        }
    }
}
