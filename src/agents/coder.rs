//! # Agente Coder - Step para Conteúdo de Arquivo
//!
//! O Coder recebe um step do plano e devolve o conteúdo do arquivo.
//! A resposta é texto cru (não JSON), limitado ao teto de 50 KiB.
//!
//! ## Retry com feedback:
//!
//! Quando o Critic rejeita uma tentativa, o orquestrador chama o Coder
//! de novo passando os problemas apontados. O prompt é uma função pura
//! de (step, spec, arquivos prontos, últimos issues) — quem decide se
//! os issues entram é o orquestrador, nunca o agente.

use std::sync::Arc;
use tracing::warn;

use super::{spec_summary, strip_code_fences};
use crate::client::{ChatApi, ChatMessage, ChatUsage};
use crate::errors::SwarmResult;
use crate::protocol::{AgentKind, CriticIssue, Step, TaskSpec};
use crate::store::MAX_FILE_SIZE_BYTES;

/// Agente que gera o conteúdo de um arquivo. Sem estado entre chamadas.
pub struct Coder {
    client: Arc<dyn ChatApi>,
}

impl Coder {
    pub fn new(client: Arc<dyn ChatApi>) -> Self {
        Self { client }
    }

    /// Gera o conteúdo do arquivo do step.
    ///
    /// `completed_files` dá contexto do que já existe; `prior_issues`
    /// carrega o feedback do Critic nas tentativas seguintes.
    pub async fn generate_file(
        &self,
        step: &Step,
        spec: &TaskSpec,
        completed_files: &[String],
        prior_issues: Option<&[CriticIssue]>,
    ) -> SwarmResult<(String, ChatUsage)> {
        let mut prompt = format!(
            "Generate the complete content of one file for an Android project.\n\n\
             Project:\n{}\n\n\
             File path: {}\n\
             File type: {:?}\n\
             What it must contain: {}\n",
            spec_summary(spec),
            step.file_path,
            step.file_type,
            step.description,
        );

        if !completed_files.is_empty() {
            prompt.push_str(&format!(
                "\nFiles already generated:\n{}\n",
                completed_files.join("\n")
            ));
        }

        if let Some(issues) = prior_issues {
            // Feedback da rodada anterior: o reviewer apontou problemas
            // e esta tentativa precisa resolvê-los.
            prompt.push_str("\nYour previous attempt was rejected. Fix these issues:\n");
            for issue in issues {
                match issue.line {
                    Some(line) => prompt.push_str(&format!(
                        "- [{:?}] line {}: {}\n",
                        issue.severity, line, issue.message
                    )),
                    None => {
                        prompt.push_str(&format!("- [{:?}] {}\n", issue.severity, issue.message))
                    }
                }
            }
        }

        let messages = [
            ChatMessage::system(
                "You are the Coder of an Android project generator. \
                 Reply with the raw file content only: no fences, no explanations.",
            ),
            ChatMessage::user(prompt),
        ];

        let response = self.client.chat(&messages, AgentKind::Coder).await?;
        let content = strip_code_fences(&response.content).to_string();
        let content = truncate_to_limit(content, &step.file_path);

        Ok((content, response.usage))
    }
}

/// Trunca o conteúdo no teto de tamanho, respeitando fronteiras UTF-8.
fn truncate_to_limit(content: String, file_path: &str) -> String {
    if content.len() <= MAX_FILE_SIZE_BYTES {
        return content;
    }

    warn!(
        file = file_path,
        bytes = content.len(),
        limit = MAX_FILE_SIZE_BYTES,
        "Saída do Coder truncada no teto de tamanho"
    );

    let mut cut = MAX_FILE_SIZE_BYTES;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = content;
    truncated.truncate(cut);
    truncated
}
