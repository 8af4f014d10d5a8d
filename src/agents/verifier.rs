//! # Agente Verifier - Avaliação Final do Projeto
//!
//! Depois que todos os steps foram aceitos, o Verifier olha o conjunto
//! de arquivos e dá uma nota de 0 a 1, com avisos e itens faltantes.
//!
//! A nota decide o estado final: `>= 0.5` completa a Task; abaixo disso
//! vira `COMPLETED_WITH_WARNINGS` (ou `FAILED` em modo estrito).
//! Resposta ilegível degrada para o relatório padrão com nota neutra
//! 0.5 — o Verifier também é consultivo.

use std::sync::Arc;
use tracing::warn;

use super::{spec_summary, strip_code_fences};
use crate::client::{ChatApi, ChatMessage, ChatUsage};
use crate::errors::SwarmResult;
use crate::protocol::{AgentKind, TaskSpec, VerifierReport};

/// Agente que avalia o projeto completo. Sem estado entre chamadas.
pub struct Verifier {
    client: Arc<dyn ChatApi>,
}

impl Verifier {
    pub fn new(client: Arc<dyn ChatApi>) -> Self {
        Self { client }
    }

    /// Avalia o projeto gerado.
    ///
    /// Erros de transporte sobem (a Task decide o que fazer); resposta
    /// ilegível vira o relatório padrão.
    pub async fn verify_project(
        &self,
        files: &[String],
        spec: &TaskSpec,
    ) -> SwarmResult<(VerifierReport, ChatUsage)> {
        let messages = [
            ChatMessage::system(
                "You are the Verifier of an Android project generator. \
                 Given the spec and the list of generated files, assess completeness. \
                 Reply with JSON only: {\"warnings\": [..], \"missing_items\": [..], \
                 \"quality_score\": <0.0-1.0>}.",
            ),
            ChatMessage::user(format!(
                "Project:\n{}\n\nGenerated files:\n{}",
                spec_summary(spec),
                files.join("\n"),
            )),
        ];

        let response = self.client.chat(&messages, AgentKind::Verifier).await?;
        let report = parse_report(&response.content);
        Ok((report, response.usage))
    }
}

/// Parseia o relatório, degradando para o padrão quando ilegível.
/// A nota é sempre prensada para [0, 1].
fn parse_report(raw: &str) -> VerifierReport {
    let cleaned = strip_code_fences(raw);
    let mut report = match serde_json::from_str::<VerifierReport>(cleaned) {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %err, "Relatório do Verifier ilegível, usando padrão");
            VerifierReport::default()
        }
    };
    report.quality_score = report.quality_score.clamp(0.0, 1.0);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{Scripted, ScriptedChat};
    use crate::protocol::{Architecture, UiSystem};

    fn spec() -> TaskSpec {
        TaskSpec {
            app_name: "TodoApp".into(),
            features: vec!["add_task".into()],
            architecture: Architecture::MVVM,
            ui_system: UiSystem::Compose,
            min_sdk: 24,
            target_sdk: 34,
            gradle_version: "8.2.0".into(),
            kotlin_version: "1.9.20".into(),
        }
    }

    #[tokio::test]
    async fn test_parses_full_report() {
        let reply = serde_json::json!({
            "warnings": ["no tests generated"],
            "missing_items": ["proguard rules"],
            "quality_score": 0.9
        })
        .to_string();
        let chat = Arc::new(ScriptedChat::new(vec![Scripted::Reply(reply)]));
        let verifier = Verifier::new(chat.clone());

        let (report, usage) = verifier
            .verify_project(&["a.kt".into(), "b.kt".into()], &spec())
            .await
            .unwrap();
        assert_eq!(report.quality_score, 0.9);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.missing_items.len(), 1);
        assert_eq!(usage.total(), 150);
        assert_eq!(chat.calls.lock().unwrap().as_slice(), &[AgentKind::Verifier]);
    }

    #[tokio::test]
    async fn test_unparseable_report_defaults() {
        let chat = Arc::new(ScriptedChat::new(vec![Scripted::Reply(
            "The project looks complete.".into(),
        )]));
        let verifier = Verifier::new(chat);

        let (report, _) = verifier.verify_project(&[], &spec()).await.unwrap();
        assert_eq!(report, VerifierReport::default());
        assert_eq!(report.quality_score, 0.5);
    }

    #[tokio::test]
    async fn test_partial_report_fills_defaults() {
        let chat = Arc::new(ScriptedChat::new(vec![Scripted::Reply(
            r#"{"quality_score": 0.3}"#.into(),
        )]));
        let verifier = Verifier::new(chat);

        let (report, _) = verifier.verify_project(&[], &spec()).await.unwrap();
        assert_eq!(report.quality_score, 0.3);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_score_is_clamped() {
        let chat = Arc::new(ScriptedChat::new(vec![Scripted::Reply(
            r#"{"quality_score": 7.5}"#.into(),
        )]));
        let verifier = Verifier::new(chat);

        let (report, _) = verifier.verify_project(&[], &spec()).await.unwrap();
        assert_eq!(report.quality_score, 1.0);
    }
}
