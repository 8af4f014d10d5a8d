//! # Banco de Estado - Tasks, Steps e Chamadas de API
//!
//! Registro durável de tudo que o orquestrador decide, mais a escrita
//! atômica dos arquivos gerados dentro do workspace de cada Task.
//!
//! ## Para todos entenderem:
//!
//! Este módulo é o "cartório" do sistema. Cada decisão importante vira
//! um registro permanente:
//! - A Task foi criada, mudou de estado, terminou
//! - Cada tentativa do Coder, com o veredito do Critic
//! - Cada chamada de API, com quantos tokens custou
//!
//! Se o processo morrer no meio, o banco conta exatamente até onde foi.
//!
//! ## Invariantes que este módulo garante:
//!
//! 1. **Contadores = registros.** `record_api_call` insere a linha e
//!    incrementa os contadores da Task **na mesma transação**: ou os
//!    dois acontecem, ou nenhum.
//! 2. **Terminal é selado.** Nenhuma escrita em Task com estado
//!    terminal; a tentativa vira no-op reportado ao chamador.
//! 3. **Task ⟷ workspace.** `create_task` cria o diretório antes da
//!    linha; se a linha falhar, o diretório vazio é removido.
//! 4. **Escrita atômica.** Todo arquivo nasce como `<path>.tmp`, recebe
//!    fsync, e só então é renomeado por cima do destino. Leitores nunca
//!    veem um arquivo pela metade.
//! 5. **Confinamento.** Todo caminho passa por `paths::sanitize` antes
//!    de tocar o disco.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{SwarmError, SwarmResult};
use crate::paths;
use crate::protocol::{
    AgentKind, ApiCallRecord, CriticDecision, CriticIssue, Plan, StepRecord, Task, TaskState,
    TaskSpec,
};

// ============================================================================
// CONSTANTES
// ============================================================================

/// Tamanho máximo de um arquivo gerado: 50 KiB.
pub const MAX_FILE_SIZE_BYTES: usize = 50 * 1024;

/// Acima de 80% do teto, loga um aviso. O Coder trunca no teto, então
/// chegar perto dele normalmente indica um prompt que pede demais.
const SIZE_WARN_THRESHOLD: usize = MAX_FILE_SIZE_BYTES * 8 / 10;

/// Nomes de wrapper executável recebem modo 0755; o resto, 0644.
static EXECUTABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(gradlew|[A-Za-z0-9_.-]+\.sh)$").expect("valid wrapper name regex"));

// ============================================================================
// STATE STORE
// ============================================================================

/// Conexão única com o banco embutido + raiz dos workspaces.
///
/// O orquestrador é single-threaded, então uma conexão serializada pelo
/// mutex basta; o WAL do SQLite cuida da durabilidade.
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
    workspaces_root: PathBuf,
}

impl StateStore {
    /// Abre (ou cria) o banco e garante a raiz dos workspaces.
    pub async fn open(db_path: &Path, workspaces_root: &Path) -> SwarmResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(workspaces_root)?;

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;

        // WAL: escritas não bloqueiam leitores externos (a UI de
        // observação lê o mesmo arquivo).
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            workspaces_root: workspaces_root.to_path_buf(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> SwarmResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id        TEXT PRIMARY KEY,
                state          TEXT NOT NULL,
                task_spec      TEXT NOT NULL,
                plan           TEXT,
                api_call_count INTEGER NOT NULL DEFAULT 0,
                total_tokens   INTEGER NOT NULL DEFAULT 0,
                start_time     TEXT NOT NULL,
                end_time       TEXT,
                error_message  TEXT
            );
            CREATE TABLE IF NOT EXISTS steps (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id         TEXT NOT NULL REFERENCES tasks(task_id),
                step_number     INTEGER NOT NULL,
                file_path       TEXT NOT NULL,
                attempt         INTEGER NOT NULL,
                coder_output    TEXT NOT NULL,
                critic_decision TEXT,
                critic_issues   TEXT NOT NULL,
                timestamp       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS api_calls (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id           TEXT NOT NULL REFERENCES tasks(task_id),
                agent             TEXT NOT NULL,
                prompt_tokens     INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                timestamp         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_steps_task ON steps(task_id, step_number);
            CREATE INDEX IF NOT EXISTS idx_api_calls_task ON api_calls(task_id);",
        )?;
        Ok(())
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    /// Diretório de workspace de uma Task.
    pub fn workspace_dir(&self, task_id: &str) -> PathBuf {
        self.workspaces_root.join(task_id)
    }

    /// Cria a Task: diretório de workspace primeiro, linha depois.
    ///
    /// Se a inserção falhar, o diretório recém-criado (ainda vazio) é
    /// removido para não deixar um workspace órfão sem linha no banco.
    pub async fn create_task(&self, task_id: &str, spec: &TaskSpec, start_time: &str) -> SwarmResult<()> {
        let workspace = self.workspace_dir(task_id);
        std::fs::create_dir_all(&workspace)?;

        let spec_json = serde_json::to_string(spec)
            .map_err(|e| SwarmError::Internal(format!("task_spec não serializa: {}", e)))?;

        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO tasks (task_id, state, task_spec, start_time) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, TaskState::Planning.as_str(), spec_json, start_time],
        );

        if let Err(e) = inserted {
            let _ = std::fs::remove_dir(&workspace);
            return Err(e.into());
        }

        info!(task_id, workspace = %workspace.display(), "Task criada");
        Ok(())
    }

    /// Muda o estado da Task, gravando `end_time` em estados terminais.
    ///
    /// Devolve `false` (sem escrever nada) se a Task já está selada em
    /// estado terminal: estados terminais nunca mutam.
    pub async fn update_task_state(
        &self,
        task_id: &str,
        state: TaskState,
        error_message: Option<&str>,
    ) -> SwarmResult<bool> {
        let conn = self.conn.lock().await;

        let current: Option<String> = conn
            .query_row(
                "SELECT state FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Err(SwarmError::Internal(format!("task {} não existe", task_id)));
        };
        if TaskState::parse(&current).is_some_and(|s| s.is_terminal()) {
            warn!(task_id, current = %current, attempted = state.as_str(), "Escrita em Task terminal ignorada");
            return Ok(false);
        }

        let end_time = if state.is_terminal() {
            Some(chrono::Utc::now().to_rfc3339())
        } else {
            None
        };

        conn.execute(
            "UPDATE tasks SET state = ?2,
                              error_message = COALESCE(?3, error_message),
                              end_time = COALESCE(?4, end_time)
             WHERE task_id = ?1",
            params![task_id, state.as_str(), error_message, end_time],
        )?;

        debug!(task_id, state = state.as_str(), "Estado da Task atualizado");
        Ok(true)
    }

    /// Grava o plano validado na Task.
    pub async fn store_plan(&self, task_id: &str, plan: &Plan) -> SwarmResult<()> {
        let plan_json = serde_json::to_string(plan)
            .map_err(|e| SwarmError::Internal(format!("plan não serializa: {}", e)))?;
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE tasks SET plan = ?2 WHERE task_id = ?1",
            params![task_id, plan_json],
        )?;
        if updated == 0 {
            return Err(SwarmError::Internal(format!("task {} não existe", task_id)));
        }
        Ok(())
    }

    /// Lê uma Task completa.
    pub async fn get_task(&self, task_id: &str) -> SwarmResult<Option<Task>> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                "SELECT task_id, state, task_spec, plan, api_call_count, total_tokens,
                        start_time, end_time, error_message
                 FROM tasks WHERE task_id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Lista todas as Tasks (para o comando `cleanup` e observadores).
    pub async fn list_tasks(&self) -> SwarmResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, state, task_spec, plan, api_call_count, total_tokens,
                    start_time, end_time, error_message
             FROM tasks ORDER BY start_time",
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ========================================================================
    // REGISTROS APPEND-ONLY
    // ========================================================================

    /// Grava uma tentativa de step.
    pub async fn record_step(&self, record: &StepRecord) -> SwarmResult<()> {
        let issues_json = serde_json::to_string(&record.critic_issues)
            .map_err(|e| SwarmError::Internal(format!("critic_issues não serializa: {}", e)))?;
        let decision = record.critic_decision.map(|d| match d {
            CriticDecision::Accept => "ACCEPT",
            CriticDecision::Reject => "REJECT",
        });

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO steps (task_id, step_number, file_path, attempt, coder_output,
                                critic_decision, critic_issues, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.task_id,
                record.step_number,
                record.file_path,
                record.attempt,
                record.coder_output,
                decision,
                issues_json,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Grava uma chamada de API e incrementa os contadores da Task.
    ///
    /// As duas escritas ficam na mesma transação; devolve os contadores
    /// atualizados para o orçamento não precisar de uma segunda leitura.
    /// Task selada (um sinal pode marcá-la FAILED com uma chamada ainda
    /// em voo) não recebe nem registro nem incremento: os contadores
    /// continuam iguais à soma dos registros.
    pub async fn record_api_call(
        &self,
        task_id: &str,
        agent: AgentKind,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> SwarmResult<(u64, u64)> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let (state, calls, tokens): (String, u64, u64) = tx.query_row(
            "SELECT state, api_call_count, total_tokens FROM tasks WHERE task_id = ?1",
            params![task_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        if TaskState::parse(&state).is_some_and(|s| s.is_terminal()) {
            warn!(task_id, agent = agent.as_str(), "Chamada de API após selagem, descartada");
            return Ok((calls, tokens));
        }

        tx.execute(
            "INSERT INTO api_calls (task_id, agent, prompt_tokens, completion_tokens, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, agent.as_str(), prompt_tokens, completion_tokens, timestamp],
        )?;
        tx.execute(
            "UPDATE tasks SET api_call_count = api_call_count + 1,
                              total_tokens = total_tokens + ?2
             WHERE task_id = ?1",
            params![task_id, prompt_tokens + completion_tokens],
        )?;

        let counters = tx.query_row(
            "SELECT api_call_count, total_tokens FROM tasks WHERE task_id = ?1",
            params![task_id],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;

        tx.commit()?;
        Ok(counters)
    }

    /// Registros de step de uma Task, na ordem de inserção.
    pub async fn step_records(&self, task_id: &str) -> SwarmResult<Vec<StepRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, step_number, file_path, attempt, coder_output,
                    critic_decision, critic_issues, timestamp
             FROM steps WHERE task_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![task_id], |row| {
                let decision: Option<String> = row.get(5)?;
                let issues_json: String = row.get(6)?;
                Ok(StepRecord {
                    task_id: row.get(0)?,
                    step_number: row.get(1)?,
                    file_path: row.get(2)?,
                    attempt: row.get(3)?,
                    coder_output: row.get(4)?,
                    critic_decision: decision.as_deref().and_then(|d| match d {
                        "ACCEPT" => Some(CriticDecision::Accept),
                        "REJECT" => Some(CriticDecision::Reject),
                        _ => None,
                    }),
                    critic_issues: serde_json::from_str::<Vec<CriticIssue>>(&issues_json)
                        .unwrap_or_default(),
                    timestamp: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Registros de chamada de API de uma Task, na ordem de inserção.
    pub async fn api_call_records(&self, task_id: &str) -> SwarmResult<Vec<ApiCallRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, agent, prompt_tokens, completion_tokens, timestamp
             FROM api_calls WHERE task_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![task_id], |row| {
                let agent: String = row.get(1)?;
                Ok(ApiCallRecord {
                    task_id: row.get(0)?,
                    agent: AgentKind::parse(&agent).unwrap_or(AgentKind::Planner),
                    prompt_tokens: row.get(2)?,
                    completion_tokens: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ========================================================================
    // ARQUIVOS DO WORKSPACE
    // ========================================================================

    /// Escreve um arquivo gerado de forma atômica dentro do workspace.
    ///
    /// Protocolo: confinamento → teto de tamanho → diretórios pai →
    /// `<path>.tmp` + fsync → modo → rename por cima do destino.
    /// O tmp é removido em qualquer caminho de falha.
    pub async fn write_file(&self, task_id: &str, rel_path: &str, content: &str) -> SwarmResult<PathBuf> {
        let workspace = self.workspace_dir(task_id);
        let target = paths::sanitize(&workspace, rel_path)?;

        let byte_len = content.len();
        if byte_len > MAX_FILE_SIZE_BYTES {
            return Err(SwarmError::Validation(format!(
                "arquivo '{}' tem {} bytes, teto é {}",
                rel_path, byte_len, MAX_FILE_SIZE_BYTES
            )));
        }
        if byte_len >= SIZE_WARN_THRESHOLD {
            warn!(
                task_id,
                file = rel_path,
                bytes = byte_len,
                limit = MAX_FILE_SIZE_BYTES,
                "Arquivo perto do teto de tamanho"
            );
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = tmp_sibling(&target);
        let written = write_and_sync(&tmp, content.as_bytes(), is_executable_name(rel_path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(task_id, file = rel_path, bytes = byte_len, "Arquivo gravado");
        Ok(target)
    }

    /// Lê um arquivo do workspace (mesmo confinamento da escrita).
    pub async fn read_file(&self, task_id: &str, rel_path: &str) -> SwarmResult<String> {
        let workspace = self.workspace_dir(task_id);
        let target = paths::sanitize(&workspace, rel_path)?;
        Ok(std::fs::read_to_string(target)?)
    }

    /// Lista os arquivos do workspace, relativos à raiz da Task.
    ///
    /// Dotfiles e restos `*.tmp` ficam de fora.
    pub async fn list_files(&self, task_id: &str) -> SwarmResult<Vec<String>> {
        let workspace = self.workspace_dir(task_id);
        let mut files = Vec::new();
        if workspace.is_dir() {
            walk_workspace(&workspace, &workspace, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    /// Encerra a conexão de forma ordenada.
    ///
    /// Compacta o WAL de volta para o arquivo principal; falha aqui não
    /// derruba o teardown.
    pub async fn close(&self) {
        let conn = self.conn.lock().await;
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)") {
            warn!(error = %e, "Checkpoint final do WAL falhou");
        }
    }
}

// ============================================================================
// AUXILIARES
// ============================================================================

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let state: String = row.get(1)?;
    let spec_json: String = row.get(2)?;
    let plan_json: Option<String> = row.get(3)?;
    Ok(Task {
        task_id: row.get(0)?,
        state: TaskState::parse(&state).unwrap_or(TaskState::Failed),
        task_spec: serde_json::from_str(&spec_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        plan: match plan_json {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?,
            None => None,
        },
        api_call_count: row.get(4)?,
        total_tokens: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        error_message: row.get(8)?,
    })
}

/// `app/Main.kt` → `app/Main.kt.tmp`, sempre no mesmo diretório para o
/// rename ser atômico no mesmo filesystem.
fn tmp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// O nome do arquivo indica um wrapper executável?
fn is_executable_name(rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    EXECUTABLE_NAME_RE.is_match(name)
}

fn write_and_sync(tmp: &Path, bytes: &[u8], executable: bool) -> SwarmResult<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if executable { 0o755 } else { 0o644 };
        std::fs::set_permissions(tmp, std::fs::Permissions::from_mode(mode))?;
    }

    Ok(())
}

fn walk_workspace(root: &Path, dir: &Path, out: &mut Vec<String>) -> SwarmResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') || name_str.ends_with(".tmp") {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            walk_workspace(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Architecture, Severity, UiSystem};

    fn sample_spec() -> TaskSpec {
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

    async fn open_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.db"), &dir.path().join("workspaces"))
            .await
            .unwrap();
        (dir, store)
    }

    async fn create_sample_task(store: &StateStore, task_id: &str) {
        store
            .create_task(task_id, &sample_spec(), "2026-08-01T00:00:00Z")
            .await
            .unwrap();
    }

    // ========================================================================
    // Tasks e contadores
    // ========================================================================

    #[tokio::test]
    async fn test_create_task_makes_row_and_workspace() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        assert!(store.workspace_dir("t1").is_dir());
        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Planning);
        assert_eq!(task.api_call_count, 0);
        assert!(task.plan.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_task_removes_orphan_workspace() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;
        store.write_file("t1", "keep.kt", "x").await.unwrap();

        // Segunda inserção com o mesmo id falha na linha; o workspace
        // existente (não vazio) precisa sobreviver.
        let result = store
            .create_task("t1", &sample_spec(), "2026-08-01T00:00:01Z")
            .await;
        assert!(result.is_err());
        assert!(store.workspace_dir("t1").join("keep.kt").is_file());
    }

    #[tokio::test]
    async fn test_counters_match_records() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        store.record_api_call("t1", AgentKind::Planner, 100, 50).await.unwrap();
        store.record_api_call("t1", AgentKind::Coder, 200, 300).await.unwrap();
        let (calls, tokens) = store
            .record_api_call("t1", AgentKind::Critic, 10, 5)
            .await
            .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(tokens, 665);

        let task = store.get_task("t1").await.unwrap().unwrap();
        let records = store.api_call_records("t1").await.unwrap();
        assert_eq!(task.api_call_count, records.len() as u64);
        let sum: u64 = records.iter().map(|r| r.prompt_tokens + r.completion_tokens).sum();
        assert_eq!(task.total_tokens, sum);
    }

    #[tokio::test]
    async fn test_sealed_task_drops_late_api_calls() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        store.record_api_call("t1", AgentKind::Coder, 10, 10).await.unwrap();
        store
            .update_task_state("t1", TaskState::Failed, Some("aborted"))
            .await
            .unwrap();

        // Chamada que estava em voo quando o sinal chegou: descartada.
        let (calls, tokens) = store
            .record_api_call("t1", AgentKind::Critic, 99, 99)
            .await
            .unwrap();
        assert_eq!((calls, tokens), (1, 20));
        assert_eq!(store.api_call_records("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sealed() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        assert!(store
            .update_task_state("t1", TaskState::Failed, Some("boom"))
            .await
            .unwrap());

        // Task selada: nenhuma transição posterior escreve.
        assert!(!store
            .update_task_state("t1", TaskState::Completed, None)
            .await
            .unwrap());

        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error_message.as_deref(), Some("boom"));
        assert!(task.end_time.is_some());
    }

    #[tokio::test]
    async fn test_store_plan_roundtrip() {
        use crate::protocol::{FileType, Phase, Step};
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        let plan = Plan {
            steps: vec![Step {
                step_number: 1,
                phase: Phase::Setup,
                file_path: "build.gradle".into(),
                file_type: FileType::Gradle,
                dependencies: vec![],
                description: "root build".into(),
            }],
        };
        store.store_plan("t1", &plan).await.unwrap();
        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.plan.unwrap(), plan);
    }

    #[tokio::test]
    async fn test_step_records_keep_order_and_issues() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        for attempt in 1..=2 {
            store
                .record_step(&StepRecord {
                    task_id: "t1".into(),
                    step_number: 3,
                    file_path: "a.kt".into(),
                    attempt,
                    coder_output: format!("v{}", attempt),
                    critic_decision: Some(CriticDecision::Reject),
                    critic_issues: vec![CriticIssue {
                        severity: Severity::Major,
                        line: Some(4),
                        message: "bad".into(),
                    }],
                    timestamp: "2026-08-01T00:00:00Z".into(),
                })
                .await
                .unwrap();
        }

        let records = store.step_records("t1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[1].attempt, 2);
        assert_eq!(records[0].critic_issues[0].severity, Severity::Major);
        assert_eq!(records[0].critic_decision, Some(CriticDecision::Reject));
    }

    // ========================================================================
    // Arquivos do workspace
    // ========================================================================

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        let content = "package com.example\n\nfun main() {}\n";
        store.write_file("t1", "app/src/Main.kt", content).await.unwrap();
        let read = store.read_file("t1", "app/src/Main.kt").await.unwrap();
        assert_eq!(read, content);
    }

    #[tokio::test]
    async fn test_write_leaves_no_tmp_behind() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        store.write_file("t1", "a.kt", "fun a() {}").await.unwrap();
        let files = store.list_files("t1").await.unwrap();
        assert_eq!(files, vec!["a.kt"]);
    }

    #[tokio::test]
    async fn test_write_replaces_existing_atomically() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        store.write_file("t1", "a.kt", "v1").await.unwrap();
        store.write_file("t1", "a.kt", "v2").await.unwrap();
        assert_eq!(store.read_file("t1", "a.kt").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_size_limit_boundary() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        // Exatamente 50 KiB passa.
        let exact = "x".repeat(MAX_FILE_SIZE_BYTES);
        assert!(store.write_file("t1", "exact.kt", &exact).await.is_ok());

        // Um byte a mais é rejeitado, sem deixar lixo para trás.
        let over = "x".repeat(MAX_FILE_SIZE_BYTES + 1);
        let err = store.write_file("t1", "over.kt", &over).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        let files = store.list_files("t1").await.unwrap();
        assert!(!files.iter().any(|f| f.starts_with("over")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_wrapper_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        let gradlew = store.write_file("t1", "gradlew", "#!/bin/sh\n").await.unwrap();
        let mode = std::fs::metadata(&gradlew).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);

        let kt = store.write_file("t1", "Main.kt", "fun main() {}").await.unwrap();
        let mode = std::fs::metadata(&kt).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[tokio::test]
    async fn test_list_files_skips_dotfiles_and_tmp() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        store.write_file("t1", "a.kt", "a").await.unwrap();
        store.write_file("t1", "dir/b.kt", "b").await.unwrap();
        // Lixo plantado direto no disco, fora do protocolo de escrita.
        std::fs::write(store.workspace_dir("t1").join(".hidden"), "x").unwrap();
        std::fs::write(store.workspace_dir("t1").join("c.kt.tmp"), "x").unwrap();

        let files = store.list_files("t1").await.unwrap();
        assert_eq!(files, vec!["a.kt", "dir/b.kt"]);
    }

    #[tokio::test]
    async fn test_write_rejects_escaping_path() {
        let (_dir, store) = open_store().await;
        create_sample_task(&store, "t1").await;

        assert!(store.write_file("t1", "../escape.kt", "x").await.is_err());
        assert!(store.write_file("t1", "/abs.kt", "x").await.is_err());
        assert!(store.read_file("t1", "../../etc/passwd").await.is_err());
    }

    #[test]
    fn test_executable_name_pattern() {
        assert!(is_executable_name("gradlew"));
        assert!(is_executable_name("scripts/run.sh"));
        assert!(!is_executable_name("gradlew.bat.kt"));
        assert!(!is_executable_name("Main.kt"));
        assert!(!is_executable_name("app/build.gradle"));
    }
}
