use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fm_core::types::ProviderKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("no process for session: {0}")]
    NotRunning(Uuid),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

// ---------------------------------------------------------------------------
// Spawn types
// ---------------------------------------------------------------------------

/// How the provider-side conversation relates to prior attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDirective {
    /// Brand-new conversation.
    Fresh,
    /// Continue an existing provider conversation.
    Resume { provider_session_id: String },
    /// New conversation seeded with copied prior context.
    Seeded { context: String },
}

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub session_id: Uuid,
    pub provider: ProviderKind,
    pub prompt: String,
    pub workdir: String,
    pub model: Option<String>,
    /// Files the agent should look at first; passed through to the CLI.
    pub files: Vec<String>,
    pub resume: ResumeDirective,
}

#[derive(Debug, Clone)]
pub struct SpawnResult {
    /// The external conversation handle for this run.
    pub provider_session_id: String,
    pub pid: Option<u32>,
}

/// How a watched process ended.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter trait
// ---------------------------------------------------------------------------

/// Process control for the external agent CLI, keyed by session id.
///
/// The lifecycle manager owns all state decisions; adapters only start,
/// signal, and observe processes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Spawn or resume the agent process. Returning `Ok` confirms the
    /// spawn; the manager transitions the session to running.
    async fn start(&self, spec: &SpawnSpec) -> Result<SpawnResult>;

    /// Ask the process to terminate. Cooperative and best-effort.
    async fn stop(&self, session_id: Uuid) -> Result<()>;

    /// Best-effort suspension. Pause is orchestrator-side bookkeeping;
    /// returns `false` when the provider cannot actually suspend, which
    /// is not an error.
    async fn pause(&self, session_id: Uuid) -> Result<bool>;

    /// Counterpart to [`pause`]; same best-effort contract.
    async fn resume(&self, session_id: Uuid) -> Result<bool>;

    /// Write a line of user input to the process.
    async fn send_input(&self, session_id: Uuid, text: &str) -> Result<()>;

    async fn is_running(&self, session_id: Uuid) -> bool;

    /// Block until the process exits. Used by the manager's watch task.
    async fn wait(&self, session_id: Uuid) -> Result<ProcessExit>;
}

// ---------------------------------------------------------------------------
// CLI command table
// ---------------------------------------------------------------------------

/// The binary a provider runs as.
pub fn binary_name(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Claude => "claude",
        ProviderKind::Codex => "codex",
        ProviderKind::Gemini => "gemini",
        ProviderKind::OpenCode => "opencode",
    }
}

/// Arguments for launching `provider` with the given spec.
pub fn build_args(provider: ProviderKind, spec: &SpawnSpec) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match provider {
        ProviderKind::Claude => {
            args.push("--dangerously-skip-permissions".into());
            if let ResumeDirective::Resume { provider_session_id } = &spec.resume {
                args.push("--resume".into());
                args.push(provider_session_id.clone());
            }
            if let Some(model) = &spec.model {
                args.push("--model".into());
                args.push(model.clone());
            }
            args.push("-p".into());
            args.push(spec.prompt.clone());
        }
        ProviderKind::Codex => {
            args.push("--approval-mode".into());
            args.push("full-auto".into());
            args.push("-q".into());
            args.push(spec.prompt.clone());
        }
        ProviderKind::Gemini => {
            args.push("-p".into());
            args.push(spec.prompt.clone());
        }
        ProviderKind::OpenCode => {
            args.push(spec.prompt.clone());
        }
    }
    args
}

// ---------------------------------------------------------------------------
// CliProviderAdapter
// ---------------------------------------------------------------------------

struct ManagedProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Runs agent CLIs as plain child processes with piped stdio.
pub struct CliProviderAdapter {
    processes: DashMap<Uuid, ManagedProcess>,
}

impl CliProviderAdapter {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }
}

impl Default for CliProviderAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for CliProviderAdapter {
    async fn start(&self, spec: &SpawnSpec) -> Result<SpawnResult> {
        let binary = binary_name(spec.provider);
        let args = build_args(spec.provider, spec);
        info!(
            session = %spec.session_id,
            provider = %spec.provider,
            cli = binary,
            "spawning agent process"
        );

        let mut command = tokio::process::Command::new(binary);
        command
            .args(&args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let ResumeDirective::Seeded { context } = &spec.resume {
            command.env("AGENT_SEED_CONTEXT", context);
        }

        if !spec.files.is_empty() {
            command.env("AGENT_FOCUS_FILES", spec.files.join(":"));
        }

        let mut child = command.spawn().map_err(|e| AdapterError::Spawn(e.to_string()))?;
        let pid = child.id();
        let stdin = child.stdin.take();

        let provider_session_id = match &spec.resume {
            ResumeDirective::Resume { provider_session_id } => provider_session_id.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        self.processes
            .insert(spec.session_id, ManagedProcess { child, stdin });
        Ok(SpawnResult {
            provider_session_id,
            pid,
        })
    }

    async fn stop(&self, session_id: Uuid) -> Result<()> {
        let mut entry = self
            .processes
            .get_mut(&session_id)
            .ok_or(AdapterError::NotRunning(session_id))?;
        debug!(session = %session_id, "signalling agent process to stop");
        entry.child.start_kill()?;
        Ok(())
    }

    async fn pause(&self, session_id: Uuid) -> Result<bool> {
        if !self.processes.contains_key(&session_id) {
            return Err(AdapterError::NotRunning(session_id));
        }
        // No portable suspension for arbitrary CLIs; the session-level
        // pause is bookkeeping only.
        warn!(session = %session_id, "pause is orchestrator-side only for CLI providers");
        Ok(false)
    }

    async fn resume(&self, session_id: Uuid) -> Result<bool> {
        if !self.processes.contains_key(&session_id) {
            return Err(AdapterError::NotRunning(session_id));
        }
        Ok(false)
    }

    async fn send_input(&self, session_id: Uuid, text: &str) -> Result<()> {
        let mut entry = self
            .processes
            .get_mut(&session_id)
            .ok_or(AdapterError::NotRunning(session_id))?;
        let stdin = entry
            .stdin
            .as_mut()
            .ok_or(AdapterError::NotRunning(session_id))?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn is_running(&self, session_id: Uuid) -> bool {
        match self.processes.get_mut(&session_id) {
            Some(mut entry) => matches!(entry.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn wait(&self, session_id: Uuid) -> Result<ProcessExit> {
        // Take the process out of the map so the wait does not hold a
        // map lock across the await.
        let (_, mut managed) = self
            .processes
            .remove(&session_id)
            .ok_or(AdapterError::NotRunning(session_id))?;
        let status = managed.child.wait().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}

// ---------------------------------------------------------------------------
// StubAdapter (tests and dry runs)
// ---------------------------------------------------------------------------

/// Controllable in-memory adapter: spawns nothing, records calls, and
/// lets callers script process exits.
#[derive(Default)]
pub struct StubAdapter {
    pub fail_spawn: bool,
    specs: std::sync::Mutex<Vec<SpawnSpec>>,
    inputs: std::sync::Mutex<Vec<(Uuid, String)>>,
    exits: DashMap<Uuid, flume::Sender<ProcessExit>>,
    waiters: DashMap<Uuid, flume::Receiver<ProcessExit>>,
    counter: std::sync::atomic::AtomicU64,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    /// Every spec passed to `start`, in order.
    pub fn spawn_specs(&self) -> Vec<SpawnSpec> {
        self.specs.lock().expect("lock poisoned").clone()
    }

    pub fn sent_inputs(&self) -> Vec<(Uuid, String)> {
        self.inputs.lock().expect("lock poisoned").clone()
    }

    /// Script the process exit for a session; wakes any watcher.
    pub fn finish(&self, session_id: Uuid, code: i32) {
        if let Some(tx) = self.exits.get(&session_id) {
            let _ = tx.send(ProcessExit { code: Some(code) });
        }
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    async fn start(&self, spec: &SpawnSpec) -> Result<SpawnResult> {
        if self.fail_spawn {
            return Err(AdapterError::Spawn("stub spawn failure".into()));
        }
        self.specs.lock().expect("lock poisoned").push(spec.clone());

        let (tx, rx) = flume::bounded(1);
        self.exits.insert(spec.session_id, tx);
        self.waiters.insert(spec.session_id, rx);

        let provider_session_id = match &spec.resume {
            ResumeDirective::Resume { provider_session_id } => provider_session_id.clone(),
            _ => {
                let n = self
                    .counter
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                format!("prov-{n}")
            }
        };
        Ok(SpawnResult {
            provider_session_id,
            pid: None,
        })
    }

    async fn stop(&self, session_id: Uuid) -> Result<()> {
        self.finish(session_id, -1);
        Ok(())
    }

    async fn pause(&self, _session_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn resume(&self, _session_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn send_input(&self, session_id: Uuid, text: &str) -> Result<()> {
        self.inputs
            .lock()
            .expect("lock poisoned")
            .push((session_id, text.to_string()));
        Ok(())
    }

    async fn is_running(&self, session_id: Uuid) -> bool {
        self.exits.contains_key(&session_id)
    }

    async fn wait(&self, session_id: Uuid) -> Result<ProcessExit> {
        let rx = self
            .waiters
            .remove(&session_id)
            .map(|(_, rx)| rx)
            .ok_or(AdapterError::NotRunning(session_id))?;
        let exit = rx
            .recv_async()
            .await
            .unwrap_or(ProcessExit { code: Some(-1) });
        self.exits.remove(&session_id);
        Ok(exit)
    }
}
