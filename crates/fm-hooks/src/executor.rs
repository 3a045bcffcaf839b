use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{Hook, HookConfig, HookContext, Result};
use crate::registry::HookRegistry;

// ---------------------------------------------------------------------------
// HookExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of executing one hook. A failure or timeout is recorded here
/// and never aborts sibling hooks or the triggering operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookExecutionResult {
    pub hook_id: Uuid,
    pub hook_name: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl HookExecutionResult {
    fn new(hook: &Hook) -> Self {
        Self {
            hook_id: hook.id,
            hook_name: hook.name.clone(),
            success: false,
            output: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// A payload published to a pub/sub channel by a websocket-type hook.
/// The streaming bridge drains these and fans them out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPublish {
    pub channel: String,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// HookExecutor
// ---------------------------------------------------------------------------

/// Executes matched hooks via per-type strategies, enforcing timeout and
/// blocking semantics and isolating failures.
pub struct HookExecutor {
    registry: Arc<HookRegistry>,
    http: reqwest::Client,
    channel_tx: Option<flume::Sender<ChannelPublish>>,
    /// Completed results of fire-and-forget hooks, most recent last.
    results: Arc<Mutex<VecDeque<HookExecutionResult>>>,
    result_log_size: usize,
}

impl HookExecutor {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
            channel_tx: None,
            results: Arc::new(Mutex::new(VecDeque::new())),
            result_log_size: 256,
        }
    }

    /// Attach the pub/sub sender used by websocket-type hooks.
    pub fn with_channel_sender(mut self, tx: flume::Sender<ChannelPublish>) -> Self {
        self.channel_tx = Some(tx);
        self
    }

    pub fn with_result_log_size(mut self, size: usize) -> Self {
        self.result_log_size = size;
        self
    }

    /// Snapshot of asynchronously recorded results (non-blocking hooks).
    pub fn recorded_results(&self) -> Vec<HookExecutionResult> {
        self.results.lock().expect("result log poisoned").iter().cloned().collect()
    }

    /// Dispatch `ctx` to every matching hook, in ascending-priority order.
    ///
    /// Returns exactly one result per matched hook. Blocking hooks are
    /// awaited before the next hook runs; non-blocking hooks are spawned
    /// and their final result lands in the async result log.
    pub async fn dispatch(&self, ctx: &HookContext) -> Vec<HookExecutionResult> {
        self.dispatch_with_cancel(ctx, None).await
    }

    /// Like [`dispatch`], but a cancellation signal aborts any in-flight
    /// blocking wait. The cancelled hook is recorded as failed; remaining
    /// hooks still run (non-blocking ones are unaffected by design).
    pub async fn dispatch_with_cancel(
        &self,
        ctx: &HookContext,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Vec<HookExecutionResult> {
        let matched = match self.registry.find_matching(ctx).await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(event = %ctx.event, error = %e, "hook matching failed");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(matched.len());
        for hook in matched {
            let result = match &hook.config {
                HookConfig::Websocket { channel } => self.publish(&hook, channel, ctx),
                _ if hook.config.is_blocking() => match cancel.as_mut() {
                    Some(rx) => {
                        let start = Instant::now();
                        tokio::select! {
                            res = execute(self.http.clone(), hook.clone(), ctx.clone()) => res,
                            _ = wait_cancelled(rx) => {
                                let mut res = HookExecutionResult::new(&hook);
                                res.error = Some("cancelled".into());
                                res.duration_ms = start.elapsed().as_millis() as u64;
                                res
                            }
                        }
                    }
                    None => execute(self.http.clone(), hook.clone(), ctx.clone()).await,
                },
                _ => self.spawn_detached(&hook, ctx),
            };

            if !result.success {
                warn!(
                    hook = %result.hook_name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "hook execution failed"
                );
            }
            results.push(result);
        }
        results
    }

    /// Run one hook synchronously for debugging, regardless of its
    /// blocking flag. Does not touch the production dispatch ordering.
    pub async fn test_hook(&self, id: Uuid, ctx: &HookContext) -> Result<HookExecutionResult> {
        let hook = self.registry.get(id).await?;
        match &hook.config {
            HookConfig::Websocket { channel } => Ok(self.publish(&hook, channel, ctx)),
            _ => Ok(execute(self.http.clone(), hook, ctx.clone()).await),
        }
    }

    fn publish(&self, hook: &Hook, channel: &str, ctx: &HookContext) -> HookExecutionResult {
        let start = Instant::now();
        let mut result = HookExecutionResult::new(hook);
        let payload = match serde_json::to_value(ctx) {
            Ok(v) => v,
            Err(e) => {
                result.error = Some(format!("serialization error: {e}"));
                return result;
            }
        };
        match &self.channel_tx {
            Some(tx) => {
                let sent = tx
                    .send(ChannelPublish {
                        channel: channel.to_string(),
                        payload,
                    })
                    .is_ok();
                result.success = sent;
                if sent {
                    result.output = Some(format!("published to {channel}"));
                } else {
                    result.error = Some("pub/sub channel closed".into());
                }
            }
            None => {
                result.error = Some("no pub/sub sender configured".into());
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Fire-and-forget execution: the returned result only acknowledges
    /// the dispatch; the real outcome is recorded in the async log.
    fn spawn_detached(&self, hook: &Hook, ctx: &HookContext) -> HookExecutionResult {
        let mut acked = HookExecutionResult::new(hook);
        acked.success = true;
        acked.output = Some("dispatched".into());

        let http = self.http.clone();
        let hook = hook.clone();
        let ctx = ctx.clone();
        let results = Arc::clone(&self.results);
        let cap = self.result_log_size;
        tokio::spawn(async move {
            let result = execute(http, hook, ctx).await;
            debug!(hook = %result.hook_name, success = result.success, "async hook finished");
            let mut log = results.lock().expect("result log poisoned");
            log.push_back(result);
            while log.len() > cap {
                log.pop_front();
            }
        });

        acked
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

async fn execute(http: reqwest::Client, hook: Hook, ctx: HookContext) -> HookExecutionResult {
    let start = Instant::now();
    let mut result = HookExecutionResult::new(&hook);

    let outcome = match &hook.config {
        HookConfig::Shell {
            command,
            cwd,
            env,
            timeout_secs,
            ..
        } => run_shell(command, cwd.as_deref(), env, *timeout_secs, &ctx).await,
        HookConfig::Http {
            url,
            method,
            headers,
            timeout_secs,
            ..
        } => run_http(&http, url, method, headers, *timeout_secs, &ctx).await,
        HookConfig::Websocket { .. } => Err("websocket hooks are handled inline".to_string()),
    };

    match outcome {
        Ok(output) => {
            result.success = true;
            result.output = Some(output);
        }
        Err(error) => result.error = Some(error),
    }
    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

async fn run_shell(
    command: &str,
    cwd: Option<&str>,
    env: &std::collections::HashMap<String, String>,
    timeout_secs: u64,
    ctx: &HookContext,
) -> std::result::Result<String, String> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(env);
    cmd.env("FOREMAN_EVENT", ctx.event.as_str());
    if let Some(session_id) = ctx.session_id {
        cmd.env("FOREMAN_SESSION_ID", session_id.to_string());
    }
    if let Some(tool) = &ctx.tool_name {
        cmd.env("FOREMAN_TOOL", tool);
    }
    cmd.env(
        "FOREMAN_CONTEXT",
        serde_json::to_string(ctx).unwrap_or_default(),
    );
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| format!("timed out after {timeout_secs}s"))?
        .map_err(|e| format!("spawn failed: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        Err(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            if stderr.is_empty() { stdout } else { stderr }
        ))
    }
}

async fn run_http(
    http: &reqwest::Client,
    url: &str,
    method: &str,
    headers: &std::collections::HashMap<String, String>,
    timeout_secs: u64,
    ctx: &HookContext,
) -> std::result::Result<String, String> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| format!("invalid method: {method}"))?;

    let mut request = http
        .request(method, url)
        .timeout(Duration::from_secs(timeout_secs))
        .json(ctx);
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            format!("timed out after {timeout_secs}s")
        } else {
            format!("request failed: {e}")
        }
    })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(format!("http {status}: {body}"))
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone; cancellation can never arrive.
            std::future::pending::<()>().await;
        }
    }
}
