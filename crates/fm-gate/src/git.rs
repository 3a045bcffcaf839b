use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use fm_hooks::executor::HookExecutor;
use fm_hooks::model::{HookContext, LifecycleEvent};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOperation {
    Create,
    Update,
    Delete,
}

/// One file-level change awaiting commit approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRecord {
    pub id: Uuid,
    pub file_path: String,
    pub operation: DiffOperation,
    /// Whether the change has been committed.
    pub applied: bool,
}

impl DiffRecord {
    pub fn new(file_path: impl Into<String>, operation: DiffOperation) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path: file_path.into(),
            operation,
            applied: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files: u32,
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A proposed commit awaiting human review. Unlike tool approvals there
/// is no timeout timer; it stays pending until someone decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommitApproval {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub attempt_number: u32,
    pub status: CommitApprovalStatus,
    pub commit_message: String,
    pub files_changed: Vec<String>,
    pub diffs: Vec<DiffRecord>,
    pub diff_summary: DiffSummary,
    pub commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Per-diff outcome of a revert attempt, so partial failures are visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRevertResult {
    pub diff_id: Uuid,
    pub success: bool,
    pub file_path: String,
    pub operation: DiffOperation,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertReport {
    pub reverted: u32,
    pub failed: u32,
    pub results: Vec<DiffRevertResult>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GitApprovalError {
    #[error("commit approval not found: {0}")]
    NotFound(Uuid),
    #[error("commit approval already resolved: {0}")]
    AlreadyResolved(Uuid),
    #[error("commit failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, GitApprovalError>;

// ---------------------------------------------------------------------------
// CommitBackend
// ---------------------------------------------------------------------------

/// Materialises approved commits and reverts rejected diffs.
#[async_trait]
pub trait CommitBackend: Send + Sync {
    /// Stage `files` and create a commit; returns the new commit sha.
    async fn commit(&self, message: &str, files: &[String]) -> std::result::Result<String, String>;

    /// Undo one working-tree change.
    async fn revert(&self, diff: &DiffRecord) -> std::result::Result<(), String>;
}

/// git2-backed commit backend operating on a local repository.
pub struct Git2Backend {
    repo_path: PathBuf,
}

impl Git2Backend {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn signature(repo: &git2::Repository) -> std::result::Result<git2::Signature<'_>, git2::Error> {
        repo.signature()
            .or_else(|_| git2::Signature::now("foreman", "foreman@localhost"))
    }

    fn commit_sync(&self, message: &str, files: &[String]) -> std::result::Result<String, git2::Error> {
        let repo = git2::Repository::open(&self.repo_path)?;
        let mut index = repo.index()?;
        for file in files {
            // add_path handles new and modified files; removed files need
            // the index entry dropped instead.
            let path = Path::new(file);
            if self.repo_path.join(path).exists() {
                index.add_path(path)?;
            } else {
                index.remove_path(path)?;
            }
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Self::signature(&repo)?;

        let parent = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    fn revert_sync(&self, diff: &DiffRecord) -> std::result::Result<(), git2::Error> {
        let repo = git2::Repository::open(&self.repo_path)?;
        match diff.operation {
            DiffOperation::Create => {
                // The file did not exist before; drop it from the tree.
                let target = self.repo_path.join(&diff.file_path);
                std::fs::remove_file(&target)
                    .map_err(|e| git2::Error::from_str(&e.to_string()))?;
            }
            DiffOperation::Update | DiffOperation::Delete => {
                let mut checkout = git2::build::CheckoutBuilder::new();
                checkout.path(diff.file_path.as_str()).force().update_index(true);
                repo.checkout_head(Some(&mut checkout))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommitBackend for Git2Backend {
    async fn commit(&self, message: &str, files: &[String]) -> std::result::Result<String, String> {
        self.commit_sync(message, files).map_err(|e| e.to_string())
    }

    async fn revert(&self, diff: &DiffRecord) -> std::result::Result<(), String> {
        self.revert_sync(diff).map_err(|e| e.to_string())
    }
}

/// In-memory backend for tests: fabricates shas and records reverts.
#[derive(Default)]
pub struct MemoryBackend {
    commits: std::sync::Mutex<Vec<(String, Vec<String>)>>,
    reverted: std::sync::Mutex<Vec<Uuid>>,
    /// Paths whose revert should fail, for partial-failure tests.
    pub fail_paths: Vec<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().expect("lock poisoned").len()
    }

    pub fn reverted_diffs(&self) -> Vec<Uuid> {
        self.reverted.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl CommitBackend for MemoryBackend {
    async fn commit(&self, message: &str, files: &[String]) -> std::result::Result<String, String> {
        let mut commits = self.commits.lock().expect("lock poisoned");
        commits.push((message.to_string(), files.to_vec()));
        Ok(format!("{:040x}", commits.len()))
    }

    async fn revert(&self, diff: &DiffRecord) -> std::result::Result<(), String> {
        if self.fail_paths.iter().any(|p| p == &diff.file_path) {
            return Err(format!("simulated revert failure: {}", diff.file_path));
        }
        self.reverted.lock().expect("lock poisoned").push(diff.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GitApprovalQueue
// ---------------------------------------------------------------------------

/// Commit-time specialization of the approval pattern: diff summaries on
/// creation, per-diff revert reporting on rejection, no timeout.
pub struct GitApprovalQueue {
    backend: Arc<dyn CommitBackend>,
    approvals: DashMap<Uuid, GitCommitApproval>,
    hooks: Arc<HookExecutor>,
    /// Serializes approve/reject so a commit and a revert cannot interleave.
    resolve_lock: Mutex<()>,
}

impl GitApprovalQueue {
    pub fn new(backend: Arc<dyn CommitBackend>, hooks: Arc<HookExecutor>) -> Self {
        Self {
            backend,
            approvals: DashMap::new(),
            hooks,
            resolve_lock: Mutex::new(()),
        }
    }

    /// Register a proposed commit once its session-driven diffs are ready.
    pub async fn create(
        &self,
        task_id: Uuid,
        project_id: Uuid,
        attempt_number: u32,
        commit_message: impl Into<String>,
        diffs: Vec<DiffRecord>,
        additions: u32,
        deletions: u32,
    ) -> GitCommitApproval {
        let files_changed: Vec<String> = diffs.iter().map(|d| d.file_path.clone()).collect();
        let approval = GitCommitApproval {
            id: Uuid::new_v4(),
            task_id,
            project_id,
            attempt_number,
            status: CommitApprovalStatus::Pending,
            commit_message: commit_message.into(),
            diff_summary: DiffSummary {
                files: files_changed.len() as u32,
                additions,
                deletions,
            },
            files_changed,
            diffs,
            commit_sha: None,
            created_at: Utc::now(),
            decided_at: None,
        };
        self.approvals.insert(approval.id, approval.clone());
        info!(approval = %approval.id, task = %task_id, "commit approval created");

        let ctx = HookContext::new(LifecycleEvent::GitCommitCreated)
            .with_task(task_id)
            .with_project(project_id)
            .with_payload(serde_json::to_value(&approval).unwrap_or_default());
        self.hooks.dispatch(&ctx).await;

        approval
    }

    /// Approve: materialise the commit, store the sha, mark diffs applied.
    pub async fn approve(&self, id: Uuid) -> Result<GitCommitApproval> {
        let _guard = self.resolve_lock.lock().await;

        let approval = self.get(id)?;
        if approval.status != CommitApprovalStatus::Pending {
            return Err(GitApprovalError::AlreadyResolved(id));
        }

        let sha = self
            .backend
            .commit(&approval.commit_message, &approval.files_changed)
            .await
            .map_err(GitApprovalError::Backend)?;

        let updated = {
            let mut entry = self
                .approvals
                .get_mut(&id)
                .ok_or(GitApprovalError::NotFound(id))?;
            entry.status = CommitApprovalStatus::Approved;
            entry.commit_sha = Some(sha.clone());
            entry.decided_at = Some(Utc::now());
            for diff in &mut entry.diffs {
                diff.applied = true;
            }
            entry.clone()
        };
        info!(approval = %id, sha = %sha, "commit approved");

        let ctx = HookContext::new(LifecycleEvent::GitCommitApproved)
            .with_task(updated.task_id)
            .with_project(updated.project_id)
            .with_payload(serde_json::to_value(&updated).unwrap_or_default());
        self.hooks.dispatch(&ctx).await;

        Ok(updated)
    }

    /// Reject; with `discard_changes` the materialised diffs are reverted
    /// one by one, and every per-diff outcome is reported.
    pub async fn reject(
        &self,
        id: Uuid,
        discard_changes: bool,
    ) -> Result<(GitCommitApproval, Option<RevertReport>)> {
        let _guard = self.resolve_lock.lock().await;

        let approval = self.get(id)?;
        if approval.status != CommitApprovalStatus::Pending {
            return Err(GitApprovalError::AlreadyResolved(id));
        }

        let report = if discard_changes {
            let mut results = Vec::with_capacity(approval.diffs.len());
            for diff in &approval.diffs {
                let outcome = self.backend.revert(diff).await;
                if let Err(error) = &outcome {
                    warn!(diff = %diff.id, file = %diff.file_path, error, "diff revert failed");
                }
                results.push(DiffRevertResult {
                    diff_id: diff.id,
                    success: outcome.is_ok(),
                    file_path: diff.file_path.clone(),
                    operation: diff.operation,
                    error: outcome.err(),
                });
            }
            let reverted = results.iter().filter(|r| r.success).count() as u32;
            let failed = results.len() as u32 - reverted;
            Some(RevertReport {
                reverted,
                failed,
                results,
            })
        } else {
            None
        };

        let updated = {
            let mut entry = self
                .approvals
                .get_mut(&id)
                .ok_or(GitApprovalError::NotFound(id))?;
            entry.status = CommitApprovalStatus::Rejected;
            entry.decided_at = Some(Utc::now());
            entry.clone()
        };
        info!(approval = %id, discard_changes, "commit rejected");

        Ok((updated, report))
    }

    pub fn get(&self, id: Uuid) -> Result<GitCommitApproval> {
        self.approvals
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(GitApprovalError::NotFound(id))
    }

    pub fn list(&self, status: Option<CommitApprovalStatus>) -> Vec<GitCommitApproval> {
        let mut approvals: Vec<GitCommitApproval> = self
            .approvals
            .iter()
            .map(|a| a.value().clone())
            .filter(|a| status.map_or(true, |s| a.status == s))
            .collect();
        approvals.sort_by_key(|a| a.created_at);
        approvals
    }
}
