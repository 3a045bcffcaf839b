use std::sync::Arc;

use fm_gate::git::{
    CommitApprovalStatus, CommitBackend, DiffOperation, DiffRecord, Git2Backend, GitApprovalError,
    GitApprovalQueue, MemoryBackend,
};
use fm_hooks::executor::HookExecutor;
use fm_hooks::registry::{HookRegistry, MemoryHookStore};
use uuid::Uuid;

fn hooks() -> Arc<HookExecutor> {
    let registry = Arc::new(HookRegistry::new(Arc::new(MemoryHookStore::new())));
    Arc::new(HookExecutor::new(registry))
}

fn queue_with(backend: Arc<dyn CommitBackend>) -> GitApprovalQueue {
    GitApprovalQueue::new(backend, hooks())
}

fn three_diffs() -> Vec<DiffRecord> {
    vec![
        DiffRecord::new("src/lib.rs", DiffOperation::Update),
        DiffRecord::new("src/new_module.rs", DiffOperation::Create),
        DiffRecord::new("docs/old.md", DiffOperation::Delete),
    ]
}

#[tokio::test]
async fn approve_commits_and_stores_sha() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = queue_with(backend.clone());

    let approval = queue
        .create(Uuid::new_v4(), Uuid::new_v4(), 1, "feat: add module", three_diffs(), 40, 7)
        .await;
    assert_eq!(approval.status, CommitApprovalStatus::Pending);
    assert_eq!(approval.diff_summary.files, 3);
    assert!(approval.commit_sha.is_none());

    let approved = queue.approve(approval.id).await.unwrap();
    assert_eq!(approved.status, CommitApprovalStatus::Approved);
    assert!(approved.commit_sha.is_some());
    assert!(approved.diffs.iter().all(|d| d.applied));
    assert_eq!(backend.commit_count(), 1);
}

#[tokio::test]
async fn reject_with_discard_reverts_every_diff() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = queue_with(backend.clone());

    let approval = queue
        .create(Uuid::new_v4(), Uuid::new_v4(), 2, "wip", three_diffs(), 10, 2)
        .await;

    let (rejected, report) = queue.reject(approval.id, true).await.unwrap();
    assert_eq!(rejected.status, CommitApprovalStatus::Rejected);

    let report = report.unwrap();
    assert_eq!(report.reverted, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|r| r.success));
    assert_eq!(backend.reverted_diffs().len(), 3);
    assert_eq!(backend.commit_count(), 0);
}

#[tokio::test]
async fn partial_revert_failure_is_visible_per_diff() {
    let mut backend = MemoryBackend::new();
    backend.fail_paths = vec!["src/new_module.rs".into()];
    let queue = queue_with(Arc::new(backend));

    let approval = queue
        .create(Uuid::new_v4(), Uuid::new_v4(), 1, "wip", three_diffs(), 10, 2)
        .await;

    let (_, report) = queue.reject(approval.id, true).await.unwrap();
    let report = report.unwrap();
    assert_eq!(report.reverted, 2);
    assert_eq!(report.failed, 1);

    let failed = report.results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.file_path, "src/new_module.rs");
    assert_eq!(failed.operation, DiffOperation::Create);
    assert!(failed.error.as_deref().unwrap().contains("simulated"));
}

#[tokio::test]
async fn reject_without_discard_leaves_changes_alone() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = queue_with(backend.clone());

    let approval = queue
        .create(Uuid::new_v4(), Uuid::new_v4(), 1, "wip", three_diffs(), 5, 0)
        .await;
    let (rejected, report) = queue.reject(approval.id, false).await.unwrap();
    assert_eq!(rejected.status, CommitApprovalStatus::Rejected);
    assert!(report.is_none());
    assert!(backend.reverted_diffs().is_empty());
}

#[tokio::test]
async fn resolved_approval_rejects_further_decisions() {
    let queue = queue_with(Arc::new(MemoryBackend::new()));
    let approval = queue
        .create(Uuid::new_v4(), Uuid::new_v4(), 1, "done", three_diffs(), 1, 1)
        .await;

    queue.approve(approval.id).await.unwrap();
    assert!(matches!(
        queue.approve(approval.id).await,
        Err(GitApprovalError::AlreadyResolved(_))
    ));
    assert!(matches!(
        queue.reject(approval.id, true).await,
        Err(GitApprovalError::AlreadyResolved(_))
    ));
}

#[tokio::test]
async fn unknown_approval_is_not_found() {
    let queue = queue_with(Arc::new(MemoryBackend::new()));
    assert!(matches!(
        queue.approve(Uuid::new_v4()).await,
        Err(GitApprovalError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Git2Backend against a real repository
// ---------------------------------------------------------------------------

fn init_repo(dir: &std::path::Path) -> git2::Repository {
    let repo = git2::Repository::init(dir).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "tester").unwrap();
        config.set_str("user.email", "tester@localhost").unwrap();
    }
    repo
}

#[tokio::test]
async fn git2_backend_commits_files() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();

    let backend = Git2Backend::new(dir.path());
    let sha = backend.commit("initial", &["a.txt".into()]).await.unwrap();
    assert_eq!(sha.len(), 40);

    // The commit is reachable and contains the file.
    let repo = git2::Repository::open(dir.path()).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.id().to_string(), sha);
    assert_eq!(head.message().unwrap(), "initial");
    assert!(head.tree().unwrap().get_name("a.txt").is_some());
}

#[tokio::test]
async fn git2_backend_reverts_update_and_create() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("a.txt"), "original\n").unwrap();

    let backend = Git2Backend::new(dir.path());
    backend.commit("initial", &["a.txt".into()]).await.unwrap();

    // An agent edits a tracked file and adds a new one.
    std::fs::write(dir.path().join("a.txt"), "mutated\n").unwrap();
    std::fs::write(dir.path().join("b.txt"), "new\n").unwrap();

    let update = DiffRecord::new("a.txt", DiffOperation::Update);
    backend.revert(&update).await.unwrap();
    let restored = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
    assert_eq!(restored, "original\n");

    let create = DiffRecord::new("b.txt", DiffOperation::Create);
    backend.revert(&create).await.unwrap();
    assert!(!dir.path().join("b.txt").exists());
}
