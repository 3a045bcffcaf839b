use std::sync::Arc;
use std::time::Duration;

use fm_core::config::ProvidersConfig;
use fm_core::store::{MemorySessionStore, MemoryTaskStore, TaskStore};
use fm_core::types::{ProviderKind, ResumeMode, SessionStatus, Task};
use fm_hooks::executor::HookExecutor;
use fm_hooks::registry::{HookRegistry, MemoryHookStore};
use fm_session::adapter::{ResumeDirective, StubAdapter};
use fm_session::manager::{SessionError, SessionLifecycleManager, StartOptions};
use uuid::Uuid;

struct Fixture {
    manager: SessionLifecycleManager,
    adapter: Arc<StubAdapter>,
    tasks: Arc<MemoryTaskStore>,
    task_id: Uuid,
}

async fn fixture_with(adapter: StubAdapter) -> Fixture {
    let tasks = Arc::new(MemoryTaskStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let registry = Arc::new(HookRegistry::new(Arc::new(MemoryHookStore::new())));
    let hooks = Arc::new(HookExecutor::new(registry));
    let adapter = Arc::new(adapter);

    let mut task = Task::new(Uuid::new_v4(), "implement parser");
    task.description = Some("implement the parser module".into());
    let task_id = task.id;
    tasks.save(task).await.unwrap();

    let manager = SessionLifecycleManager::new(
        Arc::clone(&tasks) as Arc<dyn fm_core::store::TaskStore>,
        sessions,
        Arc::clone(&adapter) as Arc<dyn fm_session::adapter::ProviderAdapter>,
        hooks,
        ProvidersConfig::default(),
    );
    Fixture {
        manager,
        adapter,
        tasks,
        task_id,
    }
}

async fn fixture() -> Fixture {
    fixture_with(StubAdapter::new()).await
}

/// Poll until the session reaches `status` or the deadline passes.
async fn wait_for_status(fx: &Fixture, id: Uuid, status: SessionStatus) {
    for _ in 0..100 {
        if fx.manager.get(id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session never reached {status}, stuck at {}",
        fx.manager.get(id).await.unwrap().status
    );
}

#[tokio::test]
async fn start_runs_after_confirmed_spawn() {
    let fx = fixture().await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();

    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.attempt_number, 1);
    assert!(session.provider_session_id.is_some());
    assert!(session.started_at.is_some());
    assert!(session.resume_mode.is_none());
    assert!(session.resumed_from_session_id.is_none());

    let specs = fx.adapter.spawn_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].prompt, "implement the parser module");
    assert_eq!(specs[0].resume, ResumeDirective::Fresh);
}

#[tokio::test]
async fn start_passes_overrides_to_the_adapter() {
    let fx = fixture().await;
    fx.manager
        .start(
            fx.task_id,
            StartOptions {
                prompt: Some("fix the flaky test".into()),
                model: Some("opus".into()),
                provider: Some(ProviderKind::Codex),
                files: vec!["tests/flaky.rs".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let spec = &fx.adapter.spawn_specs()[0];
    assert_eq!(spec.prompt, "fix the flaky test");
    assert_eq!(spec.model.as_deref(), Some("opus"));
    assert_eq!(spec.provider, ProviderKind::Codex);
    assert_eq!(spec.files, vec!["tests/flaky.rs".to_string()]);
}

#[tokio::test]
async fn second_start_conflicts_naming_existing_session() {
    let fx = fixture().await;
    let first = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();

    let err = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap_err();
    match err {
        SessionError::Conflict { task_id, existing } => {
            assert_eq!(task_id, fx.task_id);
            assert_eq!(existing, first.id);
        }
        other => panic!("expected conflict, got {other}"),
    }
}

#[tokio::test]
async fn retry_preserves_provider_session_id() {
    let fx = fixture().await;
    let first = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    let psid = first.provider_session_id.clone().unwrap();

    fx.adapter.finish(first.id, 0);
    wait_for_status(&fx, first.id, SessionStatus::Completed).await;

    let retry = fx
        .manager
        .start(
            fx.task_id,
            StartOptions {
                resume_mode: Some(ResumeMode::Retry),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(retry.provider_session_id.as_deref(), Some(psid.as_str()));
    assert_eq!(retry.resumed_from_session_id, Some(first.id));
    assert_eq!(retry.attempt_number, 2);

    let task = fx.tasks.find_by_id(fx.task_id).await.unwrap();
    assert_eq!(task.counters.attempts, 2);
    assert_eq!(task.counters.retries, 1);
}

#[tokio::test]
async fn renew_starts_a_fresh_conversation() {
    let fx = fixture().await;
    let first = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    let first_psid = first.provider_session_id.clone().unwrap();

    fx.adapter.finish(first.id, 0);
    wait_for_status(&fx, first.id, SessionStatus::Completed).await;

    let renewed = fx
        .manager
        .start(
            fx.task_id,
            StartOptions {
                resume_mode: Some(ResumeMode::Renew),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Renew never links back and never reuses the conversation.
    assert!(renewed.resumed_from_session_id.is_none());
    assert_ne!(renewed.provider_session_id.unwrap(), first_psid);
    assert_eq!(renewed.attempt_number, 2);

    let task = fx.tasks.find_by_id(fx.task_id).await.unwrap();
    assert_eq!(task.counters.renews, 1);
}

#[tokio::test]
async fn fork_seeds_from_the_source_session() {
    let fx = fixture().await;
    let first = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    fx.adapter.finish(first.id, 1);
    wait_for_status(&fx, first.id, SessionStatus::Failed).await;

    let fork = fx
        .manager
        .start(
            fx.task_id,
            StartOptions {
                resume_mode: Some(ResumeMode::Fork),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(fork.resumed_from_session_id, Some(first.id));
    assert_ne!(fork.provider_session_id, first.provider_session_id);

    let specs = fx.adapter.spawn_specs();
    match &specs[1].resume {
        ResumeDirective::Seeded { context } => {
            assert!(context.contains(&first.id.to_string()));
        }
        other => panic!("expected seeded directive, got {other:?}"),
    }

    let task = fx.tasks.find_by_id(fx.task_id).await.unwrap();
    assert_eq!(task.counters.forks, 1);
}

#[tokio::test]
async fn retry_without_prior_session_is_rejected() {
    let fx = fixture().await;
    let err = fx
        .manager
        .start(
            fx.task_id,
            StartOptions {
                resume_mode: Some(ResumeMode::Retry),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoResumeSource(_)));
}

#[tokio::test]
async fn spawn_failure_fails_the_session_without_erroring() {
    let fx = fixture_with(StubAdapter::failing()).await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.ended_at.is_some());
}

#[tokio::test]
async fn pause_only_from_running() {
    let fx = fixture().await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();

    let paused = fx.manager.pause(session.id).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);

    // Pausing again is an invalid transition, state unchanged.
    let err = fx.manager.pause(session.id).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition(_)));
    assert_eq!(
        fx.manager.get(session.id).await.unwrap().status,
        SessionStatus::Paused
    );

    let resumed = fx.manager.resume(session.id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Running);
}

#[tokio::test]
async fn resume_only_from_paused() {
    let fx = fixture().await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    let err = fx.manager.resume(session.id).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition(_)));
}

#[tokio::test]
async fn cancel_is_idempotent_and_tolerates_completion_races() {
    let fx = fixture().await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();

    let cancelled = fx.manager.cancel(session.id).await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    // Second cancel: no-op, not an error.
    let again = fx.manager.cancel(session.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Cancelled);

    // A process exit arriving after cancellation does not overwrite it.
    let finished = fx
        .manager
        .finish(session.id, fm_session::adapter::ProcessExit { code: Some(0) })
        .await
        .unwrap();
    assert_eq!(finished.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn process_exit_completes_or_fails_the_session() {
    let fx = fixture().await;
    let ok = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();
    fx.adapter.finish(ok.id, 0);
    wait_for_status(&fx, ok.id, SessionStatus::Completed).await;

    let bad = fx
        .manager
        .start(
            fx.task_id,
            StartOptions {
                resume_mode: Some(ResumeMode::Renew),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    fx.adapter.finish(bad.id, 2);
    wait_for_status(&fx, bad.id, SessionStatus::Failed).await;
}

#[tokio::test]
async fn input_only_reaches_running_sessions() {
    let fx = fixture().await;
    let session = fx.manager.start(fx.task_id, StartOptions::default()).await.unwrap();

    fx.manager.send_input(session.id, "continue").await.unwrap();
    assert_eq!(
        fx.adapter.sent_inputs(),
        vec![(session.id, "continue".to_string())]
    );

    fx.manager.pause(session.id).await.unwrap();
    assert!(matches!(
        fx.manager.send_input(session.id, "more").await,
        Err(SessionError::NotRunning(_))
    ));
}

#[tokio::test]
async fn task_events_reach_matching_hooks() {
    let registry = Arc::new(HookRegistry::new(Arc::new(MemoryHookStore::new())));
    let (tx, rx) = flume::unbounded();
    let executor = HookExecutor::new(Arc::clone(&registry)).with_channel_sender(tx);

    let mut created_hook = fm_hooks::model::Hook::new(
        "on-created",
        fm_hooks::model::LifecycleEvent::TaskCreated,
        fm_hooks::model::HookConfig::Websocket {
            channel: "tasks".into(),
        },
    );
    created_hook.priority = 0;
    registry.create(created_hook).await.unwrap();

    let mut done_hook = fm_hooks::model::Hook::new(
        "on-done",
        fm_hooks::model::LifecycleEvent::TaskStatusChange,
        fm_hooks::model::HookConfig::Websocket {
            channel: "tasks".into(),
        },
    );
    done_hook.filters.statuses = Some(vec!["done".into()]);
    registry.create(done_hook).await.unwrap();

    let mut task = Task::new(Uuid::new_v4(), "evented");
    fm_session::manager::emit_task_created(&executor, &task).await;
    let published = rx.recv_async().await.unwrap();
    assert_eq!(published.channel, "tasks");
    assert_eq!(published.payload["event"], "task:created");

    // A status change that misses the filter dispatches nothing.
    task.status = fm_core::types::TaskStatus::InProgress;
    fm_session::manager::emit_task_status_change(&executor, &task, "todo").await;
    assert!(rx.try_recv().is_err());

    task.status = fm_core::types::TaskStatus::Done;
    fm_session::manager::emit_task_status_change(&executor, &task, "in_progress").await;
    let published = rx.recv_async().await.unwrap();
    assert_eq!(published.payload["status"], "done");
}

#[tokio::test]
async fn attempt_numbers_strictly_increase() {
    let fx = fixture().await;
    let mut previous = 0;
    for mode in [None, Some(ResumeMode::Renew), Some(ResumeMode::Fork), Some(ResumeMode::Retry)] {
        let session = fx
            .manager
            .start(
                fx.task_id,
                StartOptions {
                    resume_mode: mode,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(session.attempt_number > previous);
        previous = session.attempt_number;
        fx.adapter.finish(session.id, 0);
        wait_for_status(&fx, session.id, SessionStatus::Completed).await;
    }

    let sessions = fx.manager.list_for_task(fx.task_id).await.unwrap();
    assert_eq!(sessions.len(), 4);
    assert_eq!(sessions.last().unwrap().provider, ProviderKind::Claude);
}
