use std::sync::Arc;

use fm_bridge::http_api::{api_router, ApiState};
use fm_core::config::Config;
use fm_core::types::Task;
use fm_gate::classify::ToolCategory;
use fm_gate::gate::{ApprovalKind, ApprovalPayload};
use fm_gate::git::{DiffOperation, DiffRecord, MemoryBackend};
use fm_session::adapter::StubAdapter;
use serde_json::{json, Value};
use uuid::Uuid;

/// Spin up an API server on a random port, return the base URL plus the
/// shared state and the stub adapter for scripting process exits.
async fn start_test_server() -> (String, Arc<ApiState>, Arc<StubAdapter>) {
    let adapter = Arc::new(StubAdapter::new());
    let state = ApiState::build(
        Config::default(),
        Arc::clone(&adapter) as Arc<dyn fm_session::adapter::ProviderAdapter>,
        Arc::new(MemoryBackend::new()),
    );
    let router = api_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state, adapter)
}

async fn seed_task(state: &ApiState) -> Uuid {
    let task = Task::new(Uuid::new_v4(), "demo task");
    let id = task.id;
    state.tasks.save(task).await.unwrap();
    id
}

#[tokio::test]
async fn test_status_endpoint() {
    let (base, _state, _) = start_test_server().await;

    let resp = reqwest::get(format!("{base}/api/status")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert!(body["version"].is_string());
    assert_eq!(body["active_sessions"], 0);
    assert_eq!(body["hook_count"], 0);
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_hook_crud_round_trip() {
    let (base, _state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    // Create
    let resp = client
        .post(format!("{base}/api/hooks"))
        .json(&json!({
            "name": "notify-end",
            "event": "session:end",
            "config": {"type": "shell", "command": "echo done", "blocking": true},
            "priority": -10
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["name"], "notify-end");
    assert_eq!(created["event"], "session:end");
    assert_eq!(created["priority"], -10);
    let id = created["id"].as_str().unwrap().to_string();

    // List
    let hooks: Vec<Value> = reqwest::get(format!("{base}/api/hooks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hooks.len(), 1);

    // Update
    let resp = client
        .put(format!("{base}/api/hooks/{id}"))
        .json(&json!({"enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["enabled"], false);

    // Delete
    let resp = client
        .delete(format!("{base}/api/hooks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // Gone
    let resp = reqwest::get(format!("{base}/api/hooks/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_malformed_hook_config_is_rejected() {
    let (base, state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    // Shell timeout outside [1, 300]
    let resp = client
        .post(format!("{base}/api/hooks"))
        .json(&json!({
            "name": "bad",
            "event": "session:end",
            "config": {"type": "shell", "command": "echo x", "timeout_secs": 900}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "validation");

    // Unknown event name
    let resp = client
        .post(format!("{base}/api/hooks"))
        .json(&json!({
            "name": "bad",
            "event": "session:started",
            "config": {"type": "websocket", "channel": "x"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Nothing was persisted.
    assert!(state.hooks.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_trigger_returns_ordered_results() {
    let (base, _state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    for (name, priority) in [("second", 5), ("first", -5)] {
        let resp = client
            .post(format!("{base}/api/hooks"))
            .json(&json!({
                "name": name,
                "event": "tool:before",
                "config": {"type": "shell", "command": format!("echo {name}"), "blocking": true},
                "priority": priority,
                "filters": {"tool_names": ["Bash"]}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = client
        .post(format!("{base}/api/hooks/trigger"))
        .json(&json!({"event": "tool:before", "tool_name": "Bash"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let results: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["hook_name"], "first");
    assert_eq!(results[1]["hook_name"], "second");
    assert_eq!(results[0]["success"], true);

    // A non-matching tool name dispatches nothing.
    let resp = client
        .post(format!("{base}/api/hooks/trigger"))
        .json(&json!({"event": "tool:before", "tool_name": "Edit"}))
        .send()
        .await
        .unwrap();
    let results: Vec<Value> = resp.json().await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_hook_test_endpoint() {
    let (base, _state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/api/hooks"))
        .json(&json!({
            "name": "probe",
            "event": "session:end",
            "config": {"type": "shell", "command": "echo probed"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let result: Value = client
        .post(format!("{base}/api/hooks/{id}/test"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["output"], "probed");
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let (base, state, adapter) = start_test_server().await;
    let client = reqwest::Client::new();
    let task_id = seed_task(&state).await;

    // Start
    let resp = client
        .post(format!("{base}/api/tasks/{task_id}/sessions"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    assert_eq!(session["status"], "running");
    assert_eq!(session["attempt_number"], 1);
    let session_id = session["id"].as_str().unwrap().to_string();

    // Concurrent start conflicts, naming the existing session.
    let resp = client
        .post(format!("{base}/api/tasks/{task_id}/sessions"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");
    assert!(body["error"].as_str().unwrap().contains(&session_id));

    // Pause / resume
    let resp = client
        .post(format!("{base}/api/sessions/{session_id}/pause"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let paused: Value = resp.json().await.unwrap();
    assert_eq!(paused["status"], "paused");

    // Pausing a paused session is an invalid transition.
    let resp = client
        .post(format!("{base}/api/sessions/{session_id}/pause"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_transition");

    let resp = client
        .post(format!("{base}/api/sessions/{session_id}/resume"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Stop is idempotent.
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/api/sessions/{session_id}/stop"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let stopped: Value = resp.json().await.unwrap();
        assert_eq!(stopped["status"], "cancelled");
    }

    // Retry after the cancelled attempt.
    let resp = client
        .post(format!("{base}/api/tasks/{task_id}/sessions"))
        .json(&json!({"resume_mode": "retry"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let retry: Value = resp.json().await.unwrap();
    assert_eq!(retry["attempt_number"], 2);
    assert_eq!(retry["resumed_from_session_id"], session_id);
    assert_eq!(retry["provider_session_id"], session["provider_session_id"]);

    let retry_id = retry["id"].as_str().unwrap();
    adapter.finish(retry_id.parse().unwrap(), 0);

    // The chain lists both attempts.
    let sessions: Vec<Value> = reqwest::get(format!("{base}/api/tasks/{task_id}/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_unknown_task_and_session_are_404() {
    let (base, _state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/tasks/{}/sessions", Uuid::new_v4()))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("{base}/api/sessions/{}", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_approval_decision_over_http() {
    let (base, state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    let request = state
        .gate
        .submit(
            Uuid::new_v4(),
            ApprovalKind::Tool,
            ApprovalPayload {
                tool_name: "Bash".into(),
                tool_input: json!({"command": "cargo build"}),
            },
            ToolCategory::RequiresApproval,
        )
        .await;

    let pending: Vec<Value> = reqwest::get(format!("{base}/api/approvals?status=pending"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["payload"]["tool_name"], "Bash");

    let resp = client
        .post(format!("{base}/api/approvals/{}/approve", request.id))
        .json(&json!({"decided_by": "reviewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resolution: Value = resp.json().await.unwrap();
    assert_eq!(resolution["status"], "approved");
    assert_eq!(resolution["decided_by"], "reviewer");

    // A late reject is a no-op returning the original resolution.
    let resp = client
        .post(format!("{base}/api/approvals/{}/reject", request.id))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let late: Value = resp.json().await.unwrap();
    assert_eq!(late["status"], "approved");
}

#[tokio::test]
async fn test_git_approval_flow_over_http() {
    let (base, state, _) = start_test_server().await;
    let client = reqwest::Client::new();

    let diffs = vec![
        DiffRecord::new("src/a.rs", DiffOperation::Update),
        DiffRecord::new("src/b.rs", DiffOperation::Create),
        DiffRecord::new("src/c.rs", DiffOperation::Delete),
    ];
    let approval = state
        .git_approvals
        .create(Uuid::new_v4(), Uuid::new_v4(), 1, "feat: change", diffs, 12, 3)
        .await;

    let listed: Vec<Value> = reqwest::get(format!("{base}/api/git-approvals?status=pending"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["diff_summary"]["files"], 3);

    // Reject with discard: every diff reverts.
    let resp = client
        .post(format!("{base}/api/git-approvals/{}/reject", approval.id))
        .json(&json!({"discard_changes": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["approval"]["status"], "rejected");
    assert_eq!(body["revert_result"]["reverted"], 3);
    assert_eq!(body["revert_result"]["failed"], 0);

    // Approving a resolved approval conflicts.
    let resp = client
        .post(format!("{base}/api/git-approvals/{}/approve", approval.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // A fresh approval can be approved and gets a sha.
    let approval = state
        .git_approvals
        .create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            "feat: keep",
            vec![DiffRecord::new("src/d.rs", DiffOperation::Create)],
            4,
            0,
        )
        .await;
    let resp = client
        .post(format!("{base}/api/git-approvals/{}/approve", approval.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let approved: Value = resp.json().await.unwrap();
    assert_eq!(approved["status"], "approved");
    assert!(approved["commit_sha"].is_string());
}
