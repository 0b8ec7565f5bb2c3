//! End-to-end run executor traces: planning, fallback, approvals, and
//! cancellation.

mod common;

use std::sync::Arc;

use common::*;
use tether_domain::event::kind;
use tether_domain::run::{RunStatus, StepStatus};
use tether_engine::RunExecutor;
use tether_store::{Decision, Store};

fn executor(h: &Harness) -> Arc<RunExecutor> {
    RunExecutor::new(h.store.clone(), h.kit.clone(), model_policy())
}

fn plan_script(steps_json: &str) -> Vec<tether_providers::ModelChunk> {
    vec![text_chunk(steps_json), done_chunk()]
}

async fn create_run(h: &Harness) -> String {
    let spec_path = h.workspace.path().join("SPEC.md");
    std::fs::write(&spec_path, "# Goal\nship\n").unwrap();
    h.store
        .create_run(&h.workspace_path(), &spec_path.to_string_lossy())
        .await
        .unwrap()
        .id
}

fn run_status(store: &Store, run_id: &str) -> RunStatus {
    store.get_run(run_id).unwrap().status
}

#[tokio::test]
async fn planned_command_steps_succeed() {
    let h = Harness::new(vec![plan_script(
        r#"[
            {"title": "Greet", "type": "command", "command": "echo hello"},
            {"title": "Note", "type": "note"}
        ]"#,
    )]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;

    exec.start_run(&run_id).unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.model.as_deref(), Some("mock-model"));
    assert_eq!(run.steps.len(), 2);
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Succeeded));

    let kinds = event_kinds(&h.store, &run_id);
    assert_eq!(kinds[0], kind::RUN_CREATED);
    assert!(kinds.contains(&kind::RUN_STARTED.to_string()));
    assert!(kinds.contains(&kind::MODEL_RESOLVED.to_string()));
    assert!(kinds.contains(&kind::PLAN_GENERATED.to_string()));
    assert_eq!(kinds.last().unwrap(), kind::RUN_COMPLETED);

    let all = events(&h.store, &run_id);
    let completed = all
        .iter()
        .find(|e| e.kind == kind::STEP_COMPLETED)
        .expect("step_completed");
    assert!(completed.data_str("stdout").unwrap().contains("hello"));
    assert_eq!(
        completed.data.as_ref().unwrap()["exit_code"],
        serde_json::json!(0)
    );
}

#[tokio::test]
async fn unusable_plan_falls_back_to_static_steps() {
    let h = Harness::new(vec![vec![text_chunk("I cannot plan this."), done_chunk()]]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;

    exec.start_run(&run_id).unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].command.as_deref(), Some("make test"));
    assert_eq!(run.steps[1].command.as_deref(), Some("make diagrams"));

    let all = events(&h.store, &run_id);
    let planned = all
        .iter()
        .find(|e| e.kind == kind::PLAN_GENERATED)
        .unwrap();
    assert_eq!(
        planned.data.as_ref().unwrap()["fallback"],
        serde_json::json!(true)
    );

    // No Makefile in the workspace: both steps fail, and plain command
    // failures do not abort the run early.
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Failed));
    let failed_steps = all.iter().filter(|e| e.kind == kind::STEP_FAILED).count();
    assert_eq!(failed_steps, 2);
}

#[tokio::test]
async fn approval_denied_skips_step() {
    let h = Harness::new(vec![plan_script(
        r#"[
            {"title": "Dangerous", "type": "command", "command": "echo risky", "needs_approval": true},
            {"title": "Safe", "type": "command", "command": "echo safe"}
        ]"#,
    )]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;
    exec.start_run(&run_id).unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("waiting for approval", move || {
        run_status(&store, &r) == RunStatus::WaitingApproval
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    let gated = &run.steps[0];
    assert_eq!(gated.status, StepStatus::WaitingApproval);
    h.store
        .approve(&run_id, &gated.id, Decision::deny(Some("not today".into())))
        .unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    // Denial is not a failure: the gated step is skipped and the run
    // continues.
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps[0].status, StepStatus::Skipped);
    assert_eq!(run.steps[1].status, StepStatus::Succeeded);

    let kinds = event_kinds(&h.store, &run_id);
    assert!(kinds.contains(&kind::APPROVAL_DENIED.to_string()));
    assert!(kinds.contains(&kind::STEP_SKIPPED.to_string()));
}

#[tokio::test]
async fn approved_step_failure_fails_the_run() {
    let h = Harness::new(vec![plan_script(
        r#"[
            {"title": "Broken infra", "type": "command", "command": "exit 3", "needs_approval": true},
            {"title": "Never runs", "type": "command", "command": "echo nope"}
        ]"#,
    )]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;
    exec.start_run(&run_id).unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("waiting for approval", move || {
        run_status(&store, &r) == RunStatus::WaitingApproval
    })
    .await;
    let gated_id = h.store.get_run(&run_id).unwrap().steps[0].id.clone();
    h.store
        .approve(&run_id, &gated_id, Decision::approve())
        .unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("Broken infra"));
    assert_eq!(run.steps[0].status, StepStatus::Failed);
    // The second step never started.
    assert_eq!(run.steps[1].status, StepStatus::Pending);
    let kinds = event_kinds(&h.store, &run_id);
    assert_eq!(kinds.last().unwrap(), kind::RUN_FAILED);
}

#[tokio::test]
async fn cancellation_stops_a_running_step() {
    let h = Harness::new(vec![plan_script(
        r#"[{"title": "Long", "type": "command", "command": "sleep 30"}]"#,
    )]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;
    exec.start_run(&run_id).unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("step running", move || {
        store
            .get_run(&r)
            .unwrap()
            .steps
            .first()
            .map(|s| s.status == StepStatus::Running)
            .unwrap_or(false)
    })
    .await;

    h.store.cancel_run(&run_id).await.unwrap();

    let store = h.store.clone();
    let r = run_id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    let kinds = event_kinds(&h.store, &run_id);
    assert_eq!(kinds.last().unwrap(), kind::RUN_CANCELED);
}

#[tokio::test]
async fn starting_twice_is_a_conflict() {
    let h = Harness::new(vec![plan_script(
        r#"[{"title": "Slowish", "type": "command", "command": "sleep 1"}]"#,
    )]);
    let exec = executor(&h);
    let run_id = create_run(&h).await;

    exec.start_run(&run_id).unwrap();
    let err = exec.start_run(&run_id).unwrap_err();
    assert!(matches!(err, tether_domain::Error::Conflict(_)));
}

#[tokio::test]
async fn missing_spec_file_fails_the_run() {
    let h = Harness::new(vec![]);
    let exec = executor(&h);
    let run = h
        .store
        .create_run(&h.workspace_path(), "/nonexistent/spec.md")
        .await
        .unwrap();

    exec.start_run(&run.id).unwrap();

    let store = h.store.clone();
    let r = run.id.clone();
    wait_until("run terminal", move || {
        run_status(&store, &r).is_terminal()
    })
    .await;

    let run = h.store.get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("cannot read spec"));
}
