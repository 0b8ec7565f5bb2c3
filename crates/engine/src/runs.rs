//! The run executor: plan-then-execute over a spec file.
//!
//! One model call turns the spec into an ordered step list (falling back
//! to a static plan when that fails); steps then execute in order with
//! the approval gate on `needs_approval` steps. Plain step failures mark
//! the step and continue; a failed approval-gated step fails the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use tether_domain::config::ModelPolicy;
use tether_domain::event::{kind, Event};
use tether_domain::id::{self, Prefix};
use tether_domain::run::{RunStatus, Step, StepKind, StepStatus};
use tether_domain::tool::ToolCall;
use tether_domain::{CancelToken, Error, Result};
use tether_providers::{GenerateRequest, ProviderKit, PromptMessage, Resolution};
use tether_store::Store;
use tether_tools::{git::ApplyPatchTool, shell::DiagramTool, Tool, ToolContext};
use tether_workspace::command::{run_command, CommandOutput, RunOptions};

use crate::truncate_str;

const STEP_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_PLAN_STEPS: usize = 32;
const OUTPUT_PREVIEW_CHARS: usize = 2000;

pub struct RunExecutor {
    store: Arc<Store>,
    kit: Arc<ProviderKit>,
    model_policy: ModelPolicy,
    live: Mutex<HashSet<String>>,
}

impl RunExecutor {
    pub fn new(store: Arc<Store>, kit: Arc<ProviderKit>, model_policy: ModelPolicy) -> Arc<Self> {
        Arc::new(Self {
            store,
            kit,
            model_policy,
            live: Mutex::new(HashSet::new()),
        })
    }

    /// Start the run's background worker. Starting a run twice, or a
    /// finished run, is a conflict.
    pub fn start_run(self: &Arc<Self>, run_id: &str) -> Result<()> {
        let run = self.store.get_run(run_id)?;
        if run.status.is_terminal() {
            return Err(Error::Conflict(format!("run {run_id} already finished")));
        }
        {
            let mut live = self.live.lock();
            if !live.insert(run_id.to_string()) {
                return Err(Error::Conflict(format!("run {run_id} already started")));
            }
        }

        let cancel = CancelToken::new();
        self.store.set_cancel(run_id, cancel.clone());

        let executor = self.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let outcome = executor.run_inner(&run_id, &cancel).await;
            match outcome {
                Ok(()) => {}
                Err(Error::Canceled) => {
                    let _ = executor
                        .store
                        .update_run(&run_id, |r| {
                            r.status = RunStatus::Canceled;
                            r.error = Some("canceled".into());
                        })
                        .await;
                    let _ = executor
                        .store
                        .append_event(&run_id, Event::new(kind::RUN_CANCELED))
                        .await;
                    tracing::info!(run_id, "run canceled");
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(run_id, error = %message, "run failed");
                    let error_for_head = message.clone();
                    let _ = executor
                        .store
                        .update_run(&run_id, move |r| {
                            r.status = RunStatus::Failed;
                            r.error = Some(error_for_head);
                        })
                        .await;
                    let _ = executor
                        .store
                        .append_event(
                            &run_id,
                            Event::new(kind::RUN_FAILED).with_message(message),
                        )
                        .await;
                }
            }
            executor.live.lock().remove(&run_id);
            executor.store.clear_cancel(&run_id);
        });

        Ok(())
    }

    async fn run_inner(&self, run_id: &str, cancel: &CancelToken) -> Result<()> {
        let run = self.store.get_run(run_id)?;
        let workspace = PathBuf::from(&run.workspace_path);

        self.store
            .update_run(run_id, |r| r.status = RunStatus::Running)
            .await?;
        self.store
            .append_event(run_id, Event::new(kind::RUN_STARTED))
            .await?;

        let spec_text = std::fs::read_to_string(&run.spec_path).map_err(|e| {
            Error::InvalidInput(format!("cannot read spec {}: {e}", run.spec_path))
        })?;

        let resolution = self.kit.resolve(&self.model_policy)?;
        let model_id = resolution.primary.id.clone();
        self.store
            .update_run(run_id, move |r| r.model = Some(model_id))
            .await?;
        self.store
            .append_event(
                run_id,
                Event::new(kind::MODEL_RESOLVED)
                    .with_data("model", json!(resolution.primary.id)),
            )
            .await?;

        let snapshot = tether_context::gather(&workspace, cancel).await?;

        let (steps, used_fallback) = match self
            .generate_plan(&resolution, &spec_text, &snapshot.render())
            .await
        {
            Ok(steps) => (steps, false),
            Err(e) => {
                tracing::warn!(run_id, error = %e, "plan generation failed, using fallback plan");
                (fallback_plan(), true)
            }
        };
        let for_head = steps.clone();
        self.store
            .update_run(run_id, move |r| r.steps = for_head)
            .await?;
        self.store
            .append_event(
                run_id,
                Event::new(kind::PLAN_GENERATED)
                    .with_data("steps", json!(steps.len()))
                    .with_data("fallback", json!(used_fallback)),
            )
            .await?;

        let mut any_failed = false;
        for step in &steps {
            if cancel.is_canceled() {
                return Err(Error::Canceled);
            }

            self.update_step(run_id, &step.id, |s| {
                s.status = StepStatus::Running;
                s.started_at = Some(Utc::now());
            })
            .await?;
            self.store
                .append_event(
                    run_id,
                    Event::new(kind::STEP_STARTED)
                        .with_data("step_id", json!(step.id))
                        .with_data("title", json!(step.title)),
                )
                .await?;

            if step.needs_approval && !self.gate_step(run_id, step, cancel).await? {
                continue;
            }

            match self.execute_step(step, &workspace, cancel).await {
                Ok(data) => {
                    self.update_step(run_id, &step.id, |s| {
                        s.status = StepStatus::Succeeded;
                        s.ended_at = Some(Utc::now());
                    })
                    .await?;
                    let mut ev = Event::new(kind::STEP_COMPLETED)
                        .with_data("step_id", json!(step.id));
                    for (k, v) in data {
                        ev = ev.with_data(k, v);
                    }
                    self.store.append_event(run_id, ev).await?;
                }
                Err(failure) => {
                    if cancel.is_canceled() {
                        return Err(Error::Canceled);
                    }
                    any_failed = true;
                    self.update_step(run_id, &step.id, |s| {
                        s.status = StepStatus::Failed;
                        s.ended_at = Some(Utc::now());
                    })
                    .await?;
                    let mut ev = Event::new(kind::STEP_FAILED)
                        .with_data("step_id", json!(step.id))
                        .with_message(failure.message.clone());
                    for (k, v) in failure.data {
                        ev = ev.with_data(k, v);
                    }
                    self.store.append_event(run_id, ev).await?;

                    if step.needs_approval {
                        // Approval-gated infrastructure failed; the run
                        // cannot meaningfully continue.
                        return Err(Error::Tool(format!(
                            "step '{}' failed: {}",
                            step.title, failure.message
                        )));
                    }
                }
            }
        }

        if any_failed {
            self.store
                .update_run(run_id, |r| {
                    r.status = RunStatus::Failed;
                    r.error = Some("one or more steps failed".into());
                })
                .await?;
            self.store
                .append_event(
                    run_id,
                    Event::new(kind::RUN_FAILED).with_message("one or more steps failed"),
                )
                .await?;
        } else {
            self.store
                .update_run(run_id, |r| r.status = RunStatus::Succeeded)
                .await?;
            self.store
                .append_event(run_id, Event::new(kind::RUN_COMPLETED))
                .await?;
            tracing::info!(run_id, "run succeeded");
        }
        Ok(())
    }

    /// Block on the approval gate for one step. Returns false when the
    /// step was denied (and skipped).
    async fn gate_step(&self, run_id: &str, step: &Step, cancel: &CancelToken) -> Result<bool> {
        self.store
            .update_run(run_id, |r| r.status = RunStatus::WaitingApproval)
            .await?;
        self.update_step(run_id, &step.id, |s| s.status = StepStatus::WaitingApproval)
            .await?;
        self.store.require_approval(run_id, &step.id)?;
        self.store
            .append_event(
                run_id,
                Event::new(kind::APPROVAL_REQUESTED)
                    .with_data("step_id", json!(step.id))
                    .with_data("title", json!(step.title)),
            )
            .await?;

        let decision = self.store.wait_for_approval(run_id, &step.id, cancel).await?;

        if decision.is_approved() {
            self.store
                .append_event(
                    run_id,
                    Event::new(kind::APPROVAL_GRANTED).with_data("step_id", json!(step.id)),
                )
                .await?;
            self.store
                .update_run(run_id, |r| r.status = RunStatus::Running)
                .await?;
            self.update_step(run_id, &step.id, |s| s.status = StepStatus::Running)
                .await?;
            Ok(true)
        } else {
            let mut ev =
                Event::new(kind::APPROVAL_DENIED).with_data("step_id", json!(step.id));
            if let Some(reason) = &decision.reason {
                ev = ev.with_data("reason", json!(reason));
            }
            self.store.append_event(run_id, ev).await?;
            self.update_step(run_id, &step.id, |s| {
                s.status = StepStatus::Skipped;
                s.ended_at = Some(Utc::now());
            })
            .await?;
            self.store
                .append_event(
                    run_id,
                    Event::new(kind::STEP_SKIPPED).with_data("step_id", json!(step.id)),
                )
                .await?;
            self.store
                .update_run(run_id, |r| r.status = RunStatus::Running)
                .await?;
            Ok(false)
        }
    }

    async fn execute_step(
        &self,
        step: &Step,
        workspace: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<Map<String, Value>, StepFailure> {
        match step.kind {
            StepKind::Command => {
                let Some(command) = &step.command else {
                    return Err(StepFailure::bare("command step has no command"));
                };
                let opts = RunOptions {
                    dir: Some(workspace.to_path_buf()),
                    timeout: STEP_COMMAND_TIMEOUT,
                    cancel: cancel.clone(),
                    ..Default::default()
                };
                match run_command(command, opts).await {
                    Ok(out) => Ok(command_data(&out)),
                    Err(e) => {
                        let data = e.output().map(command_data).unwrap_or_default();
                        Err(StepFailure {
                            message: e.to_string(),
                            data,
                        })
                    }
                }
            }
            StepKind::Patch => {
                let Some(patch) = &step.patch else {
                    return Err(StepFailure::bare("patch step has no patch"));
                };
                let tool = ApplyPatchTool::new(ToolContext::new(workspace, vec![]));
                let call = ToolCall {
                    id: id::mint(Prefix::Call),
                    name: "apply_patch".into(),
                    input: json!({ "patch": patch }).to_string(),
                };
                let result = tool.invoke(&call, cancel).await;
                let mut data = Map::new();
                data.insert(
                    "detail".into(),
                    json!(truncate_str(&result.text(), OUTPUT_PREVIEW_CHARS)),
                );
                if result.ok {
                    Ok(data)
                } else {
                    Err(StepFailure {
                        message: result.error.unwrap_or_else(|| "patch failed".into()),
                        data,
                    })
                }
            }
            StepKind::Diagram => {
                let tool = DiagramTool::new(ToolContext::new(workspace, vec![]));
                let call = ToolCall {
                    id: id::mint(Prefix::Call),
                    name: "diagram".into(),
                    input: "{}".into(),
                };
                let result = tool.invoke(&call, cancel).await;
                let mut data = Map::new();
                data.insert(
                    "detail".into(),
                    json!(truncate_str(&result.text(), OUTPUT_PREVIEW_CHARS)),
                );
                if result.ok {
                    Ok(data)
                } else {
                    Err(StepFailure {
                        message: result.error.unwrap_or_else(|| "diagram failed".into()),
                        data,
                    })
                }
            }
            StepKind::Note => Ok(Map::new()),
        }
    }

    async fn update_step<F>(&self, run_id: &str, step_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Step) + Send,
    {
        let step_id = step_id.to_string();
        self.store
            .update_run(run_id, move |r| {
                if let Some(step) = r.steps.iter_mut().find(|s| s.id == step_id) {
                    mutate(step);
                }
            })
            .await?;
        Ok(())
    }

    /// One planning call; any failure falls back to the static plan at
    /// the call site.
    async fn generate_plan(
        &self,
        resolution: &Resolution,
        spec_text: &str,
        context_bundle: &str,
    ) -> Result<Vec<Step>> {
        let provider = self.kit.provider(&resolution.primary.provider)?;
        let request = GenerateRequest {
            messages: vec![
                PromptMessage::text(
                    tether_domain::message::Role::System,
                    "You are a build planner. Produce an ordered step plan for the \
                     given spec. Respond with a JSON array and nothing else; each \
                     element is {\"title\": string, \"type\": \"command\"|\"patch\"|\
                     \"diagram\"|\"note\", \"command\"?: string, \"patch\"?: string, \
                     \"needs_approval\"?: bool}.",
                ),
                PromptMessage::text(
                    tether_domain::message::Role::User,
                    format!("SPEC:\n{spec_text}\n\n{context_bundle}"),
                ),
            ],
            tools: Vec::new(),
            model: Some(resolution.primary.id.clone()),
        };

        let completion = provider.generate(request).await?;
        parse_plan(&completion.text)
            .ok_or_else(|| Error::Model("planner returned no usable step list".into()))
    }
}

struct StepFailure {
    message: String,
    data: Map<String, Value>,
}

impl StepFailure {
    fn bare(message: &str) -> Self {
        Self {
            message: message.to_string(),
            data: Map::new(),
        }
    }
}

fn command_data(out: &CommandOutput) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("exit_code".into(), json!(out.exit_code));
    data.insert("duration_ms".into(), json!(out.duration_ms));
    data.insert(
        "stdout".into(),
        json!(truncate_str(&out.stdout, OUTPUT_PREVIEW_CHARS)),
    );
    data.insert(
        "stderr".into(),
        json!(truncate_str(&out.stderr, OUTPUT_PREVIEW_CHARS)),
    );
    data
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    title: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    needs_approval: bool,
}

/// Extract the first JSON array from the model text and normalize it
/// into steps. Returns `None` when nothing usable is found.
fn parse_plan(text: &str) -> Option<Vec<Step>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let planned: Vec<PlannedStep> = serde_json::from_str(&text[start..=end]).ok()?;
    if planned.is_empty() {
        return None;
    }

    let steps = planned
        .into_iter()
        .take(MAX_PLAN_STEPS)
        .map(|p| {
            let kind = match p.kind.as_deref() {
                Some("patch") => StepKind::Patch,
                Some("diagram") => StepKind::Diagram,
                Some("note") => StepKind::Note,
                _ => StepKind::Command,
            };
            let mut step = Step::new(p.title, kind);
            step.command = p.command;
            step.patch = p.patch;
            step.needs_approval = p.needs_approval;
            step
        })
        .collect();
    Some(steps)
}

/// The static plan used when plan generation fails.
fn fallback_plan() -> Vec<Step> {
    vec![
        Step::command("Run tests", "make test"),
        Step::command("Build diagrams", "make diagrams"),
    ]
}
