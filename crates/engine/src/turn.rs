//! One turn of the interactive agent loop.
//!
//! A turn streams a model response, dispatches the tool calls it asked
//! for (with dedup and the approval gate), feeds results back, and
//! repeats until the model converges — at which point a verify call is
//! injected if the workspace is dirty. Every observable transition is an
//! event on the session log.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;

use tether_domain::config::{ApprovalPolicy, ModelPolicy, VerifyPolicy};
use tether_domain::event::{kind, Event};
use tether_domain::id::{self, Prefix};
use tether_domain::message::{Message, MessagePart, Role};
use tether_domain::session::{Session, SessionMode, SessionStatus, TurnStatus};
use tether_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use tether_domain::{CancelToken, Error, Result};
use tether_providers::{GenerateRequest, ModelChunk, ProviderKit, ToolCallChunk};
use tether_store::Store;
use tether_tools::{spec::SPEC_TEMPLATE, ToolContext, ToolRegistry};

pub(crate) const MAX_TURN_ITERATIONS: usize = 8;

pub(crate) struct TurnRunner {
    pub store: Arc<Store>,
    pub kit: Arc<ProviderKit>,
    pub model_policy: ModelPolicy,
    pub verify_policy: VerifyPolicy,
    pub approval_policy: ApprovalPolicy,
    pub session_id: String,
    pub turn_id: String,
    pub cancel: CancelToken,
}

impl TurnRunner {
    async fn emit(&self, event: Event) -> Result<()> {
        self.store
            .append_event(&self.session_id, event.with_turn(&self.turn_id))
            .await?;
        Ok(())
    }

    async fn set_states(&self, turn: TurnStatus, session: SessionStatus) -> Result<()> {
        let turn_id = self.turn_id.clone();
        self.store
            .update_session(&self.session_id, |s| {
                if let Some(t) = s.turn_mut(&turn_id) {
                    t.status = turn;
                }
                s.status = session;
            })
            .await?;
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        let turn_id = self.turn_id.clone();
        self.store
            .update_session(&self.session_id, |s| {
                if let Some(t) = s.turn_mut(&turn_id) {
                    t.status = TurnStatus::Running;
                    t.started_at = Some(Utc::now());
                }
                s.status = SessionStatus::Active;
            })
            .await?;
        self.emit(Event::new(kind::TURN_STARTED)).await?;

        let session = self.init_spec_mode(self.store.get_session(&self.session_id)?).await?;
        let mode = session.mode;
        let workspace = PathBuf::from(&session.workspace_path);

        // Tool registry: verify is always present; spec mode adds the
        // three spec tools bound to the session's spec path.
        let ctx = ToolContext::new(workspace.clone(), self.verify_policy.commands.clone());
        let mut registry = tether_tools::default_registry(ctx);
        if mode == SessionMode::Spec {
            let spec_path = session
                .spec_path
                .clone()
                .ok_or_else(|| Error::Other("spec path unset after init".into()))?;
            tether_tools::add_spec_tools(&mut registry, PathBuf::from(spec_path));
        }

        let resolution = self.kit.resolve(&self.model_policy)?;
        self.emit(
            Event::new(kind::MODEL_RESOLVED).with_data("model", json!(resolution.primary.id)),
        )
        .await?;
        let provider = self.kit.provider(&resolution.primary.provider)?;

        let snapshot = tether_context::gather(&workspace, &self.cancel).await?;
        let context_bundle = snapshot.render();

        // Dedup counts are turn-scoped: a `(name, canonical input)` pair
        // is invoked at most once per turn.
        let mut call_counts: HashMap<String, u32> = HashMap::new();
        let mut workspace_dirty = false;

        for iteration in 0..MAX_TURN_ITERATIONS {
            if self.cancel.is_canceled() {
                return Err(Error::Canceled);
            }
            tracing::debug!(
                session_id = %self.session_id,
                turn_id = %self.turn_id,
                iteration,
                "turn iteration"
            );

            let session = self.store.get_session(&self.session_id)?;
            let spec = self.current_spec(&session);
            let prompt = crate::assemble::build_prompt(
                &session,
                &context_bundle,
                spec.as_ref().map(|(p, c)| (p.as_str(), c.as_str())),
                provider.flavor(),
                &self.store.session_dir(&self.session_id),
            );
            let request = GenerateRequest {
                messages: prompt,
                tools: registry.definitions(),
                model: Some(resolution.primary.id.clone()),
            };

            let mut stream = provider
                .stream_generate(request)
                .await
                .map_err(as_model_error)?;

            let mut assistant_text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            while let Some(item) = stream.next().await {
                if self.cancel.is_canceled() {
                    return Err(Error::Canceled);
                }
                match item.map_err(as_model_error)? {
                    ModelChunk::TextDelta { text } => {
                        assistant_text.push_str(&text);
                        self.emit(
                            Event::new(kind::MODEL_OUTPUT_DELTA).with_data("delta", json!(text)),
                        )
                        .await?;
                    }
                    ModelChunk::ToolCall(chunk) => merge_call_chunk(&mut calls, chunk),
                    ModelChunk::Completed { finish_reason } => {
                        let mut ev = Event::new(kind::MODEL_OUTPUT_COMPLETED);
                        if let Some(reason) = finish_reason {
                            ev = ev.with_data("finish_reason", json!(reason));
                        }
                        self.emit(ev).await?;
                    }
                    ModelChunk::Error { message } => return Err(Error::Model(message)),
                }
            }

            if !assistant_text.is_empty() || !calls.is_empty() {
                let mut parts = Vec::new();
                if !assistant_text.is_empty() {
                    parts.push(MessagePart::text(&assistant_text));
                }
                for call in &calls {
                    parts.push(MessagePart::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    });
                }
                self.append_and_announce(Message::new(Role::Assistant, parts), "assistant")
                    .await?;
            }

            if calls.is_empty() {
                if self.try_converge(&registry, &mut workspace_dirty).await? {
                    return self.complete().await;
                }
                continue;
            }

            let mut executed = 0usize;
            let mut inner_failure = false;
            for call in &calls {
                if self.cancel.is_canceled() {
                    return Err(Error::Canceled);
                }

                let Some(tool) = registry.get(&call.name) else {
                    return Err(Error::InvalidInput(format!("unknown tool: {}", call.name)));
                };
                let definition = tool.definition();

                let key = format!(
                    "{}:{}",
                    call.name,
                    crate::assemble::canonical_input(&call.input)
                );
                let count = call_counts.entry(key).or_insert(0);
                if *count >= 1 {
                    self.emit(
                        Event::new(kind::TOOL_CALL_SKIPPED)
                            .with_data("call_id", json!(call.id))
                            .with_data("tool", json!(call.name)),
                    )
                    .await?;
                    self.emit(
                        Event::new(kind::TOOL_CALL_COMPLETED)
                            .with_data("call_id", json!(call.id))
                            .with_data("tool", json!(call.name))
                            .with_data("ok", json!(false))
                            .with_data("skipped", json!(true))
                            .with_data("error", json!("duplicate tool call: no new info")),
                    )
                    .await?;
                    continue;
                }
                *count += 1;
                executed += 1;

                let result = self.execute_call(&registry, &definition, call).await?;

                if dirties_workspace(&definition) {
                    workspace_dirty = true;
                }

                if mode == SessionMode::Spec && call.name == "write_spec" && result.ok {
                    // Synthesized validation; not a dedup participant.
                    let validate = ToolCall {
                        id: id::mint(Prefix::Call),
                        name: "validate_spec".into(),
                        input: "{}".into(),
                    };
                    let vdef = registry
                        .get("validate_spec")
                        .map(|t| t.definition())
                        .ok_or_else(|| Error::Other("validate_spec not registered".into()))?;
                    let vresult = self.execute_call(&registry, &vdef, &validate).await?;
                    let mut ev = Event::new(kind::SPEC_VALIDATED)
                        .with_data("ok", json!(vresult.ok));
                    if let Some(error) = &vresult.error {
                        ev = ev.with_data("error", json!(error));
                    }
                    self.emit(ev).await?;
                    if !vresult.ok {
                        inner_failure = true;
                        break;
                    }
                }

                if !result.ok {
                    inner_failure = true;
                    break;
                }
            }

            if executed == 0 && !inner_failure {
                // Nothing but duplicates: the model has no new moves.
                if self.try_converge(&registry, &mut workspace_dirty).await? {
                    return self.complete().await;
                }
            }
        }

        Err(Error::Other("max turn iterations reached".into()))
    }

    // ── spec mode ──────────────────────────────────────────────────

    async fn init_spec_mode(&self, session: Session) -> Result<Session> {
        if session.mode != SessionMode::Spec {
            return Ok(session);
        }
        let mut session = session;

        if session
            .spec_path
            .as_deref()
            .map(|p| p.trim().is_empty())
            .unwrap_or(true)
        {
            let default_path = format!(
                "{}/specs/session-{}/spec.md",
                session.workspace_path.trim_end_matches('/'),
                session.id
            );
            let for_update = default_path.clone();
            session = self
                .store
                .update_session(&self.session_id, |s| s.spec_path = Some(for_update))
                .await?;
            self.emit(Event::new(kind::SPEC_PATH_SET).with_data("spec_path", json!(default_path)))
                .await?;
        }

        let spec_path = session
            .spec_path
            .clone()
            .ok_or_else(|| Error::Other("spec path unset".into()))?;
        let path = PathBuf::from(&spec_path);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, SPEC_TEMPLATE)?;
            self.emit(Event::new(kind::SPEC_CREATED).with_data("spec_path", json!(spec_path)))
                .await?;
        }
        Ok(session)
    }

    fn current_spec(&self, session: &Session) -> Option<(String, String)> {
        if session.mode != SessionMode::Spec {
            return None;
        }
        let path = session.spec_path.clone()?;
        let content = std::fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() {
            return None;
        }
        Some((path, content))
    }

    // ── tool dispatch ──────────────────────────────────────────────

    /// Run one tool call end to end: approval gate, start/completed
    /// events, tool-role message. Approval denial and cancellation are
    /// errors; a failing tool is an `ok=false` result.
    async fn execute_call(
        &self,
        registry: &ToolRegistry,
        definition: &ToolDefinition,
        call: &ToolCall,
    ) -> Result<ToolResult> {
        if approval_required(definition, &self.approval_policy) {
            self.set_states(TurnStatus::WaitingApproval, SessionStatus::WaitingApproval)
                .await?;
            self.store.require_approval(&self.session_id, &call.id)?;
            self.emit(
                Event::new(kind::APPROVAL_REQUESTED)
                    .with_data("call_id", json!(call.id))
                    .with_data("tool", json!(call.name)),
            )
            .await?;
            tracing::info!(
                session_id = %self.session_id,
                tool = %call.name,
                call_id = %call.id,
                "waiting for approval"
            );

            let decision = self
                .store
                .wait_for_approval(&self.session_id, &call.id, &self.cancel)
                .await?;
            if !decision.is_approved() {
                let mut ev =
                    Event::new(kind::APPROVAL_DENIED).with_data("call_id", json!(call.id));
                if let Some(reason) = &decision.reason {
                    ev = ev.with_data("reason", json!(reason));
                }
                self.emit(ev).await?;
                return Err(Error::Other("approval denied".into()));
            }
            self.emit(Event::new(kind::APPROVAL_GRANTED).with_data("call_id", json!(call.id)))
                .await?;
            self.set_states(TurnStatus::Running, SessionStatus::Active)
                .await?;
        }

        self.emit(
            Event::new(kind::TOOL_CALL_STARTED)
                .with_data("call_id", json!(call.id))
                .with_data("tool", json!(call.name)),
        )
        .await?;

        let result = registry.invoke(call, &self.cancel).await;

        let mut ev = Event::new(kind::TOOL_CALL_COMPLETED)
            .with_data("call_id", json!(call.id))
            .with_data("tool", json!(call.name))
            .with_data("ok", json!(result.ok));
        if let Some(error) = &result.error {
            ev = ev.with_data("error", json!(error));
        }
        self.emit(ev).await?;

        let mut parts = result.parts.clone();
        if parts.is_empty() {
            parts.push(MessagePart::text("(no output)"));
        }
        self.append_and_announce(Message::tool(&call.id, parts), "tool")
            .await?;

        Ok(result)
    }

    /// Auto-verify at convergence. Returns true when the turn may
    /// complete.
    async fn try_converge(
        &self,
        registry: &ToolRegistry,
        workspace_dirty: &mut bool,
    ) -> Result<bool> {
        let should_verify = self.verify_policy.auto_verify
            && (*workspace_dirty || self.verify_policy.require_clean);
        if !should_verify {
            return Ok(true);
        }

        let call = ToolCall {
            id: id::mint(Prefix::Call),
            name: "verify".into(),
            input: String::new(),
        };
        let definition = registry
            .get("verify")
            .map(|t| t.definition())
            .ok_or_else(|| Error::Other("verify tool not registered".into()))?;
        let result = self.execute_call(registry, &definition, &call).await?;
        if result.ok {
            *workspace_dirty = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ── bookkeeping ────────────────────────────────────────────────

    async fn append_and_announce(&self, message: Message, role: &str) -> Result<()> {
        let message_id = message.id.clone();
        self.store.append_message(&self.session_id, message).await?;
        self.emit(
            Event::new(kind::MESSAGE_ADDED)
                .with_data("role", json!(role))
                .with_data("message_id", json!(message_id)),
        )
        .await?;
        Ok(())
    }

    async fn complete(&self) -> Result<()> {
        let turn_id = self.turn_id.clone();
        self.store
            .update_session(&self.session_id, |s| {
                if let Some(t) = s.turn_mut(&turn_id) {
                    t.status = TurnStatus::Succeeded;
                    t.ended_at = Some(Utc::now());
                }
                s.status = SessionStatus::Active;
            })
            .await?;
        self.emit(Event::new(kind::TURN_COMPLETED)).await?;
        tracing::info!(session_id = %self.session_id, turn_id = %self.turn_id, "turn completed");
        Ok(())
    }
}

/// A call needs a human decision unless the definition allow-lists it;
/// otherwise the definition flag or the session policy decides.
fn approval_required(definition: &ToolDefinition, policy: &ApprovalPolicy) -> bool {
    if definition.allow_without_approval {
        return false;
    }
    definition.requires_approval || policy.names(definition.kind, &definition.name)
}

fn dirties_workspace(definition: &ToolDefinition) -> bool {
    use tether_domain::tool::ToolKind;
    // write_spec is tracked by the spec validation loop, not verify.
    if definition.name == "write_spec" {
        return false;
    }
    matches!(definition.kind, ToolKind::Write | ToolKind::Exec)
}

/// Merge one streamed tool-call chunk into the order-preserving call
/// list. A chunk without an id opens a fresh call with a minted id.
fn merge_call_chunk(calls: &mut Vec<ToolCall>, chunk: ToolCallChunk) {
    if let Some(chunk_id) = &chunk.id {
        if let Some(existing) = calls.iter_mut().find(|c| &c.id == chunk_id) {
            if let Some(name) = chunk.name {
                existing.name = name;
            }
            if let Some(fragment) = chunk.input_fragment {
                existing.input.push_str(&fragment);
            }
            return;
        }
    }
    calls.push(ToolCall {
        id: chunk.id.unwrap_or_else(|| id::mint(Prefix::Call)),
        name: chunk.name.unwrap_or_default(),
        input: chunk.input_fragment.unwrap_or_default(),
    });
}

fn as_model_error(error: Error) -> Error {
    match error {
        Error::Model(_) | Error::Canceled => error,
        other => Error::Model(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::tool::ToolKind;

    fn definition(kind: ToolKind, requires: bool, allow: bool) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: json!({}),
            kind,
            requires_approval: requires,
            allow_without_approval: allow,
        }
    }

    #[test]
    fn approval_rule_matrix() {
        let policy = ApprovalPolicy::default(); // exec + write kinds

        // shell-like: requires approval.
        assert!(approval_required(&definition(ToolKind::Exec, true, false), &policy));
        // read tool: nothing names it.
        assert!(!approval_required(&definition(ToolKind::Read, false, false), &policy));
        // exec kind is named by the default policy.
        assert!(approval_required(&definition(ToolKind::Exec, false, false), &policy));
        // the allow-list wins over both the flag and the policy.
        assert!(!approval_required(&definition(ToolKind::Exec, true, true), &policy));
        assert!(!approval_required(&definition(ToolKind::Write, false, true), &policy));
    }

    #[test]
    fn approval_by_tool_name() {
        let policy = ApprovalPolicy {
            require_for_kinds: vec![],
            require_for_tools: vec!["t".into()],
        };
        assert!(approval_required(&definition(ToolKind::Read, false, false), &policy));
    }

    #[test]
    fn merge_chunks_preserves_order_and_refines() {
        let mut calls = Vec::new();
        merge_call_chunk(
            &mut calls,
            ToolCallChunk {
                id: Some("call_a".into()),
                name: Some("shell".into()),
                input_fragment: Some("{\"comm".into()),
            },
        );
        merge_call_chunk(
            &mut calls,
            ToolCallChunk {
                id: Some("call_b".into()),
                name: Some("read_file".into()),
                input_fragment: Some("{}".into()),
            },
        );
        merge_call_chunk(
            &mut calls,
            ToolCallChunk {
                id: Some("call_a".into()),
                name: None,
                input_fragment: Some("and\":1}".into()),
            },
        );

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].input, "{\"command\":1}");
        assert_eq!(calls[1].id, "call_b");
    }

    #[test]
    fn chunk_without_id_mints_one() {
        let mut calls = Vec::new();
        merge_call_chunk(
            &mut calls,
            ToolCallChunk {
                id: None,
                name: Some("verify".into()),
                input_fragment: None,
            },
        );
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].name, "verify");
    }

    #[test]
    fn model_error_wrapping() {
        let wrapped = as_model_error(Error::Other("boom".into()));
        assert_eq!(wrapped.to_string(), "model error: boom");
        // Already-model errors keep their message unchanged.
        let kept = as_model_error(Error::Model("stream reset".into()));
        assert_eq!(kept.to_string(), "model error: stream reset");
        assert!(matches!(as_model_error(Error::Canceled), Error::Canceled));
    }

    #[test]
    fn write_spec_never_dirties() {
        let mut def = definition(ToolKind::Write, false, true);
        def.name = "write_spec".into();
        assert!(!dirties_workspace(&def));
        def.name = "apply_patch".into();
        assert!(dirties_workspace(&def));
    }
}
