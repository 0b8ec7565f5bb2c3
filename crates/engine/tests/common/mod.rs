//! Shared fixtures for the scenario suites: a store on a temp data dir,
//! a scripted provider, and polling helpers with a hard deadline.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tether_domain::config::{ApprovalPolicy, ModelPolicy, VerifyPolicy};
use tether_domain::event::Event;
use tether_providers::mock::ScriptedProvider;
use tether_providers::{ModelChunk, ProviderKit, ToolCallChunk};
use tether_store::Store;

pub const DEADLINE: Duration = Duration::from_secs(10);

pub struct Harness {
    pub data_dir: tempfile::TempDir,
    pub workspace: tempfile::TempDir,
    pub store: Arc<Store>,
    pub kit: Arc<ProviderKit>,
}

impl Harness {
    pub fn new(scripts: Vec<Vec<ModelChunk>>) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(data_dir.path()).unwrap());

        let provider = Arc::new(ScriptedProvider::new(scripts));
        let record = provider.record();
        let mut kit = ProviderKit::new();
        kit.register(provider, vec![record]);

        Self {
            data_dir,
            workspace,
            store,
            kit: Arc::new(kit),
        }
    }

    pub fn workspace_path(&self) -> String {
        self.workspace.path().to_string_lossy().into_owned()
    }
}

pub fn model_policy() -> ModelPolicy {
    ModelPolicy::default()
}

/// Verify policy whose command always succeeds.
pub fn passing_verify() -> VerifyPolicy {
    VerifyPolicy {
        auto_verify: true,
        commands: vec!["true".into()],
        require_clean: false,
    }
}

/// Verify policy whose command always fails.
pub fn failing_verify() -> VerifyPolicy {
    VerifyPolicy {
        auto_verify: true,
        commands: vec!["false".into()],
        require_clean: false,
    }
}

pub fn default_approvals() -> ApprovalPolicy {
    ApprovalPolicy::default()
}

/// Approval policy that gates nothing.
pub fn open_approvals() -> ApprovalPolicy {
    ApprovalPolicy {
        require_for_kinds: vec![],
        require_for_tools: vec![],
    }
}

pub fn text_chunk(text: &str) -> ModelChunk {
    ModelChunk::TextDelta { text: text.into() }
}

pub fn call_chunk(id: &str, name: &str, input: &str) -> ModelChunk {
    ModelChunk::ToolCall(ToolCallChunk::full(id, name, input))
}

pub fn done_chunk() -> ModelChunk {
    ModelChunk::Completed {
        finish_reason: Some("stop".into()),
    }
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let started = std::time::Instant::now();
    loop {
        if check() {
            return;
        }
        if started.elapsed() > DEADLINE {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// The event kinds of an aggregate's log, in order.
pub fn event_kinds(store: &Store, parent_id: &str) -> Vec<String> {
    store
        .read_events(parent_id, 0)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

pub fn events(store: &Store, parent_id: &str) -> Vec<Event> {
    store.read_events(parent_id, 0).unwrap()
}

/// Index of the first event of `kind`, panicking when absent.
pub fn index_of(kinds: &[String], kind: &str) -> usize {
    kinds
        .iter()
        .position(|k| k == kind)
        .unwrap_or_else(|| panic!("event {kind} not found in {kinds:?}"))
}
