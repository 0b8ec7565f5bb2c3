//! Store core: aggregate CRUD, head persistence, per-aggregate locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use tether_domain::event::{kind, Event};
use tether_domain::message::Message;
use tether_domain::run::Run;
use tether_domain::session::{Session, SessionMode, Turn};
use tether_domain::{Error, Result};

use crate::approvals::ApprovalRegistry;
use crate::cancel::CancelRegistry;
use crate::events::Subscriber;

pub struct Store {
    pub(crate) root: PathBuf,
    pub(crate) runs: RwLock<HashMap<String, Run>>,
    pub(crate) sessions: RwLock<HashMap<String, Session>>,
    /// Per-aggregate async mutex serializing head updates and event
    /// appends. Entries are created on demand and never removed; the
    /// map only grows by one small entry per aggregate.
    pub(crate) locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    pub(crate) next_subscriber_id: AtomicU64,
    pub(crate) approvals: ApprovalRegistry,
    pub(crate) cancels: CancelRegistry,
}

impl Store {
    /// Open (or create) a store rooted at `root` and load any existing
    /// heads into memory. Heads that fail to parse are skipped with a
    /// warning; their event logs stay on disk untouched.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("runs"))?;
        std::fs::create_dir_all(root.join("sessions"))?;

        let runs = load_heads::<Run>(&root.join("runs"), "run.json");
        let sessions = load_heads::<Session>(&root.join("sessions"), "session.json");

        tracing::info!(
            runs = runs.len(),
            sessions = sessions.len(),
            root = %root.display(),
            "store opened"
        );

        Ok(Self {
            root,
            runs: RwLock::new(runs),
            sessions: RwLock::new(sessions),
            locks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            approvals: ApprovalRegistry::default(),
            cancels: CancelRegistry::default(),
        })
    }

    // ── paths ──────────────────────────────────────────────────────

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_id)
    }

    /// Per-turn artifact directory inside a session.
    pub fn artifact_dir(&self, session_id: &str, turn_id: &str) -> PathBuf {
        self.session_dir(session_id).join("artifacts").join(turn_id)
    }

    pub(crate) fn is_run_id(id: &str) -> bool {
        id.starts_with("run_")
    }

    pub(crate) fn aggregate_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub(crate) fn aggregate_exists(&self, id: &str) -> bool {
        if Self::is_run_id(id) {
            self.runs.read().contains_key(id)
        } else {
            self.sessions.read().contains_key(id)
        }
    }

    // ── creation ───────────────────────────────────────────────────

    pub async fn create_run(&self, workspace: &str, spec_path: &str) -> Result<Run> {
        if workspace.trim().is_empty() {
            return Err(Error::InvalidInput("workspace is required".into()));
        }
        if spec_path.trim().is_empty() {
            return Err(Error::InvalidInput("spec path is required".into()));
        }

        let run = Run::new(workspace, spec_path);
        let dir = self.run_dir(&run.id);
        std::fs::create_dir_all(dir.join("artifacts"))?;
        write_head(&dir.join("run.json"), &run)?;
        self.runs.write().insert(run.id.clone(), run.clone());

        self.append_event(
            &run.id,
            Event::new(kind::RUN_CREATED)
                .with_data("workspace", workspace.into())
                .with_data("spec_path", spec_path.into()),
        )
        .await?;

        tracing::info!(run_id = %run.id, workspace, "run created");
        Ok(run)
    }

    pub async fn create_session(
        &self,
        workspace: &str,
        system_prompt: Option<String>,
        mode: SessionMode,
        spec_path: Option<String>,
    ) -> Result<Session> {
        if workspace.trim().is_empty() {
            return Err(Error::InvalidInput("workspace is required".into()));
        }

        let mut session = Session::new(workspace, mode);
        session.system_prompt = system_prompt;
        session.spec_path = spec_path;

        let dir = self.session_dir(&session.id);
        std::fs::create_dir_all(dir.join("attachments"))?;
        std::fs::create_dir_all(dir.join("artifacts"))?;
        write_head(&dir.join("session.json"), &session)?;
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());

        self.append_event(
            &session.id,
            Event::new(kind::SESSION_CREATED)
                .with_data("workspace", workspace.into())
                .with_data("mode", serde_json::to_value(mode)?),
        )
        .await?;

        tracing::info!(session_id = %session.id, workspace, ?mode, "session created");
        Ok(session)
    }

    // ── reads ──────────────────────────────────────────────────────

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs.read().values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        runs
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        sessions
    }

    // ── updates ────────────────────────────────────────────────────

    /// Mutate a run head under its aggregate lock; the head file is
    /// rewritten atomically. Returns the updated copy.
    pub async fn update_run<F>(&self, run_id: &str, mutate: F) -> Result<Run>
    where
        F: FnOnce(&mut Run),
    {
        let lock = self.aggregate_lock(run_id);
        let _guard = lock.lock().await;

        let mut run = self.get_run(run_id)?;
        mutate(&mut run);
        run.updated_at = Utc::now();
        write_head(&self.run_dir(run_id).join("run.json"), &run)?;
        self.runs.write().insert(run_id.to_string(), run.clone());
        Ok(run)
    }

    /// Mutate a session head under its aggregate lock.
    pub async fn update_session<F>(&self, session_id: &str, mutate: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let lock = self.aggregate_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.get_session(session_id)?;
        mutate(&mut session);
        session.updated_at = Utc::now();
        write_head(&self.session_dir(session_id).join("session.json"), &session)?;
        self.sessions
            .write()
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    // ── messages & turns ───────────────────────────────────────────

    /// Append a message to a session. Parts must be non-empty.
    pub async fn append_message(&self, session_id: &str, message: Message) -> Result<Message> {
        if message.parts.is_empty() {
            return Err(Error::InvalidInput("message has no parts".into()));
        }
        let copy = message.clone();
        self.update_session(session_id, |s| s.messages.push(message))
            .await?;
        Ok(copy)
    }

    /// Create a pending turn and point `last_turn_id` at it.
    pub async fn add_turn(&self, session_id: &str) -> Result<String> {
        let turn = Turn::new();
        let turn_id = turn.id.clone();
        self.update_session(session_id, |s| {
            s.last_turn_id = Some(turn.id.clone());
            s.turns.push(turn);
        })
        .await?;
        Ok(turn_id)
    }
}

// ── head persistence helpers ───────────────────────────────────────

/// Pretty JSON with a trailing newline, written via tmp + rename.
pub(crate) fn write_head<T: Serialize>(path: &Path, head: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(head)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, format!("{json}\n"))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn load_heads<T: DeserializeOwned>(dir: &Path, head_name: &str) -> HashMap<String, T> {
    let mut heads = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return heads;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let head_path = entry.path().join(head_name);
        if !head_path.is_file() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        match std::fs::read_to_string(&head_path)
            .map_err(Error::Io)
            .and_then(|raw| serde_json::from_str::<T>(&raw).map_err(Error::Json))
        {
            Ok(head) => {
                heads.insert(id, head);
            }
            Err(e) => {
                tracing::warn!(path = %head_path.display(), error = %e, "skipping unreadable head");
            }
        }
    }
    heads
}
