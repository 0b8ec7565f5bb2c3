//! The context snapshot: everything the model gets told about a workspace
//! before a turn or a planning call.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_domain::{CancelToken, Error, Result};
use tether_workspace::command::{run_command, RunOptions};
use tether_workspace::walk;

use crate::symbols::{self, Symbol};

const MAX_TREE_ENTRIES: usize = 500;
const MAX_SYMBOLS: usize = 400;
const MAX_AGENTS_MD_BYTES: usize = 16 * 1024;
const GIT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub workspace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents_md: Option<String>,
    pub repo_tree: Vec<String>,
    pub repo_map: Vec<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_status: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Gather a snapshot of `workspace`. Read-only; cancellable between
/// phases.
pub async fn gather(workspace: &Path, cancel: &CancelToken) -> Result<ContextSnapshot> {
    let agents_md = read_agents_md(workspace);

    if cancel.is_canceled() {
        return Err(Error::Canceled);
    }

    let files = walk::walk(workspace, MAX_TREE_ENTRIES);
    let repo_tree: Vec<String> = files
        .iter()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect();

    if cancel.is_canceled() {
        return Err(Error::Canceled);
    }

    let mut repo_map = Vec::new();
    for rel in &files {
        if repo_map.len() >= MAX_SYMBOLS {
            break;
        }
        let Some(ext) = rel.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !symbols::MAP_EXTENSIONS.contains(&ext) {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(workspace.join(rel)) {
            repo_map.extend(symbols::extract_from(rel, &content));
        }
    }
    repo_map.truncate(MAX_SYMBOLS);

    if cancel.is_canceled() {
        return Err(Error::Canceled);
    }

    let git_status = gather_git_status(workspace, cancel).await;

    Ok(ContextSnapshot {
        workspace: workspace.to_string_lossy().into_owned(),
        agents_md,
        repo_tree,
        repo_map,
        git_status,
        generated_at: Utc::now(),
    })
}

fn read_agents_md(workspace: &Path) -> Option<String> {
    let content = std::fs::read_to_string(workspace.join("AGENTS.md")).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    let mut content = content;
    if content.len() > MAX_AGENTS_MD_BYTES {
        let mut end = MAX_AGENTS_MD_BYTES;
        while end > 0 && !content.is_char_boundary(end) {
            end -= 1;
        }
        content.truncate(end);
    }
    Some(content)
}

async fn gather_git_status(workspace: &Path, cancel: &CancelToken) -> Option<String> {
    if !workspace.join(".git").exists() {
        return None;
    }
    let opts = RunOptions {
        dir: Some(workspace.to_path_buf()),
        timeout: GIT_STATUS_TIMEOUT,
        cancel: cancel.clone(),
        ..Default::default()
    };
    match run_command("git status --porcelain", opts).await {
        Ok(out) => Some(out.stdout),
        Err(e) => {
            tracing::warn!(error = %e, "git status failed while gathering context");
            None
        }
    }
}

impl ContextSnapshot {
    /// Serialize the snapshot into the system-prompt bundle. Empty
    /// sections are omitted.
    pub fn render(&self) -> String {
        let mut out = format!("WORKSPACE: {}\n", self.workspace);

        if let Some(agents) = &self.agents_md {
            out.push_str("\nAGENTS.md:\n");
            out.push_str(agents);
            if !agents.ends_with('\n') {
                out.push('\n');
            }
        }

        if !self.repo_tree.is_empty() {
            out.push_str(&format!("\nFILE TREE ({} files):\n", self.repo_tree.len()));
            for path in &self.repo_tree {
                out.push_str(path);
                out.push('\n');
            }
        }

        if !self.repo_map.is_empty() {
            out.push_str("\nSYMBOLS:\n");
            for sym in &self.repo_map {
                out.push_str(&format!("{}:{} {}\n", sym.file, sym.line, sym.name));
            }
        }

        if let Some(status) = &self.git_status {
            if !status.trim().is_empty() {
                out.push_str("\nGIT STATUS:\n");
                out.push_str(status);
                if !status.ends_with('\n') {
                    out.push('\n');
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gathers_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let snap = gather(dir.path(), &CancelToken::new()).await.unwrap();
        assert!(snap.agents_md.is_none());
        assert!(snap.repo_tree.is_empty());
        assert!(snap.repo_map.is_empty());
        assert!(snap.git_status.is_none());

        let rendered = snap.render();
        assert!(rendered.starts_with("WORKSPACE: "));
        assert!(!rendered.contains("FILE TREE"));
        assert!(!rendered.contains("SYMBOLS"));
    }

    #[tokio::test]
    async fn gathers_tree_symbols_and_agents_md() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Use make test.").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn entry() {}\n").unwrap();

        let snap = gather(dir.path(), &CancelToken::new()).await.unwrap();
        assert_eq!(snap.agents_md.as_deref(), Some("Use make test."));
        assert_eq!(snap.repo_tree, vec!["AGENTS.md", "src/lib.rs"]);
        assert_eq!(snap.repo_map.len(), 1);
        assert_eq!(snap.repo_map[0].name, "entry");
        assert_eq!(snap.repo_map[0].file, "src/lib.rs");

        let rendered = snap.render();
        assert!(rendered.contains("AGENTS.md:\nUse make test."));
        assert!(rendered.contains("FILE TREE (2 files):"));
        assert!(rendered.contains("src/lib.rs:1 entry"));
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            gather(dir.path(), &cancel).await,
            Err(Error::Canceled)
        ));
    }
}
