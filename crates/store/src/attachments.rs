//! Session attachments: uploaded payloads stored under the session's
//! `attachments/` directory and referenced by session-relative paths.

use serde::{Deserialize, Serialize};

use tether_domain::id::{self, Prefix};
use tether_domain::Result;

use crate::store::Store;

const DEFAULT_MIME: &str = "application/octet-stream";
const DEFAULT_EXT: &str = ".bin";

/// Reference to a stored attachment, as carried in message parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Session-relative POSIX path, always under `attachments/`.
    #[serde(rename = "ref")]
    pub reference: String,
    pub mime_type: String,
}

impl Store {
    /// Save bytes under the session's attachment directory.
    ///
    /// The filename is reduced to its final component; a missing
    /// extension defaults to `.bin`; name collisions are renamed to a
    /// fresh attachment id with the original extension.
    pub async fn save_session_attachment(
        &self,
        session_id: &str,
        filename: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<AttachmentRef> {
        self.get_session(session_id)?;

        let dir = self.session_dir(session_id).join("attachments");
        std::fs::create_dir_all(&dir)?;

        let mut name = sanitize_filename(filename);
        if !name.contains('.') {
            name.push_str(DEFAULT_EXT);
        }
        if dir.join(&name).exists() {
            let ext = name
                .rfind('.')
                .map(|i| name[i..].to_string())
                .unwrap_or_else(|| DEFAULT_EXT.to_string());
            name = format!("{}{ext}", id::mint(Prefix::Attachment));
        }

        std::fs::write(dir.join(&name), bytes)?;
        tracing::debug!(session_id, name, size = bytes.len(), "attachment saved");

        Ok(AttachmentRef {
            reference: format!("attachments/{name}"),
            mime_type: mime_type
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(DEFAULT_MIME)
                .to_string(),
        })
    }
}

/// Keep only the final path component and drop characters that could
/// confuse downstream path handling.
fn sanitize_filename(filename: &str) -> String {
    let base = std::path::Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let trimmed = cleaned.trim_matches('.').to_string();
    if trimmed.is_empty() {
        id::mint(Prefix::Attachment)
    } else {
        trimmed
    }
}
