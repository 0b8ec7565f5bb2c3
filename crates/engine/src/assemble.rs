//! Message assembly for the model.
//!
//! Builds the ordered prompt list for one model call: system prompt,
//! spec-mode instruction, context bundle, current spec, then the session
//! history with attachment-backed image parts materialized and the
//! provider-flavor normalization applied.

use std::path::Path;

use base64::Engine as _;

use tether_domain::message::{Message, MessagePart, Role};
use tether_domain::session::{Session, SessionMode};
use tether_providers::{PromptMessage, PromptPart, ProviderFlavor};
use tether_workspace::safe_join;

const DEFAULT_IMAGE_MIME: &str = "application/octet-stream";

/// Build the full prompt for one model call.
///
/// `spec_content` is the `(path, content)` of the current spec when the
/// session is in spec mode and the file is non-empty. `storage_dir` is
/// the session's storage directory, used to materialize attachment refs.
pub fn build_prompt(
    session: &Session,
    context_bundle: &str,
    spec_content: Option<(&str, &str)>,
    flavor: ProviderFlavor,
    storage_dir: &Path,
) -> Vec<PromptMessage> {
    let mut messages = Vec::new();

    if let Some(system_prompt) = &session.system_prompt {
        if !system_prompt.trim().is_empty() {
            messages.push(PromptMessage::text(Role::System, system_prompt));
        }
    }

    if session.mode == SessionMode::Spec {
        let spec_path = session.spec_path.as_deref().unwrap_or("(unset)");
        messages.push(PromptMessage::text(
            Role::System,
            format!(
                "You are working in spec mode. The spec document is the primary \
                 artifact: treat it as the source of truth and revise it through \
                 the write_spec tool. Spec path: {spec_path}. The spec must keep \
                 these headings: # Goal, # Constraints, # Acceptance Criteria."
            ),
        ));
    }

    if !context_bundle.trim().is_empty() {
        messages.push(PromptMessage::text(Role::System, context_bundle));
    }

    if let Some((path, content)) = spec_content {
        messages.push(PromptMessage::text(
            Role::System,
            format!("CURRENT SPEC ({path}):\n{content}"),
        ));
    }

    for message in &session.messages {
        messages.push(materialize(message, storage_dir));
    }

    normalize_for_provider(messages, flavor)
}

/// Convert one stored message into its provider-ready shape, reading
/// image attachments from disk. Any materialization error degrades the
/// part to a text placeholder.
fn materialize(message: &Message, storage_dir: &Path) -> PromptMessage {
    let parts = message
        .parts
        .iter()
        .map(|part| match part {
            MessagePart::Text { text } => PromptPart::Text { text: text.clone() },
            MessagePart::Image {
                reference,
                mime_type,
            } => materialize_image(storage_dir, reference, mime_type.as_deref()),
            MessagePart::File { reference, .. } => PromptPart::Text {
                text: format!("[file: {reference}]"),
            },
            MessagePart::ToolCall { id, name, input } => PromptPart::Text {
                text: format!("TOOL CALL ({id}): {name} {input}"),
            },
            MessagePart::ToolResult { id, ok } => PromptPart::Text {
                text: format!("[tool result {id}: ok={ok}]"),
            },
        })
        .collect();

    PromptMessage {
        role: message.role,
        tool_call_id: message.tool_call_id.clone(),
        parts,
    }
}

fn materialize_image(storage_dir: &Path, reference: &str, mime_type: Option<&str>) -> PromptPart {
    let placeholder = || PromptPart::Text {
        text: format!("[image: {reference}]"),
    };

    // Refs must stay inside the session's storage directory.
    let path = match safe_join(storage_dir, reference) {
        Ok(p) => p,
        Err(_) => return placeholder(),
    };
    match std::fs::read(&path) {
        Ok(bytes) => PromptPart::Image {
            media_type: mime_type.unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        },
        Err(_) => placeholder(),
    }
}

/// Rewrite tool-role messages into assistant text for providers that
/// cannot consume an interleaved tool history. Pure function; all other
/// messages pass through unchanged.
pub fn normalize_for_provider(
    messages: Vec<PromptMessage>,
    flavor: ProviderFlavor,
) -> Vec<PromptMessage> {
    if flavor == ProviderFlavor::ToolMessages {
        return messages;
    }

    messages
        .into_iter()
        .map(|msg| {
            if msg.role != Role::Tool {
                return msg;
            }
            let call_id = msg.tool_call_id.as_deref().unwrap_or("unknown");
            let joined = msg.joined_text();
            let body = if joined.trim().is_empty() {
                "(no output)".to_string()
            } else {
                joined
            };
            PromptMessage::text(Role::Assistant, format!("TOOL OUTPUT ({call_id}):\n{body}"))
        })
        .collect()
}

/// Canonical form of a tool call's input, used as the dedup key suffix.
///
/// Empty input and the literal `null` read as `{}`; valid JSON is
/// re-stringified (normalizing whitespace and key order); anything else
/// is kept trimmed as-is.
pub fn canonical_input(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return "{}".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(mode: SessionMode) -> Session {
        let mut s = Session::new("/w", mode);
        if mode == SessionMode::Spec {
            s.spec_path = Some("/w/specs/spec.md".into());
        }
        s
    }

    #[test]
    fn ordering_of_system_sections() {
        let mut s = session(SessionMode::Spec);
        s.system_prompt = Some("be careful".into());
        s.messages.push(Message::user("hello"));

        let dir = tempfile::tempdir().unwrap();
        let prompt = build_prompt(
            &s,
            "WORKSPACE: /w",
            Some(("/w/specs/spec.md", "# Goal\n")),
            ProviderFlavor::ToolMessages,
            dir.path(),
        );

        assert_eq!(prompt.len(), 5);
        assert_eq!(prompt[0].joined_text(), "be careful");
        assert!(prompt[1].joined_text().contains("spec mode"));
        assert!(prompt[1].joined_text().contains("/w/specs/spec.md"));
        assert_eq!(prompt[2].joined_text(), "WORKSPACE: /w");
        assert!(prompt[3]
            .joined_text()
            .starts_with("CURRENT SPEC (/w/specs/spec.md):"));
        assert_eq!(prompt[4].role, Role::User);
    }

    #[test]
    fn chat_mode_has_no_spec_sections() {
        let mut s = session(SessionMode::Chat);
        s.messages.push(Message::user("hi"));
        let dir = tempfile::tempdir().unwrap();
        let prompt = build_prompt(&s, "ctx", None, ProviderFlavor::ToolMessages, dir.path());
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].joined_text(), "ctx");
    }

    #[test]
    fn image_parts_materialize_to_base64() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("attachments")).unwrap();
        std::fs::write(dir.path().join("attachments/pic.png"), b"pngdata").unwrap();

        let mut s = session(SessionMode::Chat);
        s.messages.push(Message::new(
            Role::User,
            vec![MessagePart::Image {
                reference: "attachments/pic.png".into(),
                mime_type: Some("image/png".into()),
            }],
        ));

        let prompt = build_prompt(&s, "", None, ProviderFlavor::ToolMessages, dir.path());
        match &prompt[0].parts[0] {
            PromptPart::Image { media_type, base64 } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(
                    base64,
                    &base64::engine::general_purpose::STANDARD.encode(b"pngdata")
                );
            }
            other => panic!("expected image part, got {other:?}"),
        }
    }

    #[test]
    fn missing_image_degrades_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(SessionMode::Chat);
        s.messages.push(Message::new(
            Role::User,
            vec![MessagePart::Image {
                reference: "attachments/gone.png".into(),
                mime_type: None,
            }],
        ));

        let prompt = build_prompt(&s, "", None, ProviderFlavor::ToolMessages, dir.path());
        assert_eq!(
            prompt[0].joined_text(),
            "[image: attachments/gone.png]"
        );
    }

    #[test]
    fn traversal_ref_degrades_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(SessionMode::Chat);
        s.messages.push(Message::new(
            Role::User,
            vec![MessagePart::Image {
                reference: "../outside.png".into(),
                mime_type: None,
            }],
        ));
        let prompt = build_prompt(&s, "", None, ProviderFlavor::ToolMessages, dir.path());
        assert_eq!(prompt[0].joined_text(), "[image: ../outside.png]");
    }

    #[test]
    fn normalization_rewrites_tool_messages() {
        let messages = vec![
            PromptMessage::text(Role::User, "hi"),
            PromptMessage {
                role: Role::Tool,
                tool_call_id: Some("call_7".into()),
                parts: vec![PromptPart::Text {
                    text: "result body".into(),
                }],
            },
        ];

        let normalized = normalize_for_provider(messages.clone(), ProviderFlavor::AssistantOnly);
        assert_eq!(normalized[0].role, Role::User);
        assert_eq!(normalized[1].role, Role::Assistant);
        assert_eq!(
            normalized[1].joined_text(),
            "TOOL OUTPUT (call_7):\nresult body"
        );

        // ToolMessages flavor passes through untouched.
        let untouched = normalize_for_provider(messages, ProviderFlavor::ToolMessages);
        assert_eq!(untouched[1].role, Role::Tool);
    }

    #[test]
    fn normalization_empty_tool_output() {
        let messages = vec![PromptMessage {
            role: Role::Tool,
            tool_call_id: Some("call_1".into()),
            parts: vec![PromptPart::Text { text: "  ".into() }],
        }];
        let normalized = normalize_for_provider(messages, ProviderFlavor::AssistantOnly);
        assert_eq!(
            normalized[0].joined_text(),
            "TOOL OUTPUT (call_1):\n(no output)"
        );
    }

    #[test]
    fn canonical_input_normalizes() {
        assert_eq!(canonical_input(""), "{}");
        assert_eq!(canonical_input("  "), "{}");
        assert_eq!(canonical_input("null"), "{}");
        // Whitespace and key order normalize.
        assert_eq!(
            canonical_input("{\"b\": 1,  \"a\": 2}"),
            canonical_input("{\"a\":2,\"b\":1}")
        );
        // Parse failures keep the trimmed input.
        assert_eq!(canonical_input("  {broken "), "{broken");
    }
}
