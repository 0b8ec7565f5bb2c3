//! The tool registry: name → tool, with uniform invocation guards.

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use tether_domain::CancelToken;

use crate::Tool;

/// Named tools behind a uniform `invoke` contract. Backed by a `BTreeMap`
/// so `definitions()` is deterministic without a sort.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn add(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All definitions, sorted by tool name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Invoke a call. Unknown tools and non-JSON input become `ok=false`
    /// results; this method never panics on model-supplied input.
    pub async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return ToolResult::err(&call.id, "unknown tool");
        };

        let trimmed = call.input.trim();
        if !trimmed.is_empty()
            && trimmed != "null"
            && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
        {
            return ToolResult::err(&call.id, "invalid input");
        }

        tracing::debug!(tool = %call.name, call_id = %call.id, "invoking tool");
        tool.invoke(call, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_domain::tool::ToolKind;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                parameters: json!({"type": "object"}),
                kind: ToolKind::Read,
                requires_approval: false,
                allow_without_approval: false,
            }
        }

        async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
            ToolResult::ok(&call.id, call.input.clone())
        }
    }

    fn call(name: &str, input: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            input: input.into(),
        }
    }

    #[tokio::test]
    async fn unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.invoke(&call("ghost", "{}"), &CancelToken::new()).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_json_input() {
        let mut registry = ToolRegistry::new();
        registry.add(Arc::new(EchoTool));
        let result = registry
            .invoke(&call("echo", "{broken"), &CancelToken::new())
            .await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("invalid input"));
    }

    #[tokio::test]
    async fn empty_input_is_allowed() {
        let mut registry = ToolRegistry::new();
        registry.add(Arc::new(EchoTool));
        let result = registry.invoke(&call("echo", ""), &CancelToken::new()).await;
        assert!(result.ok);
    }

    #[test]
    fn definitions_sorted_by_name() {
        let ctx = crate::ToolContext::new("/tmp", vec![]);
        let registry = crate::default_registry(ctx);
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"shell".to_string()));
        assert!(names.contains(&"verify".to_string()));
    }
}
