// Skiff Engine — Tool registry
// Name → tool descriptor mapping. Each tool exposes a name, description,
// JSON-schema parameters, and execute(arguments) → String; execution errors
// are absorbed into the result string and never propagate to the loop.
// The registry is parameterized by a ToolRuntime, which decides where
// commands actually run (local process vs remote sandbox).

pub mod bash;
pub mod fs;
pub mod runtime;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::atoms::types::{FunctionDefinition, ToolDefinition};
use bash::BashTool;
use fs::{FileEditTool, FileReadTool, FileWriteTool};
use runtime::ToolRuntime;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: &Value) -> String;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The core tool set, all bound to one runtime.
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        ToolRegistry {
            tools: vec![
                Box::new(FileReadTool::new(runtime.clone())),
                Box::new(FileWriteTool::new(runtime.clone())),
                Box::new(FileEditTool::new(runtime.clone())),
                Box::new(BashTool::new(runtime)),
            ],
        }
    }

    #[cfg(test)]
    pub(crate) fn with_tools(tools: Vec<Box<dyn Tool>>) -> Self {
        ToolRegistry { tools }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// OpenAI-format specs offered to the model each round.
    pub fn specs(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::runtime::LocalRuntime;
    use super::*;

    #[test]
    fn registry_holds_the_core_tools() {
        let registry = ToolRegistry::new(Arc::new(LocalRuntime));
        for name in ["file_read", "file_write", "file_edit", "bash"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        assert!(registry.get("web_search").is_none());

        let specs = registry.specs();
        assert_eq!(specs.len(), 4);
        assert!(specs.iter().all(|s| s.tool_type == "function"));
        assert!(specs.iter().all(|s| s.function.parameters["type"] == "object"));
    }
}
