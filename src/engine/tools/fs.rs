// Skiff Engine — File tools
// file_read, file_write, file_edit. All file I/O goes through the tool
// runtime (cat / mkdir -p / tee) so the same code serves both the local
// process binding and the remote sandbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::atoms::constants::DEFAULT_TOOL_TIMEOUT_SECS;
use super::runtime::ToolRuntime;
use super::Tool;

fn timeout() -> Duration {
    Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS)
}

// ── file_read ──────────────────────────────────────────────────────────────

pub struct FileReadTool {
    runtime: Arc<dyn ToolRuntime>,
}

impl FileReadTool {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        FileReadTool { runtime }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &'static str {
        "file_read"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: &Value) -> String {
        let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
            return "Error reading file: missing 'path' argument".to_string();
        };
        match self.runtime.run(&["cat", path], None, timeout()).await {
            Ok(content) => content,
            Err(e) => format!("Error reading file: {}", e),
        }
    }
}

// ── file_write ─────────────────────────────────────────────────────────────

pub struct FileWriteTool {
    runtime: Arc<dyn ToolRuntime>,
}

impl FileWriteTool {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        FileWriteTool { runtime }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &'static str {
        "file_write"
    }

    fn description(&self) -> &'static str {
        "Write content to a file at the given path. Creates parent directories if needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to."
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: &Value) -> String {
        let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
            return "Error writing file: missing 'path' argument".to_string();
        };
        let content = arguments.get("content").and_then(|v| v.as_str()).unwrap_or("");

        let parent = std::path::Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());

        if let Err(e) = self.runtime.run(&["mkdir", "-p", &parent], None, timeout()).await {
            return format!("Error writing file: {}", e);
        }
        match self.runtime.run(&["tee", path], Some(content), timeout()).await {
            Ok(_) => format!("Successfully wrote to {}", path),
            Err(e) => format!("Error writing file: {}", e),
        }
    }
}

// ── file_edit ──────────────────────────────────────────────────────────────

pub struct FileEditTool {
    runtime: Arc<dyn ToolRuntime>,
}

impl FileEditTool {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        FileEditTool { runtime }
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &'static str {
        "file_edit"
    }

    fn description(&self) -> &'static str {
        "Edit a file by replacing an exact string match with new content. \
         The old_string must match exactly (including whitespace/indentation). \
         Provide enough context in old_string to make it unique in the file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to edit."
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find and replace. Must be unique in the file."
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string."
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, arguments: &Value) -> String {
        let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
            return "Error reading file: missing 'path' argument".to_string();
        };
        let old_string = arguments.get("old_string").and_then(|v| v.as_str()).unwrap_or("");
        let new_string = arguments.get("new_string").and_then(|v| v.as_str()).unwrap_or("");

        let content = match self.runtime.run(&["cat", path], None, timeout()).await {
            Ok(c) => c,
            Err(e) => return format!("Error reading file: {}", e),
        };

        if old_string == new_string {
            return "Error: old_string and new_string are identical.".to_string();
        }

        // The uniqueness requirement forces the caller to supply enough
        // context and is part of the contract.
        let count = content.matches(old_string).count();
        if count == 0 {
            return "Error: old_string not found in file.".to_string();
        }
        if count > 1 {
            return format!(
                "Error: old_string matches {} locations. Provide more context to make it unique.",
                count
            );
        }

        let new_content = content.replacen(old_string, new_string, 1);
        match self.runtime.run(&["tee", path], Some(&new_content), timeout()).await {
            Ok(_) => format!("Successfully edited {}", path),
            Err(e) => format!("Error writing file: {}", e),
        }
    }
}
