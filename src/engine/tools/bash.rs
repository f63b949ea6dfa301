// Skiff Engine — bash tool

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::atoms::constants::DEFAULT_TOOL_TIMEOUT_SECS;
use crate::atoms::error::EngineError;
use super::runtime::ToolRuntime;
use super::Tool;

pub struct BashTool {
    runtime: Arc<dyn ToolRuntime>,
    timeout_secs: u64,
}

impl BashTool {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        BashTool { runtime, timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn description(&self) -> &'static str {
        "Run a shell command and return stdout and stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: &Value) -> String {
        let Some(command) = arguments.get("command").and_then(|v| v.as_str()) else {
            return "Error running command: missing 'command' argument".to_string();
        };

        let timeout = Duration::from_secs(self.timeout_secs);
        match self.runtime.run(&["sh", "-c", command], None, timeout).await {
            Ok(output) if output.is_empty() => "(no output)".to_string(),
            Ok(output) => output,
            Err(EngineError::Timeout(secs)) => {
                format!("Error: command timed out after {} seconds", secs)
            }
            Err(e) => format!("Error running command: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::runtime::LocalRuntime;
    use super::*;

    fn tool() -> BashTool {
        BashTool::new(Arc::new(LocalRuntime))
    }

    #[tokio::test]
    async fn runs_command_and_returns_output() {
        let out = tool().execute(&json!({"command": "echo skiff"})).await;
        assert_eq!(out.trim(), "skiff");
    }

    #[tokio::test]
    async fn silent_command_reports_no_output() {
        let out = tool().execute(&json!({"command": "true"})).await;
        assert_eq!(out, "(no output)");
    }

    #[tokio::test]
    async fn timeout_produces_fixed_error_string() {
        let mut t = tool();
        t.timeout_secs = 1;
        let out = t.execute(&json!({"command": "sleep 10"})).await;
        assert_eq!(out, "Error: command timed out after 1 seconds");
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let out = tool().execute(&json!({"command": "echo oops 1>&2"})).await;
        assert_eq!(out.trim(), "oops");
    }
}
