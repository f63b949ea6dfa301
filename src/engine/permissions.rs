// Skiff Engine — Tool permission evaluator
// Decides whether a tool call is pre-authorized from a static allow list.
// File tools are always allowed; bash commands are matched against
// `Bash(<prog>:<args>)` glob patterns; everything else is denied.
//
// Config file: $SKIFF_HOME/permissions.json
// {
//     "permissions": {
//         "allow": ["Bash(python:*)", "Bash(ls:*)", "Bash(cat:*)"]
//     }
// }

use std::path::Path;

use glob::Pattern;
use log::warn;
use serde::Deserialize;

/// Tools that are always allowed without permission checks.
const ALWAYS_ALLOWED: &[&str] = &["file_read", "file_write", "file_edit"];

#[derive(Debug, Deserialize, Default)]
struct PermissionsFile {
    #[serde(default)]
    permissions: PermissionsSection,
}

#[derive(Debug, Deserialize, Default)]
struct PermissionsSection {
    #[serde(default)]
    allow: Vec<String>,
}

/// Static permission evaluator. `is_allowed` depends only on the loaded
/// config and its arguments — the per-chat auto-approve latch is a separate
/// concern handled by the agent loop.
#[derive(Debug, Default)]
pub struct PermissionManager {
    allow_patterns: Vec<String>,
}

impl PermissionManager {
    pub fn new(allow_patterns: Vec<String>) -> Self {
        PermissionManager { allow_patterns }
    }

    /// Load the allow list from a JSON config file. A missing or malformed
    /// file yields an empty allow list (deny-by-default for bash).
    pub fn load(config_path: &Path) -> Self {
        let patterns = match std::fs::read_to_string(config_path) {
            Ok(raw) => match serde_json::from_str::<PermissionsFile>(&raw) {
                Ok(file) => file.permissions.allow,
                Err(e) => {
                    warn!("[skiff] permissions: ignoring malformed {:?}: {}", config_path, e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        PermissionManager::new(patterns)
    }

    /// Is this tool call pre-authorized?
    pub fn is_allowed(&self, tool_name: &str, arguments: &serde_json::Value) -> bool {
        if ALWAYS_ALLOWED.contains(&tool_name) {
            return true;
        }
        if tool_name == "bash" {
            let command = arguments.get("command").and_then(|v| v.as_str()).unwrap_or("");
            return self.check_bash_permission(command);
        }
        // Unknown tools are denied by default.
        false
    }

    /// Match a bash command against the allow patterns.
    ///
    /// Pattern format: `Bash(<program>:<args_pattern>)`
    /// - the program glob is matched against the first token of the command
    /// - the args glob is matched against the remainder
    /// - `Bash(<program>)` matches regardless of args
    /// - `Bash(*)` allows all bash commands
    fn check_bash_permission(&self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }

        let (program, args) = match command.split_once(char::is_whitespace) {
            Some((prog, rest)) => (prog, rest.trim_start()),
            None => (command, ""),
        };

        for pattern in &self.allow_patterns {
            let Some(inner) = pattern
                .strip_prefix("Bash(")
                .and_then(|rest| rest.strip_suffix(')'))
            else {
                continue;
            };

            if inner == "*" {
                return true;
            }

            match inner.split_once(':') {
                None => {
                    if glob_match(program, inner) {
                        return true;
                    }
                }
                Some((prog_pattern, args_pattern)) => {
                    if !glob_match(program, prog_pattern) {
                        continue;
                    }
                    if args_pattern == "*" || glob_match(args, args_pattern) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// Shell-style glob over the whole string (`*` crosses `/`), not per path
/// segment. An invalid pattern matches nothing.
fn glob_match(s: &str, pattern: &str) -> bool {
    Pattern::new(pattern).map(|p| p.matches(s)).unwrap_or(false)
}
