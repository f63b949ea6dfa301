// Skiff Engine — Tool runtime
// The single capability every tool executes through: run an argv command
// with optional stdin under a wall-clock timeout, returning combined
// stdout+stderr. Two bindings: a local process spawn and a remote sandbox
// addressed by a per-user VM config.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::VmConfig;

#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Run `cmd` (argv form, no shell) and return its combined output.
    /// Implementations must kill the command when `timeout` expires and
    /// return [`EngineError::Timeout`].
    async fn run(&self, cmd: &[&str], stdin: Option<&str>, timeout: Duration)
        -> EngineResult<String>;
}

// ── Local binding ──────────────────────────────────────────────────────────

/// Spawns commands as local child processes.
#[derive(Debug, Default)]
pub struct LocalRuntime;

#[async_trait]
impl ToolRuntime for LocalRuntime {
    async fn run(&self, cmd: &[&str], stdin: Option<&str>, timeout: Duration)
        -> EngineResult<String>
    {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| EngineError::Process("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Process(format!("failed to spawn {}: {}", program, e)))?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
                // Dropping the handle closes the pipe so the child sees EOF.
            }
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            // Child is killed on drop via kill_on_drop(true).
            Err(_) => return Err(EngineError::Timeout(timeout.as_secs())),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() && combined.is_empty() {
            return Err(EngineError::Process(format!(
                "{} exited with status {}",
                program,
                output.status.code().unwrap_or(-1)
            )));
        }

        Ok(combined)
    }
}

// ── Remote sandbox binding ─────────────────────────────────────────────────

/// Executes commands inside a per-user sandbox VM over its exec API.
pub struct RemoteRuntime {
    client: Client,
    api_url: String,
    config: VmConfig,
}

impl RemoteRuntime {
    pub fn new(api_url: impl Into<String>, config: VmConfig) -> Self {
        RemoteRuntime {
            client: Client::new(),
            api_url: api_url.into(),
            config,
        }
    }
}

#[async_trait]
impl ToolRuntime for RemoteRuntime {
    async fn run(&self, cmd: &[&str], stdin: Option<&str>, timeout: Duration)
        -> EngineResult<String>
    {
        let url = format!(
            "{}/v1/sandboxes/{}/exec",
            self.api_url.trim_end_matches('/'),
            self.config.vm_name
        );
        info!("[skiff] remote exec on {}: {:?}", self.config.vm_name, cmd.first());

        let mut params: Vec<(&str, &str)> = cmd.iter().map(|c| ("cmd", *c)).collect();
        if stdin.is_some() {
            params.push(("stdin", "true"));
        }

        let mut req = self
            .client
            .post(&url)
            .query(&params)
            .bearer_auth(&self.config.api_token)
            .timeout(timeout);
        if let Some(input) = stdin {
            req = req.body(input.as_bytes().to_vec());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(timeout.as_secs())
            } else {
                EngineError::Network(e)
            }
        })?;

        if !resp.status().is_success() {
            return Err(EngineError::Process(format!(
                "sandbox exec failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_runtime_captures_stdout() {
        let rt = LocalRuntime;
        let out = rt
            .run(&["echo", "hello"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn local_runtime_pipes_stdin() {
        let rt = LocalRuntime;
        let out = rt
            .run(&["cat"], Some("piped input"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "piped input");
    }

    #[tokio::test]
    async fn local_runtime_times_out() {
        let rt = LocalRuntime;
        let err = rt
            .run(&["sleep", "5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn local_runtime_combines_stderr() {
        let rt = LocalRuntime;
        let out = rt
            .run(&["sh", "-c", "echo out; echo err 1>&2"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }
}
