//! Generic command execution and the child-process runner shared by all
//! process-backed tools.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use super::{optional_str, required_str, Tool, ToolContext};

/// Output beyond this many characters is cut before it reaches the model.
const MAX_OUTPUT_CHARS: usize = 50_000;

/// Run a system command through a shell.
pub struct Exec;

#[async_trait]
impl Tool for Exec {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a system command. Use with care, only for operations the dedicated tools cannot cover."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The system command to execute"
                },
                "shell": {
                    "type": "string",
                    "description": "Shell to use (optional, defaults to sh)"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = required_str(args, "command")?;
        let shell = optional_str(args, "shell").unwrap_or("sh");
        let workdir = optional_str(args, "workdir")
            .map(|dir| ctx.workdir.join(dir))
            .unwrap_or_else(|| ctx.workdir.clone());

        tracing::info!(command = %command, shell = %shell, "Executing command");

        run_process(
            shell,
            &["-c".to_string(), command.to_string()],
            &workdir,
            ctx.timeout,
        )
        .await
    }
}

/// Spawn `program`, wait for it with a timeout, and render exit code,
/// stdout and stderr as one text block.
///
/// The child is killed if the returned future is dropped.
pub(crate) async fn run_process(
    program: &str,
    args: &[String],
    workdir: &Path,
    timeout: Duration,
) -> anyhow::Result<String> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("{} timed out after {} seconds", program, timeout.as_secs()))?
    .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let exit_code = output.status.code().unwrap_or(-1);

    let mut result = format!("Exit code: {}\n", exit_code);

    if !stdout.is_empty() {
        result.push_str("\n--- stdout ---\n");
        result.push_str(&stdout);
    }

    if !stderr.is_empty() {
        result.push_str("\n--- stderr ---\n");
        result.push_str(&stderr);
    }

    if let Some((idx, _)) = result.char_indices().nth(MAX_OUTPUT_CHARS) {
        result.truncate(idx);
        result.push_str("\n... [output truncated]");
    }

    Ok(result)
}
