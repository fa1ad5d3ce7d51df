// ABOUTME: Spawns one agent CLI invocation and bridges its JSONL stdout into AgentEvents.
// ABOUTME: Resolves a RunResult from exit status, cleaned stderr, and API-level error events.

use crate::event::AgentEvent;
use crate::fallback::ProviderEndpoint;
use crate::handle::RunHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// How the agent binary is invoked.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Agent executable name or path (resolved via PATH when bare).
    pub binary: String,
    /// Working directory for the agent; also where project settings live.
    pub project_dir: PathBuf,
}

/// One prompt dispatch: everything a single invocation needs besides the
/// provider endpoint, which the fallback loop supplies per attempt.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub prompt: String,
    pub session_dir: PathBuf,
    pub continue_session: bool,
    /// Originating chat, passed through to the agent's environment.
    pub chat_id: String,
    /// Message being replied to, passed through to the agent's environment.
    pub reply_to_message_id: i32,
}

/// Terminal outcome of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
    pub stopped: bool,
}

impl RunResult {
    pub fn success(output: String) -> Self {
        Self {
            ok: true,
            output,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn stopped(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            stopped: true,
            ..Default::default()
        }
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

fn build_args(spec: &RunSpec, endpoint: Option<&ProviderEndpoint>) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        "--mode".to_string(),
        "json".to_string(),
        "--session-dir".to_string(),
        spec.session_dir.to_string_lossy().into_owned(),
    ];
    if spec.continue_session {
        args.push("--continue".to_string());
    }
    if let Some(endpoint) = endpoint {
        args.push("--provider".to_string());
        args.push(endpoint.provider.clone());
        args.push("--model".to_string());
        args.push(endpoint.model.clone());
    }
    args.push(spec.prompt.clone());
    args
}

/// Run the agent once and wait for it to settle.
///
/// Every parsed stdout event is forwarded to `on_event`; malformed lines are
/// dropped. The child's pid is registered into `handle` right after spawn so
/// an external stop can signal it, and cleared before this function returns.
///
/// Resolution priority: killed by signal → stopped; non-zero exit → error
/// from cleaned stderr; zero exit with a captured API error and no assistant
/// text → that error; otherwise success with the assistant text.
pub async fn run_once(
    config: &RunnerConfig,
    spec: &RunSpec,
    endpoint: Option<&ProviderEndpoint>,
    handle: &Arc<RunHandle>,
    on_event: &mut (dyn FnMut(AgentEvent) + Send),
) -> RunResult {
    let args = build_args(spec, endpoint);
    tracing::debug!(binary = %config.binary, ?args, "spawning agent");

    let spawned = Command::new(&config.binary)
        .args(&args)
        .current_dir(&config.project_dir)
        .env("TELEGRAM_DEFAULT_CHAT_ID", &spec.chat_id)
        .env(
            "TELEGRAM_REPLY_TO_MESSAGE_ID",
            spec.reply_to_message_id.to_string(),
        )
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return RunResult::failed(format!("failed to spawn {}: {}", config.binary, e));
        }
    };

    let pid = child.id();
    if let Some(pid) = pid {
        handle.register_child(pid);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Buffer stderr in full; it only matters on a non-zero exit.
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    let mut assistant_output = String::new();
    let mut api_error: Option<String> = None;

    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(event) = AgentEvent::from_line(&line) else {
                continue;
            };
            if let AgentEvent::MessageEnd { message } = &event {
                if let Some(error) = message.api_error() {
                    api_error = Some(error.to_string());
                }
                let text = message.assistant_text();
                if !text.is_empty() {
                    assistant_output = text;
                }
            }
            on_event(event);
        }
    }

    let status = child.wait().await;
    let stderr_text = stderr_task.await.unwrap_or_default();
    if let Some(pid) = pid {
        handle.clear_child(pid);
    }

    let status = match status {
        Ok(status) => status,
        Err(e) => return RunResult::failed(format!("failed waiting for agent: {}", e)),
    };

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            tracing::info!(signal, "agent killed by signal");
            return RunResult::stopped(format!("agent killed by signal {}", signal));
        }
    }

    if !status.success() {
        let detail = strip_ansi(&stderr_text);
        let detail = detail.trim();
        if detail.is_empty() {
            return RunResult::failed(format!("agent exited with {:?}", status.code()));
        }
        return RunResult::failed(detail);
    }

    if assistant_output.is_empty() {
        if let Some(error) = api_error {
            return RunResult::failed(error);
        }
    }

    RunResult::success(assistant_output)
}

/// Strip ANSI CSI escape sequences (colors, cursor movement) so terminal
/// output reads cleanly in chat.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // Parameter and intermediate bytes run until a final byte in @..~
            for follow in chars.by_ref() {
                if ('@'..='~').contains(&follow) {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
