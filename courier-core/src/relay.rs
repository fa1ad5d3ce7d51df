// ABOUTME: Relay turn driver: routes commands, serializes per-chat runs, and drives
// ABOUTME: the fallback chain with progress feedback. Generic over the chat platform.

use crate::commands::{help_text, tail_log, RelayCommand};
use crate::metrics;
use crate::offset::OffsetStore;
use crate::progress::ProgressReporter;
use crate::queue::ChatQueue;
use crate::registry::Registry;
use crate::session::{ContinuationPolicy, SessionDirectory};
use crate::traits::{ChatApi, InboundMessage, SendOptions};
use crate::util::{summarize_tool_action, tool_label, truncate_text};
use courier_agent::{
    build_chain, run_with_fallback, AgentEvent, ProjectSettings, ProviderEndpoint, RunEvent,
    RunHandle, RunResult, RunSpec, RunnerConfig,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const LOG_TAIL_LINES: usize = 20;
const RESTART_DELAY: Duration = Duration::from_millis(100);
const QUOTE_PREVIEW_MAX: usize = 1500;
const ERROR_PREVIEW_MAX: usize = 300;
const STOP_ERROR_PREVIEW_MAX: usize = 160;

/// Tunables and policy for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Users allowed to talk to the relay. Empty means allow everyone;
    /// deployments normally restrict this through configuration.
    pub allowed_users: HashSet<i64>,
    /// Delay before a progress message is created for a run.
    pub progress_delay: Duration,
    /// Interval between typing-indicator refreshes while a run is active.
    pub typing_heartbeat: Duration,
    /// Idle gap after which a non-quote message starts a fresh session.
    pub idle_new_session: Option<Duration>,
    /// Default provider fallback chain.
    pub provider_chain: Vec<ProviderEndpoint>,
    /// Log files tailed by `/logs`.
    pub log_files: Vec<PathBuf>,
    /// Command line spawned (detached) by `/restart`.
    pub restart_command: Option<Vec<String>>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            allowed_users: HashSet::new(),
            progress_delay: crate::progress::PROGRESS_MESSAGE_DELAY,
            typing_heartbeat: Duration::from_millis(4500),
            idle_new_session: Some(Duration::from_secs(2 * 60 * 60)),
            provider_chain: courier_agent::default_chain(),
            log_files: Vec::new(),
            restart_command: None,
        }
    }
}

/// Orchestrates message handling between the chat platform and the agent.
pub struct Relay<A: ChatApi> {
    api: Arc<A>,
    registry: Arc<Registry>,
    queue: ChatQueue,
    sessions: SessionDirectory,
    offset: Arc<OffsetStore>,
    runner: RunnerConfig,
    config: RelayConfig,
}

impl<A: ChatApi> Relay<A> {
    pub fn new(
        api: Arc<A>,
        registry: Arc<Registry>,
        sessions: SessionDirectory,
        offset: Arc<OffsetStore>,
        runner: RunnerConfig,
        config: RelayConfig,
    ) -> Self {
        Self {
            api,
            registry,
            queue: ChatQueue::new(),
            sessions,
            offset,
            runner,
            config,
        }
    }

    /// Route one inbound message. Never blocks the caller: commands are
    /// answered on a spawned task, prompts are chained into the chat's FIFO
    /// lane. Calling this from a single poll loop pins per-chat execution
    /// order to arrival order.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        if !self.config.allowed_users.is_empty()
            && !self.config.allowed_users.contains(&msg.user_id)
        {
            tracing::warn!(
                user_id = msg.user_id,
                chat_id = %msg.chat_id,
                "rejecting message from non-allowed user"
            );
            let relay = Arc::clone(self);
            tokio::spawn(async move {
                relay
                    .send_reply(
                        &msg.chat_id,
                        "⛔ You are not allowed to use this relay.",
                        msg.message_id,
                    )
                    .await;
            });
            return;
        }

        if let Some(command) = RelayCommand::parse(&msg.text) {
            metrics::record_command(command.name());
            let relay = Arc::clone(self);
            tokio::spawn(async move { relay.handle_command(command, msg).await });
            return;
        }

        let relay = Arc::clone(self);
        let chat_id = msg.chat_id.clone();
        self.queue
            .enqueue(&chat_id, async move { relay.run_turn(msg).await });
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&self, command: RelayCommand, msg: InboundMessage) {
        tracing::info!(chat_id = %msg.chat_id, command = command.name(), "handling command");
        match command {
            RelayCommand::Ping => {
                self.send_reply(&msg.chat_id, "🏓 Pong!", msg.message_id).await;
            }
            RelayCommand::Help => {
                self.send_reply(&msg.chat_id, &help_text(), msg.message_id).await;
            }
            RelayCommand::Status => {
                let status = self.status_text(&msg.chat_id);
                self.send_reply(&msg.chat_id, &status, msg.message_id).await;
            }
            RelayCommand::NewSession => {
                self.registry.mark_new_session(&msg.chat_id);
                self.send_reply(
                    &msg.chat_id,
                    "🆕 Next message starts a fresh session.",
                    msg.message_id,
                )
                .await;
            }
            RelayCommand::Stop => {
                // A successful stop announces itself through the stopped
                // run's finalization; only the no-op case needs a reply.
                if !self.registry.stop_chat(&msg.chat_id) {
                    self.send_reply(&msg.chat_id, "ℹ️ No run in progress.", msg.message_id)
                        .await;
                }
            }
            RelayCommand::Logs => {
                let logs = self.logs_text();
                self.send_reply(&msg.chat_id, &logs, msg.message_id).await;
            }
            RelayCommand::Restart => {
                self.handle_restart(&msg).await;
            }
        }
    }

    fn status_text(&self, chat_id: &str) -> String {
        let state = if self.registry.is_running(chat_id) {
            "🔴 agent running"
        } else {
            "🟢 idle"
        };
        let latest = match self.sessions.latest_session(chat_id) {
            Some(session) => format!("`{}` ({})", session.name, session.modified_local()),
            None => "(none)".to_string(),
        };
        [
            "📊 *Status*".to_string(),
            format!("state: {}", state),
            format!("active chats: {}", self.registry.active_count()),
            format!("session dir: `{}`", self.sessions.root().join(chat_id).display()),
            format!("latest session: {}", latest),
            format!("offset: {}", self.offset.current()),
        ]
        .join("\n")
    }

    fn logs_text(&self) -> String {
        let mut sections = Vec::new();
        for path in &self.config.log_files {
            let tail = tail_log(path, LOG_TAIL_LINES);
            if tail.is_empty() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            sections.push(format!("📝 *{}*\n```\n{}\n```", name, tail));
        }
        if sections.is_empty() {
            "📭 No log output yet.".to_string()
        } else {
            sections.join("\n")
        }
    }

    async fn handle_restart(&self, msg: &InboundMessage) {
        let Some(command) = self.config.restart_command.clone() else {
            self.send_reply(&msg.chat_id, "ℹ️ No restart command configured.", msg.message_id)
                .await;
            return;
        };
        tracing::info!(?command, "scheduling service restart");
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            let Some((program, args)) = command.split_first() else {
                return;
            };
            let spawned = tokio::process::Command::new(program)
                .args(args)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn();
            if let Err(e) = spawned {
                tracing::error!(error = %e, "failed spawning restart command");
            }
        });
    }

    // =========================================================================
    // Prompt turns
    // =========================================================================

    async fn run_turn(&self, msg: InboundMessage) {
        metrics::record_run_started();
        let started = Instant::now();

        let chat_dir = match self.sessions.chat_dir(&msg.chat_id) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(chat_id = %msg.chat_id, error = %e, "failed preparing session dir");
                metrics::record_error("session_dir");
                self.send_reply(
                    &msg.chat_id,
                    "🔴 Failed to prepare the session directory.",
                    msg.message_id,
                )
                .await;
                return;
            }
        };

        let force_new = self.registry.take_new_session(&msg.chat_id);
        let now = if msg.timestamp_secs > 0 {
            msg.timestamp_secs
        } else {
            now_secs()
        };
        let policy = ContinuationPolicy {
            idle_timeout: self.config.idle_new_session,
        };
        let continue_session = policy.decide(
            msg.is_quote_reply(),
            force_new,
            self.registry.last_inbound_at(&msg.chat_id),
            now,
        );
        self.registry.set_last_inbound_at(&msg.chat_id, now);
        tracing::info!(
            chat_id = %msg.chat_id,
            continue_session,
            force_new,
            "starting agent run"
        );

        let handle = Arc::new(RunHandle::new());
        handle.set_heartbeat(self.spawn_typing_heartbeat(msg.chat_id.clone()));
        if let Err(e) = self.api.send_typing(&msg.chat_id).await {
            tracing::debug!(error = %e, "typing indicator failed");
        }
        self.registry.begin_run(&msg.chat_id, Arc::clone(&handle));

        let result = self
            .drive_run(&msg, &chat_dir, continue_session, &handle)
            .await;

        handle.cancel_heartbeat();
        self.finalize_run(&msg, &result, handle.is_stopped()).await;
        self.registry.end_run(&msg.chat_id);
        metrics::record_run_duration(started.elapsed().as_secs_f64());
    }

    async fn drive_run(
        &self,
        msg: &InboundMessage,
        chat_dir: &Path,
        continue_session: bool,
        handle: &Arc<RunHandle>,
    ) -> RunResult {
        let spec = RunSpec {
            prompt: build_prompt(msg),
            session_dir: chat_dir.to_path_buf(),
            continue_session,
            chat_id: msg.chat_id.clone(),
            reply_to_message_id: msg.message_id,
        };
        let settings = ProjectSettings::load(&self.runner.project_dir);
        let chain = build_chain(settings.preferred_endpoint(), &self.config.provider_chain);

        let progress = ProgressReporter::start(
            Arc::clone(&self.api),
            msg.chat_id.clone(),
            self.config.progress_delay,
        );
        let mut state = ProgressState::default();
        let mut sink = |event: RunEvent| match event {
            RunEvent::ProviderSwitch(endpoint) => {
                metrics::record_provider_attempt(&endpoint.provider);
                state.model_label = endpoint.model.clone();
            }
            RunEvent::Agent(event) => {
                if state.apply(&event) {
                    progress.update(state.render());
                }
            }
        };

        let result = run_with_fallback(&self.runner, &spec, &chain, handle, &mut sink).await;
        progress.finish().await;
        result
    }

    async fn finalize_run(&self, msg: &InboundMessage, result: &RunResult, stop_requested: bool) {
        match run_state(result, stop_requested) {
            RunState::Stopped => {
                tracing::info!(chat_id = %msg.chat_id, "run stopped by user");
                metrics::record_run_outcome("stopped");
                self.send_reply(&msg.chat_id, "🛑 Run stopped.", msg.message_id).await;
            }
            RunState::StopNoEffect => {
                metrics::record_run_outcome("stop_no_effect");
                self.send_reply(
                    &msg.chat_id,
                    "❌ Stop had no effect: the run had already finished.",
                    msg.message_id,
                )
                .await;
            }
            RunState::StopFailed => {
                tracing::error!(chat_id = %msg.chat_id, error = result.error_text(), "run failed during stop");
                metrics::record_run_outcome("stop_failed");
                let text = format!(
                    "❌ Stop failed: {}",
                    truncate_text(result.error_text(), STOP_ERROR_PREVIEW_MAX)
                );
                self.send_reply(&msg.chat_id, &text, msg.message_id).await;
            }
            RunState::Failed => {
                tracing::error!(chat_id = %msg.chat_id, error = result.error_text(), "run failed");
                metrics::record_run_outcome("failed");
                metrics::record_error("run");
                let text = format!(
                    "🔴 Run failed: {}",
                    truncate_text(result.error_text(), ERROR_PREVIEW_MAX)
                );
                self.send_reply(&msg.chat_id, &text, msg.message_id).await;
            }
            RunState::Completed => {
                metrics::record_run_outcome("ok");
                let output = result.output.trim();
                let text = if output.is_empty() {
                    "✅ Processed."
                } else {
                    output
                };
                self.send_reply(&msg.chat_id, text, msg.message_id).await;
            }
        }
    }

    fn spawn_typing_heartbeat(&self, chat_id: String) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let period = self.config.typing_heartbeat;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                if let Err(e) = api.send_typing(&chat_id).await {
                    tracing::debug!(chat_id = %chat_id, error = %e, "typing heartbeat failed");
                }
            }
        })
    }

    async fn send_reply(&self, chat_id: &str, text: &str, reply_to: i32) {
        let sent = self
            .api
            .send_message(chat_id, text, SendOptions::reply(reply_to))
            .await;
        if let Err(e) = sent {
            tracing::error!(chat_id = %chat_id, error = %e, "failed sending reply");
            metrics::record_error("send_reply");
        }
    }
}

// =============================================================================
// Run state and progress rendering
// =============================================================================

/// How one finished run should be reported back to the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    StopNoEffect,
    StopFailed,
    Failed,
    Completed,
}

fn run_state(result: &RunResult, stop_requested: bool) -> RunState {
    if result.stopped {
        RunState::Stopped
    } else if stop_requested && result.ok {
        RunState::StopNoEffect
    } else if stop_requested {
        RunState::StopFailed
    } else if !result.ok {
        RunState::Failed
    } else {
        RunState::Completed
    }
}

/// Mutable view of a run's progress, rendered into the status message.
#[derive(Debug, Clone)]
struct ProgressState {
    phase: String,
    tool_steps: u32,
    last_tool: String,
    last_detail: String,
    model_label: String,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            phase: "thinking".to_string(),
            tool_steps: 0,
            last_tool: String::new(),
            last_detail: String::new(),
            model_label: String::new(),
        }
    }
}

impl ProgressState {
    /// Fold one agent event into the state. Returns whether the rendered
    /// text should be refreshed.
    fn apply(&mut self, event: &AgentEvent) -> bool {
        match event {
            AgentEvent::MessageStart { message } if message.is_assistant() => {
                self.phase = "thinking".to_string();
                true
            }
            AgentEvent::ToolExecutionStart { tool_name, args } => {
                self.phase = "running a tool".to_string();
                self.tool_steps += 1;
                self.last_tool = tool_label(tool_name);
                self.last_detail = summarize_tool_action(tool_name, args);
                true
            }
            AgentEvent::AutoCompactionStart => {
                self.phase = "compacting context".to_string();
                true
            }
            AgentEvent::AutoRetryStart {
                attempt,
                max_attempts,
            } => {
                let attempt = attempt.map_or_else(|| "?".to_string(), |a| a.to_string());
                let max = max_attempts.map_or_else(|| "?".to_string(), |m| m.to_string());
                self.phase = format!("auto-retry {}/{}", attempt, max);
                true
            }
            _ => false,
        }
    }

    fn render(&self) -> String {
        let model = if self.model_label.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.model_label)
        };
        if self.tool_steps > 0 {
            let detail = if self.last_detail.is_empty() {
                &self.last_tool
            } else {
                &self.last_detail
            };
            format!("✨ {}…{}\nstep {}: {}", self.phase, model, self.tool_steps, detail)
        } else {
            format!("✨ {}…{}", self.phase, model)
        }
    }
}

/// Build the agent prompt from an inbound message, including quoted context.
fn build_prompt(msg: &InboundMessage) -> String {
    let chat_type = if msg.is_direct { "private" } else { "group" };
    let mut lines = vec![
        "[Telegram inbound]".to_string(),
        format!("from: {} chat_type={}", msg.sender_name, chat_type),
        "message:".to_string(),
        msg.text.clone(),
    ];
    if let Some(quote) = &msg.quote {
        lines.push(String::new());
        lines.push("reply_to:".to_string());
        lines.push(format!("from: {}", quote.sender_name));
        lines.push("message:".to_string());
        lines.push(truncate_text(&quote.text, QUOTE_PREVIEW_MAX));
    }
    lines.join("\n")
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
