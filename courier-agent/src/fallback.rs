// ABOUTME: Ordered provider/model fallback chain driving the process runner.
// ABOUTME: Tries endpoints in sequence until success, exhaustion, or an external stop.

use crate::event::AgentEvent;
use crate::handle::RunHandle;
use crate::runner::{run_once, RunResult, RunSpec, RunnerConfig};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// One provider/model pair in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub provider: String,
    pub model: String,
}

impl ProviderEndpoint {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Built-in fallback order, used when no chain is configured.
pub fn default_chain() -> Vec<ProviderEndpoint> {
    vec![
        ProviderEndpoint::new("openai-codex", "gpt-5-codex"),
        ProviderEndpoint::new("anthropic", "claude-opus-4"),
        ProviderEndpoint::new("google-gemini-cli", "gemini-2.5-pro"),
        ProviderEndpoint::new("openrouter", "auto"),
    ]
}

/// Project-level agent settings (`.pi/settings.json` in the project dir).
/// Only the default provider/model preference matters to the relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectSettings {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
}

impl ProjectSettings {
    /// Load settings from the project directory. A missing file is normal;
    /// an unreadable one is logged and treated as empty.
    pub fn load(project_dir: &Path) -> Self {
        let path = project_dir.join(".pi").join("settings.json");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed reading project settings");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed parsing project settings");
                Self::default()
            }
        }
    }

    /// Preferred endpoint, present only when both halves are configured.
    pub fn preferred_endpoint(&self) -> Option<ProviderEndpoint> {
        match (&self.default_provider, &self.default_model) {
            (Some(provider), Some(model)) => Some(ProviderEndpoint::new(provider, model)),
            _ => None,
        }
    }
}

/// Build the effective chain: the preferred endpoint first (when set),
/// followed by the defaults with any duplicate of the preference removed.
pub fn build_chain(
    preferred: Option<ProviderEndpoint>,
    defaults: &[ProviderEndpoint],
) -> Vec<ProviderEndpoint> {
    let mut chain = Vec::with_capacity(defaults.len() + 1);
    if let Some(preferred) = preferred {
        chain.push(preferred);
    }
    for endpoint in defaults {
        if !chain.contains(endpoint) {
            chain.push(endpoint.clone());
        }
    }
    chain
}

/// Events surfaced to the caller while a fallback run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The orchestrator is about to try this endpoint.
    ProviderSwitch(ProviderEndpoint),
    /// An event from the agent process itself.
    Agent(AgentEvent),
}

/// Drive the runner across the chain until one attempt succeeds, the chain
/// is exhausted, or the run is stopped externally.
///
/// Only the first attempt honours the caller's continuation intent; every
/// later attempt forces `--continue` so switching providers mid-run never
/// discards conversation context. A signal-killed attempt aborts the chain:
/// a kill means the user wants the whole run stopped, not a provider retry.
pub async fn run_with_fallback(
    config: &RunnerConfig,
    spec: &RunSpec,
    chain: &[ProviderEndpoint],
    handle: &Arc<RunHandle>,
    on_event: &mut (dyn FnMut(RunEvent) + Send),
) -> RunResult {
    let mut last_error: Option<String> = None;
    let mut tried: Vec<String> = Vec::new();

    for (index, endpoint) in chain.iter().enumerate() {
        if handle.is_stopped() {
            tracing::info!("run stopped externally, aborting fallback chain");
            return RunResult::stopped("run stopped by user");
        }

        tracing::info!(endpoint = %endpoint, attempt = index, "trying provider");
        on_event(RunEvent::ProviderSwitch(endpoint.clone()));

        let attempt_spec = RunSpec {
            continue_session: if index == 0 { spec.continue_session } else { true },
            ..spec.clone()
        };

        let mut forward = |event: AgentEvent| on_event(RunEvent::Agent(event));
        let result = run_once(config, &attempt_spec, Some(endpoint), handle, &mut forward).await;

        if result.ok {
            if index > 0 {
                tracing::info!(
                    trace = %format!("{} → {}", tried.join(" → "), endpoint),
                    "provider fallback succeeded"
                );
            }
            return result;
        }

        if result.stopped {
            tracing::info!(endpoint = %endpoint, "attempt stopped by signal, aborting fallback chain");
            return result;
        }

        tracing::warn!(
            endpoint = %endpoint,
            error = %result.error_text(),
            "provider attempt failed, advancing"
        );
        tried.push(endpoint.provider.clone());
        last_error = result.error;
    }

    RunResult::failed(last_error.unwrap_or_else(|| "all providers failed".to_string()))
}

// =============================================================================
// Tests
// =============================================================================
