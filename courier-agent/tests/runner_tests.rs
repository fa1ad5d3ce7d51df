// ABOUTME: Integration tests for the process runner and fallback chain.
// ABOUTME: Uses shell-script fake agents to exercise real spawn/exit/signal paths.

#![cfg(unix)]

use courier_agent::{
    run_once, run_with_fallback, AgentEvent, ProviderEndpoint, RunEvent, RunHandle, RunSpec,
    RunnerConfig, StopMode,
};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Write an executable fake-agent script and return a runner config for it.
fn fake_agent(dir: &TempDir, body: &str) -> RunnerConfig {
    let path = dir.path().join("agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    RunnerConfig {
        binary: path.to_string_lossy().into_owned(),
        project_dir: dir.path().to_path_buf(),
    }
}

fn spec(session_dir: &Path) -> RunSpec {
    RunSpec {
        prompt: "do the thing".to_string(),
        session_dir: session_dir.to_path_buf(),
        continue_session: false,
        chat_id: "4242".to_string(),
        reply_to_message_id: 17,
    }
}

fn event_sink() -> (Arc<Mutex<Vec<AgentEvent>>>, impl FnMut(AgentEvent) + Send) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink = move |event: AgentEvent| sink_events.lock().unwrap().push(event);
    (events, sink)
}

const OK_RESPONSE: &str = r#"printf '%s\n' '{"type":"message_start","message":{"role":"assistant"}}'
printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"all done"}]}}'"#;

#[tokio::test]
async fn test_successful_run_returns_assistant_text() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(&dir, OK_RESPONSE);
    let handle = Arc::new(RunHandle::new());
    let (events, mut sink) = event_sink();

    let result = run_once(&config, &spec(dir.path()), None, &handle, &mut sink).await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.output, "all done");
    assert!(!result.stopped);
    assert_eq!(events.lock().unwrap().len(), 2);
    assert!(handle.child_pid().is_none(), "pid must be cleared on settle");
}

#[tokio::test]
async fn test_env_passthrough_to_agent() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        r#"printf '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"chat=%s reply=%s"}]}}\n' "$TELEGRAM_DEFAULT_CHAT_ID" "$TELEGRAM_REPLY_TO_MESSAGE_ID""#,
    );
    let handle = Arc::new(RunHandle::new());
    let mut sink = |_: AgentEvent| {};

    let result = run_once(&config, &spec(dir.path()), None, &handle, &mut sink).await;

    assert!(result.ok);
    assert_eq!(result.output, "chat=4242 reply=17");
}

#[tokio::test]
async fn test_api_error_on_clean_exit_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        r#"printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[],"stopReason":"error","errorMessage":"quota exhausted"}}'"#,
    );
    let handle = Arc::new(RunHandle::new());
    let mut sink = |_: AgentEvent| {};

    let result = run_once(&config, &spec(dir.path()), None, &handle, &mut sink).await;

    assert!(!result.ok);
    assert!(!result.stopped);
    assert_eq!(result.error.as_deref(), Some("quota exhausted"));
}

#[tokio::test]
async fn test_nonzero_exit_surfaces_cleaned_stderr() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        "printf '\\033[31mfatal:\\033[0m no credentials\\n' >&2\nexit 3",
    );
    let handle = Arc::new(RunHandle::new());
    let mut sink = |_: AgentEvent| {};

    let result = run_once(&config, &spec(dir.path()), None, &handle, &mut sink).await;

    assert!(!result.ok);
    assert!(!result.stopped);
    assert_eq!(result.error.as_deref(), Some("fatal: no credentials"));
}

#[tokio::test]
async fn test_malformed_lines_are_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        r#"echo 'this is not json'
printf '%s\n' '{"type":"tool_execution_start","toolName":"bash","args":{"command":"ls"}}'
printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"ok"}]}}'"#,
    );
    let handle = Arc::new(RunHandle::new());
    let (events, mut sink) = event_sink();

    let result = run_once(&config, &spec(dir.path()), None, &handle, &mut sink).await;

    assert!(result.ok);
    assert_eq!(result.output, "ok");
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stop_kills_running_agent() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(&dir, "sleep 30");
    let handle = Arc::new(RunHandle::new());
    let run_handle = Arc::clone(&handle);
    let run_spec = spec(dir.path());

    let task = tokio::spawn(async move {
        let mut sink = |_: AgentEvent| {};
        run_once(&config, &run_spec, None, &run_handle, &mut sink).await
    });

    // Wait for the child to register, then stop it.
    for _ in 0..200 {
        if handle.has_child() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.has_child(), "agent never registered its pid");
    handle.stop(StopMode::User);

    let result = task.await.unwrap();
    assert!(result.stopped, "expected a stopped result: {:?}", result);
    assert!(!result.ok);
}

#[tokio::test]
async fn test_fallback_advances_past_failing_provider() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        r#"case "$*" in
  *"--provider alpha"*)
    echo 'alpha is down' >&2
    exit 1
    ;;
  *)
    printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"served by beta"}]}}'
    ;;
esac"#,
    );
    let handle = Arc::new(RunHandle::new());
    let chain = vec![
        ProviderEndpoint::new("alpha", "m1"),
        ProviderEndpoint::new("beta", "m2"),
    ];
    let switches = Arc::new(Mutex::new(Vec::new()));
    let sink_switches = Arc::clone(&switches);
    let mut sink = move |event: RunEvent| {
        if let RunEvent::ProviderSwitch(endpoint) = event {
            sink_switches.lock().unwrap().push(endpoint.provider.clone());
        }
    };

    let result = run_with_fallback(&config, &spec(dir.path()), &chain, &handle, &mut sink).await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.output, "served by beta");
    assert_eq!(*switches.lock().unwrap(), vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_fallback_forces_continuation_after_first_attempt() {
    let dir = TempDir::new().unwrap();
    // Second provider only succeeds when the continuation flag is present,
    // even though the caller asked for a fresh session.
    let config = fake_agent(
        &dir,
        r#"case "$*" in
  *"--provider alpha"*)
    exit 1
    ;;
  *"--continue"*)
    printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"context kept"}]}}'
    ;;
  *)
    echo 'lost context' >&2
    exit 1
    ;;
esac"#,
    );
    let handle = Arc::new(RunHandle::new());
    let chain = vec![
        ProviderEndpoint::new("alpha", "m1"),
        ProviderEndpoint::new("beta", "m2"),
    ];
    let mut sink = |_: RunEvent| {};

    let result = run_with_fallback(&config, &spec(dir.path()), &chain, &handle, &mut sink).await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.output, "context kept");
}

#[tokio::test]
async fn test_fallback_exhaustion_returns_last_error() {
    let dir = TempDir::new().unwrap();
    let config = fake_agent(
        &dir,
        r#"echo "refused by $*" >&2
exit 1"#,
    );
    let handle = Arc::new(RunHandle::new());
    let chain = vec![
        ProviderEndpoint::new("alpha", "m1"),
        ProviderEndpoint::new("beta", "m2"),
    ];
    let mut sink = |_: RunEvent| {};

    let result = run_with_fallback(&config, &spec(dir.path()), &chain, &handle, &mut sink).await;

    assert!(!result.ok);
    assert!(!result.stopped);
    let error = result.error.unwrap();
    assert!(error.contains("beta"), "expected the last error, got: {}", error);
}

#[tokio::test]
async fn test_stop_before_attempt_short_circuits_chain() {
    let dir = TempDir::new().unwrap();
    // The script records that it ran; a pre-stopped handle must prevent that.
    let marker = dir.path().join("ran");
    let config = fake_agent(&dir, &format!("touch {}", marker.display()));
    let handle = Arc::new(RunHandle::new());
    handle.stop(StopMode::User);
    let chain = vec![ProviderEndpoint::new("alpha", "m1")];
    let mut sink = |_: RunEvent| {};

    let result = run_with_fallback(&config, &spec(dir.path()), &chain, &handle, &mut sink).await;

    assert!(result.stopped);
    assert!(!marker.exists(), "agent must not be spawned after a stop");
}

#[tokio::test]
async fn test_signal_stop_aborts_remaining_providers() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("beta-ran");
    let config = fake_agent(
        &dir,
        &format!(
            r#"case "$*" in
  *"--provider alpha"*)
    sleep 30
    ;;
  *)
    touch {}
    ;;
esac"#,
            marker.display()
        ),
    );
    let handle = Arc::new(RunHandle::new());
    let run_handle = Arc::clone(&handle);
    let run_spec = spec(dir.path());
    let chain = vec![
        ProviderEndpoint::new("alpha", "m1"),
        ProviderEndpoint::new("beta", "m2"),
    ];

    let task = tokio::spawn(async move {
        let mut sink = |_: RunEvent| {};
        run_with_fallback(&config, &run_spec, &chain, &run_handle, &mut sink).await
    });

    for _ in 0..200 {
        if handle.has_child() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop(StopMode::User);

    let result = task.await.unwrap();
    assert!(result.stopped);
    assert!(!marker.exists(), "fallback must not try the next provider after a kill");
}
