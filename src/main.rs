// ABOUTME: Main entry point for the Telegram-agent relay.
// ABOUTME: Initializes logging, config, and the registry, then drives the poll loop.

use anyhow::Result;
use courier::config::Config;
use courier::logging;
use courier::telegram::{TelegramApi, UpdatePoller};
use courier_agent::FORCE_KILL_DELAY;
use courier_core::traits::{ChatApi, SendOptions};
use courier_core::{OffsetStore, Registry, Relay, RelayConfig, RunnerConfig, SessionDirectory};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they take the process down
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n== PANIC: relay crashed ==\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let config = Config::load()?;
    config.ensure_dirs()?;
    let _log_guards = logging::init(&config.log_dir())?;

    tracing::info!(
        allowed_users = config.allowed_users.len(),
        data_dir = %config.data_dir.display(),
        project_dir = %config.project_dir.display(),
        agent = %config.agent_binary,
        providers = config.provider_chain.len(),
        "configuration loaded"
    );

    let api = Arc::new(TelegramApi::new(&config.bot_token));
    let bot_username = api.verify().await?;
    tracing::info!(bot_username = %bot_username, "Telegram bot authenticated");

    let offset = Arc::new(OffsetStore::load(config.offset_file())?);
    let registry = Arc::new(Registry::new());

    let relay_config = RelayConfig {
        allowed_users: config.allowed_users.clone(),
        idle_new_session: config.idle_new_session,
        provider_chain: config.provider_chain.clone(),
        log_files: logging::log_files(&config.log_dir()),
        restart_command: config.restart_command.clone(),
        ..RelayConfig::default()
    };
    let relay = Arc::new(Relay::new(
        Arc::clone(&api),
        Arc::clone(&registry),
        SessionDirectory::new(config.sessions_dir()),
        Arc::clone(&offset),
        RunnerConfig {
            binary: config.agent_binary.clone(),
            project_dir: config.project_dir.clone(),
        },
        relay_config,
    ));

    notify_online(api.as_ref(), &config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    UpdatePoller::new(api.bot().clone(), Arc::clone(&offset), relay)
        .run(shutdown_rx)
        .await;

    shutdown_active_runs(&registry).await;
    tracing::info!("courier stopped");
    Ok(())
}

/// Best-effort "back online" note to the default chat.
async fn notify_online(api: &TelegramApi, config: &Config) {
    let Some(chat_id) = &config.default_chat_id else {
        return;
    };
    let sent = api
        .send_message(chat_id, "🟢 courier back online", SendOptions::default())
        .await;
    if let Err(e) = sent {
        tracing::error!(error = %e, "failed sending startup notification");
    }
}

/// Shutdown-mode stop: terminate every active run, give them one grace
/// period, then force-kill survivors and exit non-zero. This is the
/// last-resort path; with no active processes the caller exits normally.
async fn shutdown_active_runs(registry: &Registry) {
    let survivors = registry.stop_all_for_shutdown();
    if survivors.is_empty() {
        return;
    }
    tracing::warn!(count = survivors.len(), "waiting for active agent runs to exit");
    tokio::time::sleep(FORCE_KILL_DELAY).await;
    for handle in &survivors {
        handle.force_kill();
    }
    tracing::error!(count = survivors.len(), "shutdown forced with active runs");
    std::process::exit(1);
}
