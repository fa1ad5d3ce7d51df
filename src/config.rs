// ABOUTME: Environment-driven configuration with validation and sensible defaults.
// ABOUTME: The bot token is redacted from Debug output.

use crate::paths;
use anyhow::{bail, Context, Result};
use courier_agent::{default_chain, ProviderEndpoint};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_AGENT_BINARY: &str = "pi";
const DEFAULT_IDLE_NEW_SESSION_SECS: u64 = 2 * 60 * 60;

#[derive(Clone)]
pub struct Config {
    /// Telegram bot API token.
    pub bot_token: String,
    /// Telegram user ids allowed to talk to the relay.
    pub allowed_users: HashSet<i64>,
    /// Chat notified when the relay comes online, if any.
    pub default_chat_id: Option<String>,
    /// Agent executable name or path.
    pub agent_binary: String,
    /// Directory the agent runs in; also holds its project settings.
    pub project_dir: PathBuf,
    /// Root for sessions, runtime state, and logs.
    pub data_dir: PathBuf,
    /// Idle gap after which a non-quote message starts a fresh session.
    /// `None` disables the idle reset.
    pub idle_new_session: Option<Duration>,
    /// Provider fallback chain.
    pub provider_chain: Vec<ProviderEndpoint>,
    /// Command line run by `/restart`, if configured.
    pub restart_command: Option<Vec<String>>,
}

// Custom Debug impl to redact the bot token
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_users", &self.allowed_users)
            .field("default_chat_id", &self.default_chat_id)
            .field("agent_binary", &self.agent_binary)
            .field("project_dir", &self.project_dir)
            .field("data_dir", &self.data_dir)
            .field("idle_new_session", &self.idle_new_session)
            .field("provider_chain", &self.provider_chain)
            .field("restart_command", &self.restart_command)
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment. Call after `dotenvy`.
    pub fn load() -> Result<Self> {
        let bot_token = env_trimmed("TELEGRAM_BOT_TOKEN");
        if bot_token.is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is not set");
        }

        let allowed_users = parse_user_ids(&env_trimmed("COURIER_USER_IDS"));
        if allowed_users.is_empty() {
            bail!("COURIER_USER_IDS is empty; set the allowed Telegram user ids");
        }

        let default_chat_id = Some(env_trimmed("TELEGRAM_DEFAULT_CHAT_ID"))
            .filter(|s| !s.is_empty());

        let data_dir = Some(env_trimmed("COURIER_DATA_DIR"))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(paths::data_dir);

        let project_dir = Some(env_trimmed("COURIER_PROJECT_DIR"))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_project_dir);

        let agent_binary = Some(env_trimmed("COURIER_AGENT_BIN"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_BINARY.to_string());

        let provider_chain = parse_provider_chain(&env_trimmed("COURIER_PROVIDER_CHAIN"));
        let idle_new_session =
            parse_idle_secs(&env_trimmed("COURIER_IDLE_NEW_SESSION_SECS"));

        let restart_command = Some(env_trimmed("COURIER_RESTART_CMD"))
            .filter(|s| !s.is_empty())
            .map(|s| s.split_whitespace().map(String::from).collect());

        Ok(Self {
            bot_token,
            allowed_users,
            default_chat_id,
            agent_binary,
            project_dir,
            data_dir,
            idle_new_session,
            provider_chain,
            restart_command,
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        paths::sessions_dir(&self.data_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        paths::log_dir(&self.data_dir)
    }

    pub fn offset_file(&self) -> PathBuf {
        paths::offset_file(&self.data_dir)
    }

    /// Ensure the directories the relay writes to exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.sessions_dir(),
            paths::runtime_dir(&self.data_dir),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        Ok(())
    }
}

fn env_trimmed(name: &str) -> String {
    std::env::var(name).unwrap_or_default().trim().to_string()
}

/// Parse a comma/whitespace separated id list; non-numeric entries are
/// ignored.
fn parse_user_ids(raw: &str) -> HashSet<i64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<i64>().ok())
        .collect()
}

/// Parse `provider/model,provider/model`; malformed entries are skipped.
/// An empty or fully malformed value yields the built-in chain.
fn parse_provider_chain(raw: &str) -> Vec<ProviderEndpoint> {
    let chain: Vec<ProviderEndpoint> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (provider, model) = part.split_once('/')?;
            let (provider, model) = (provider.trim(), model.trim());
            if provider.is_empty() || model.is_empty() {
                tracing::warn!(entry = part, "skipping malformed provider chain entry");
                return None;
            }
            Some(ProviderEndpoint::new(provider, model))
        })
        .collect();
    if chain.is_empty() {
        default_chain()
    } else {
        chain
    }
}

/// Parse the idle threshold. Unset or garbage means the default; an explicit
/// `0` disables the idle reset.
fn parse_idle_secs(raw: &str) -> Option<Duration> {
    let secs = match raw.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => DEFAULT_IDLE_NEW_SESSION_SECS,
    };
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_ids_mixed_separators() {
        let ids = parse_user_ids("123, 456\n789  42");
        assert_eq!(ids, HashSet::from([123, 456, 789, 42]));
    }

    #[test]
    fn test_parse_user_ids_ignores_garbage() {
        let ids = parse_user_ids("123,abc, ,456");
        assert_eq!(ids, HashSet::from([123, 456]));
    }

    #[test]
    fn test_parse_user_ids_empty() {
        assert!(parse_user_ids("").is_empty());
    }

    #[test]
    fn test_parse_provider_chain() {
        let chain = parse_provider_chain("anthropic/claude-opus-4, openrouter/auto");
        assert_eq!(
            chain,
            vec![
                ProviderEndpoint::new("anthropic", "claude-opus-4"),
                ProviderEndpoint::new("openrouter", "auto"),
            ]
        );
    }

    #[test]
    fn test_parse_provider_chain_skips_malformed_entries() {
        let chain = parse_provider_chain("anthropic/claude-opus-4,nonsense,/,x/");
        assert_eq!(chain, vec![ProviderEndpoint::new("anthropic", "claude-opus-4")]);
    }

    #[test]
    fn test_parse_provider_chain_empty_uses_defaults() {
        assert_eq!(parse_provider_chain(""), default_chain());
        assert_eq!(parse_provider_chain("garbage"), default_chain());
    }

    #[test]
    fn test_parse_idle_secs() {
        assert_eq!(parse_idle_secs("3600"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_idle_secs(""),
            Some(Duration::from_secs(DEFAULT_IDLE_NEW_SESSION_SECS))
        );
        assert_eq!(
            parse_idle_secs("not a number"),
            Some(Duration::from_secs(DEFAULT_IDLE_NEW_SESSION_SECS))
        );
        assert_eq!(parse_idle_secs("0"), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config {
            bot_token: "123456:very-secret".to_string(),
            allowed_users: HashSet::from([1]),
            default_chat_id: None,
            agent_binary: DEFAULT_AGENT_BINARY.to_string(),
            project_dir: PathBuf::from("/tmp/p"),
            data_dir: PathBuf::from("/tmp/d"),
            idle_new_session: None,
            provider_chain: default_chain(),
            restart_command: None,
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
