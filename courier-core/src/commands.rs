// ABOUTME: Slash-command recognition for the relay control surface.
// ABOUTME: Recognized commands short-circuit dispatch; unknown /commands fall through.

use std::path::Path;

/// Control commands answered by the relay itself, without the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Ping,
    Help,
    Status,
    NewSession,
    Stop,
    Logs,
    Restart,
}

impl RelayCommand {
    /// Match the first whitespace-delimited token, case-insensitively.
    /// Returns `None` for anything unrecognized so a leading `/` never
    /// swallows a would-be prompt.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        match token.to_ascii_lowercase().as_str() {
            "/ping" => Some(Self::Ping),
            "/help" => Some(Self::Help),
            "/status" => Some(Self::Status),
            "/new" => Some(Self::NewSession),
            "/stop" => Some(Self::Stop),
            "/logs" => Some(Self::Logs),
            "/restart" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Help => "help",
            Self::Status => "status",
            Self::NewSession => "new",
            Self::Stop => "stop",
            Self::Logs => "logs",
            Self::Restart => "restart",
        }
    }
}

pub fn help_text() -> String {
    [
        "🤖 *courier commands*",
        "",
        "/ping - check that the relay is alive",
        "/status - show run state and session info",
        "/new - start a fresh session with the next message",
        "/stop - stop the current run",
        "/logs - show recent log lines",
        "/restart - restart the relay service",
        "/help - show this help",
    ]
    .join("\n")
}

/// Last `limit` lines of a log file. Missing files read as empty; that is
/// normal before the first write.
pub fn tail_log(path: &Path, limit: usize) -> String {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed reading log file");
            }
            return String::new();
        }
    };
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(limit);
    courier_agent::strip_ansi(&lines[start..].join("\n"))
        .trim()
        .to_string()
}

// =============================================================================
// Tests
// =============================================================================
