// ABOUTME: Agent subprocess abstraction for courier.
// ABOUTME: JSONL event decoding, single-invocation runner, stop handle, provider fallback.

pub mod event;
pub mod fallback;
pub mod handle;
pub mod runner;

pub use event::{AgentEvent, AgentMessage, ContentBlock};
pub use fallback::{
    build_chain, default_chain, run_with_fallback, ProjectSettings, ProviderEndpoint, RunEvent,
};
pub use handle::{RunHandle, StopMode, FORCE_KILL_DELAY};
pub use runner::{run_once, strip_ansi, RunResult, RunSpec, RunnerConfig};
