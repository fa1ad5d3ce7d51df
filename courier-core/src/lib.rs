// ABOUTME: Platform-agnostic relay orchestration for chat-driven coding agents.
// ABOUTME: Provides the queue, registry, session, progress, and relay turn logic.

pub mod commands;
pub mod metrics;
pub mod offset;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod session;
pub mod traits;
pub mod util;

// Re-export the core surface for convenient access
pub use offset::OffsetStore;
pub use progress::ProgressReporter;
pub use queue::ChatQueue;
pub use registry::Registry;
pub use relay::{Relay, RelayConfig};
pub use session::{ContinuationPolicy, SessionDirectory, SessionFile};
pub use traits::{
    ChatApi, EditOutcome, InboundMessage, QuotedMessage, SendOptions, TextMode,
};

// Re-export agent types that appear in this crate's public API
pub use courier_agent::{ProviderEndpoint, RunHandle, RunResult, RunnerConfig, StopMode};
