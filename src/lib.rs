// ABOUTME: Root library module for the courier relay binary.
// ABOUTME: Telegram platform pieces stay local; orchestration comes from courier-core.

pub mod config;
pub mod logging;
pub mod paths;
pub mod telegram;

// Re-export platform-agnostic modules for convenient access
pub use courier_core::metrics;
pub use courier_core::relay;
pub use courier_core::traits;

pub use telegram::{TelegramApi, UpdatePoller};
