pub mod cli;
pub mod config;
pub mod data;
pub mod experts;
pub mod i18n;
pub mod llm;
pub mod orchestrator;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::{FinalResult, Orchestrator, StreamEvent};
pub use session::{SessionState, SessionStore};
