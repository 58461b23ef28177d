pub mod config;
pub mod event_loop;
pub mod orchestrator;

pub use config::{AudioConfig, RealtimeConfig, ScoringConfig, SessionConfig, StorageConfig};
pub use event_loop::{EventRouter, Flow, LoopSignal, ResponseControl};
pub use orchestrator::{SessionBuilder, SessionCommand, SessionHandle, SessionReport};
