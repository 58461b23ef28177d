pub mod assessment;
pub mod audio;
pub mod conversation;
pub mod error;
pub mod integration;
pub mod messages;
pub mod realtime;
pub mod utils;

pub use error::{Result, TutorError};
pub use integration::{SessionBuilder, SessionConfig, SessionHandle, SessionReport};
pub use messages::{Role, Session, SessionStatus, UiMessage, Utterance};
