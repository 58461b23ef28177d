pub mod storage;
pub mod types;
pub mod ui;

pub use storage::{FileSessionStore, ScoreHistoryEntry, SessionStore};
pub use types::{Role, Session, SessionStatus, Utterance};
pub use ui::{ActionType, ScorePayload, UiMessage};
