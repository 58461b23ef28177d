pub mod gestures;
pub mod level;
pub mod prompts;
pub mod strategy;

pub use gestures::{Expression, Gesture, GestureController};
pub use level::ProficiencyLevel;
pub use prompts::build_instructions;
pub use strategy::{ConversationStrategy, LevelChange};
