use super::level::ProficiencyLevel;
use super::prompts::build_instructions;
use tracing::info;

/// Emitted once per boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChange {
    pub from: ProficiencyLevel,
    pub to: ProficiencyLevel,
    pub score: f64,
}

/// Maps the rolling overall score onto a proficiency level and remembers the last one emitted.
#[derive(Debug, Clone)]
pub struct ConversationStrategy {
    current: ProficiencyLevel,
    context: String,
}

impl ConversationStrategy {
    pub fn new(initial: ProficiencyLevel) -> Self {
        Self {
            current: initial,
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn current_level(&self) -> ProficiencyLevel {
        self.current
    }

    /// Returns a change event only when the score lands in a different level.
    pub fn update(&mut self, score: f64) -> Option<LevelChange> {
        let level = ProficiencyLevel::from_score(score);
        if level == self.current {
            return None;
        }
        let change = LevelChange {
            from: self.current,
            to: level,
            score,
        };
        info!(from = %change.from, to = %change.to, score, "proficiency level changed");
        self.current = level;
        Some(change)
    }

    /// Instructions for the current level.
    pub fn instructions(&self) -> String {
        build_instructions(self.current, &self.context)
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }
}

impl Default for ConversationStrategy {
    fn default() -> Self {
        Self::new(ProficiencyLevel::default())
    }
}
