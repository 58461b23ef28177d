use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bounds (exclusive) of the first four levels.
pub const LEVEL_BOUNDARIES: [f64; 4] = [20.0, 40.0, 60.0, 80.0];

/// Ordered proficiency band derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProficiencyLevel {
    Beginner,
    Elementary,
    Intermediate,
    UpperIntermediate,
    Advanced,
}

impl ProficiencyLevel {
    pub const ALL: [ProficiencyLevel; 5] = [
        ProficiencyLevel::Beginner,
        ProficiencyLevel::Elementary,
        ProficiencyLevel::Intermediate,
        ProficiencyLevel::UpperIntermediate,
        ProficiencyLevel::Advanced,
    ];

    pub fn from_score(score: f64) -> Self {
        let band = LEVEL_BOUNDARIES
            .iter()
            .take_while(|&&boundary| score >= boundary)
            .count();
        Self::ALL[band]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProficiencyLevel::Beginner => "Beginner",
            ProficiencyLevel::Elementary => "Elementary",
            ProficiencyLevel::Intermediate => "Intermediate",
            ProficiencyLevel::UpperIntermediate => "Upper Intermediate",
            ProficiencyLevel::Advanced => "Advanced",
        }
    }

    pub fn cefr(&self) -> &'static str {
        match self {
            ProficiencyLevel::Beginner => "A1",
            ProficiencyLevel::Elementary => "A2",
            ProficiencyLevel::Intermediate => "B1",
            ProficiencyLevel::UpperIntermediate => "B2",
            ProficiencyLevel::Advanced => "C1",
        }
    }
}

impl Default for ProficiencyLevel {
    fn default() -> Self {
        ProficiencyLevel::Intermediate
    }
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
