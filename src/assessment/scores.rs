//! Score axes, weights and the external score scales.

use crate::conversation::ProficiencyLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value used for any axis that has not been evaluated yet.
pub const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Vocabulary,
    Grammar,
    Fluency,
    Comprehension,
    Coherence,
    PronunciationProxy,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::Vocabulary,
        Axis::Grammar,
        Axis::Fluency,
        Axis::Comprehension,
        Axis::Coherence,
        Axis::PronunciationProxy,
    ];

    /// Contribution to the overall score. The weights sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Axis::Vocabulary => 0.20,
            Axis::Grammar => 0.25,
            Axis::Fluency => 0.20,
            Axis::Comprehension => 0.15,
            Axis::Coherence => 0.15,
            Axis::PronunciationProxy => 0.05,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Axis::Vocabulary => "vocabulary",
            Axis::Grammar => "grammar",
            Axis::Fluency => "fluency",
            Axis::Comprehension => "comprehension",
            Axis::Coherence => "coherence",
            Axis::PronunciationProxy => "pronunciation_proxy",
        }
    }

    fn index(&self) -> usize {
        match self {
            Axis::Vocabulary => 0,
            Axis::Grammar => 1,
            Axis::Fluency => 2,
            Axis::Comprehension => 3,
            Axis::Coherence => 4,
            Axis::PronunciationProxy => 5,
        }
    }
}

/// All six axes, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub vocabulary: f64,
    pub grammar: f64,
    pub fluency: f64,
    pub comprehension: f64,
    pub coherence: f64,
    pub pronunciation_proxy: f64,
}

impl Default for ComponentScores {
    fn default() -> Self {
        Self {
            vocabulary: NEUTRAL_SCORE,
            grammar: NEUTRAL_SCORE,
            fluency: NEUTRAL_SCORE,
            comprehension: NEUTRAL_SCORE,
            coherence: NEUTRAL_SCORE,
            pronunciation_proxy: NEUTRAL_SCORE,
        }
    }
}

impl ComponentScores {
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Vocabulary => self.vocabulary,
            Axis::Grammar => self.grammar,
            Axis::Fluency => self.fluency,
            Axis::Comprehension => self.comprehension,
            Axis::Coherence => self.coherence,
            Axis::PronunciationProxy => self.pronunciation_proxy,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        let value = value.clamp(0.0, 100.0);
        match axis {
            Axis::Vocabulary => self.vocabulary = value,
            Axis::Grammar => self.grammar = value,
            Axis::Fluency => self.fluency = value,
            Axis::Comprehension => self.comprehension = value,
            Axis::Coherence => self.coherence = value,
            Axis::PronunciationProxy => self.pronunciation_proxy = value,
        }
    }

    /// Fixed weighted sum across all axes.
    pub fn overall(&self) -> f64 {
        Axis::ALL.iter().map(|a| self.get(*a) * a.weight()).sum()
    }
}

/// Estimator output; axes the estimator does not score are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PartialScores {
    values: [Option<f64>; 6],
}

impl PartialScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        self.values[axis.index()] = Some(value.clamp(0.0, 100.0));
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.values[axis.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    RuleBased,
    Model,
    Hybrid,
}

/// A single assessment snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub timestamp: DateTime<Utc>,
    pub components: ComponentScores,
    pub overall: f64,
    pub source: ScoreSource,
}

impl AssessmentResult {
    pub fn new(components: ComponentScores, source: ScoreSource) -> Self {
        Self {
            timestamp: Utc::now(),
            overall: round1(components.overall()),
            components,
            source,
        }
    }
}

impl Default for AssessmentResult {
    fn default() -> Self {
        Self::new(ComponentScores::default(), ScoreSource::Hybrid)
    }
}

const TOEIC_SEGMENTS: [(f64, f64); 8] = [
    (0.0, 10.0),
    (20.0, 150.0),
    (40.0, 350.0),
    (55.0, 500.0),
    (70.0, 650.0),
    (85.0, 800.0),
    (95.0, 900.0),
    (100.0, 990.0),
];

const IELTS_SEGMENTS: [(f64, f64); 8] = [
    (0.0, 1.0),
    (20.0, 2.5),
    (40.0, 4.0),
    (55.0, 5.5),
    (70.0, 6.5),
    (85.0, 7.5),
    (95.0, 8.5),
    (100.0, 9.0),
];

fn piecewise(score: f64, segments: &[(f64, f64)]) -> f64 {
    let score = score.clamp(0.0, 100.0);
    for pair in segments.windows(2) {
        let (s0, v0) = pair[0];
        let (s1, v1) = pair[1];
        if score <= s1 {
            return v0 + (score - s0) / (s1 - s0) * (v1 - v0);
        }
    }
    segments.last().map(|&(_, v)| v).unwrap_or_default()
}

/// Approximate TOEIC score (10 to 990).
pub fn score_to_toeic(score: f64) -> u32 {
    piecewise(score, &TOEIC_SEGMENTS).round() as u32
}

/// Approximate IELTS band (1.0 to 9.0), one decimal.
pub fn score_to_ielts(score: f64) -> f64 {
    round1(piecewise(score, &IELTS_SEGMENTS))
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Level and external-scale estimates for one overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMapping {
    pub score: f64,
    pub level: ProficiencyLevel,
    pub toeic: u32,
    pub ielts: f64,
}

impl ScoreMapping {
    pub fn for_score(score: f64) -> Self {
        Self {
            score: round1(score),
            level: ProficiencyLevel::from_score(score),
            toeic: score_to_toeic(score),
            ielts: score_to_ielts(score),
        }
    }
}
