pub mod chat;
pub mod feedback;
pub mod highlight;
pub mod metrics;
pub mod model_based;
pub mod rule_based;
pub mod scorer;
pub mod scores;

pub use chat::ChatClient;
pub use feedback::{feedback_or_fallback, ChatFeedback, Correction, Feedback, FeedbackProvider};
pub use highlight::{highlight_utterance, Highlight, HighlightKind};
pub use model_based::{ChatEvaluator, ModelEstimator};
pub use rule_based::RuleBasedEstimator;
pub use scorer::{HybridScorer, ScoreUpdate, ScorerSettings};
pub use scores::{
    score_to_ielts, score_to_toeic, AssessmentResult, Axis, ComponentScores, PartialScores,
    ScoreMapping, ScoreSource, NEUTRAL_SCORE,
};
