//! Cheap synchronous estimator for vocabulary, grammar and fluency.

use super::metrics::{fluency_metrics, grammar_metrics, vocabulary_richness, word_frequency_score};
use super::scores::{round1, Axis, PartialScores};
use tracing::debug;

pub fn calibrate_vocabulary(ttr: f64, unique_words: usize, avg_word_length: f64, frequency: f64) -> f64 {
    // TTR falls naturally as text grows, hence the boost
    let ttr_score = (ttr * 150.0).min(100.0);
    let unique_score = (unique_words as f64 * 1.5).min(100.0);
    let length_score = ((avg_word_length - 3.0) * 30.0).clamp(0.0, 100.0);
    ttr_score * 0.3 + unique_score * 0.2 + length_score * 0.1 + frequency * 0.4
}

pub fn calibrate_grammar(error_ratio: f64, readability: f64) -> f64 {
    let error_score = (100.0 - error_ratio * 500.0).max(0.0);
    let complexity_score = (readability * 8.0).min(100.0);
    error_score * 0.6 + complexity_score * 0.4
}

pub fn calibrate_fluency(filler_ratio: f64, words_per_minute: f64, avg_sentence_length: f64) -> f64 {
    let filler_score = (100.0 - filler_ratio * 400.0).max(0.0);

    let wpm_score = if words_per_minute == 0.0 {
        // No timing available
        50.0
    } else if words_per_minute < 60.0 {
        words_per_minute
    } else if words_per_minute <= 160.0 {
        60.0 + (words_per_minute - 60.0) * 0.4
    } else {
        (100.0 - (words_per_minute - 160.0) * 0.3).max(50.0)
    };

    let sentence_score = if avg_sentence_length < 3.0 {
        avg_sentence_length * 15.0
    } else if avg_sentence_length <= 15.0 {
        45.0 + (avg_sentence_length - 3.0) * 4.5
    } else {
        (100.0 - (avg_sentence_length - 15.0) * 3.0).max(50.0)
    };

    filler_score * 0.4 + wpm_score * 0.3 + sentence_score * 0.3
}

/// Scores the learner's joined text on the three text-derived axes.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedEstimator;

impl RuleBasedEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Returns empty scores for empty text, so every axis stays neutral.
    pub fn evaluate(&self, text: &str, duration_secs: Option<f64>) -> PartialScores {
        if text.trim().is_empty() {
            return PartialScores::new();
        }

        let vocab = vocabulary_richness(text);
        let vocabulary = calibrate_vocabulary(
            vocab.ttr,
            vocab.unique_words,
            vocab.avg_word_length,
            word_frequency_score(text),
        );

        let grammar_m = grammar_metrics(text);
        let grammar = calibrate_grammar(grammar_m.error_ratio, grammar_m.readability);

        let fluency_m = fluency_metrics(text, duration_secs);
        let fluency = calibrate_fluency(
            fluency_m.filler_ratio,
            fluency_m.words_per_minute,
            fluency_m.avg_sentence_length,
        );

        debug!(vocabulary, grammar, fluency, "rule-based evaluation");
        PartialScores::new()
            .with(Axis::Vocabulary, round1(vocabulary))
            .with(Axis::Grammar, round1(grammar))
            .with(Axis::Fluency, round1(fluency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibrate_fluency_curves() {
        // no fillers, no timing, long sentences
        assert!((calibrate_fluency(0.0, 0.0, 15.0) - (40.0 + 15.0 + 29.7)).abs() < 1e-9);
        // too fast, clamps at 50
        assert!((calibrate_fluency(0.0, 400.0, 15.0) - (40.0 + 15.0 + 29.7)).abs() < 1e-9);
        // fragments
        assert!((calibrate_fluency(0.0, 30.0, 2.0) - (40.0 + 9.0 + 9.0)).abs() < 1e-9);
        // filler penalty bottoms out
        assert!((calibrate_fluency(0.5, 0.0, 15.0) - (15.0 + 29.7)).abs() < 1e-9);
    }

    #[test]
    fn test_calibrate_grammar() {
        assert!((calibrate_grammar(0.0, 20.0) - 100.0).abs() < 1e-9);
        assert_eq!(calibrate_grammar(0.2, 0.0), 0.0);
        assert!((calibrate_grammar(0.1, 5.0) - (30.0 + 16.0)).abs() < 1e-9);
    }

    #[test]
    fn test_calibrate_vocabulary_bounds() {
        assert!((calibrate_vocabulary(1.0, 1000, 10.0, 100.0) - 100.0).abs() < 1e-9);
        assert_eq!(calibrate_vocabulary(0.0, 0, 2.0, 0.0), 0.0);
    }

    #[test]
    fn test_empty_text_scores_nothing() {
        assert!(RuleBasedEstimator::new().evaluate("   ", Some(10.0)).is_empty());
    }

    #[test]
    fn test_evaluate_fills_text_axes_only() {
        let scores = RuleBasedEstimator::new().evaluate(
            "I usually walk to work because it is healthy. Yesterday it was raining, so I took the bus.",
            Some(20.0),
        );
        for axis in [Axis::Vocabulary, Axis::Grammar, Axis::Fluency] {
            let value = scores.get(axis).unwrap();
            assert!((0.0..=100.0).contains(&value), "{:?} = {}", axis, value);
        }
        assert_eq!(scores.get(Axis::Comprehension), None);
        assert_eq!(scores.get(Axis::Coherence), None);
    }
}
