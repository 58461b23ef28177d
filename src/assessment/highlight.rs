//! Annotations attached to user utterances for post-session review.

use super::metrics::{grammar_issues, is_advanced_word, is_filler, tokenize};
use serde::{Deserialize, Serialize};

const FILLER_SUGGESTION: &str = "Try to reduce filler words for smoother speech.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    Grammar,
    Filler,
    AdvancedVocab,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(rename = "type")]
    pub kind: HighlightKind,
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Highlight {
    fn new(kind: HighlightKind, word: impl Into<String>) -> Self {
        Self {
            kind,
            word: word.into(),
            category: None,
            suggestion: None,
        }
    }
}

/// Filler words, grammar slips and advanced vocabulary found in `text`.
pub fn highlight_utterance(text: &str) -> Vec<Highlight> {
    let words = tokenize(text);
    let mut highlights: Vec<Highlight> = words
        .iter()
        .filter(|w| is_filler(w))
        .map(|w| Highlight {
            suggestion: Some(FILLER_SUGGESTION.to_string()),
            ..Highlight::new(HighlightKind::Filler, w.as_str())
        })
        .collect();

    highlights.extend(grammar_issues(text).into_iter().map(|issue| Highlight {
        category: Some(issue.category.to_string()),
        ..Highlight::new(HighlightKind::Grammar, issue.text)
    }));

    highlights.extend(
        words
            .iter()
            .filter(|w| is_advanced_word(w))
            .map(|w| Highlight::new(HighlightKind::AdvancedVocab, w.as_str())),
    );
    highlights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_kinds() {
        let highlights = highlight_utterance("Um, she don't like the extraordinary weather.");
        let kinds: Vec<_> = highlights.iter().map(|h| h.kind).collect();
        assert!(kinds.contains(&HighlightKind::Filler));
        assert!(kinds.contains(&HighlightKind::Grammar));
        assert!(kinds.contains(&HighlightKind::AdvancedVocab));

        let grammar = highlights
            .iter()
            .find(|h| h.kind == HighlightKind::Grammar)
            .unwrap();
        assert_eq!(grammar.word, "she don't");
        assert_eq!(grammar.category.as_deref(), Some("subject-verb agreement"));
    }

    #[test]
    fn test_clean_sentence_has_no_highlights() {
        assert!(highlight_utterance("I went to the park.").is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(Highlight::new(HighlightKind::AdvancedVocab, "nevertheless")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "advanced_vocab", "word": "nevertheless"}));
    }
}
