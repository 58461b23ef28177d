//! Linguistic metrics computed from the learner's transcribed speech.
//!
//! These are deliberately rough: regex tokenization, a fixed list of common
//! grammar slips, and a heuristic syllable counter for readability.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z']+").expect("invalid word regex"));

static SENTENCE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("invalid sentence regex"));

/// Filler words and phrases.
pub const FILLERS: &[&str] = &[
    "um", "uh", "er", "ah", "like", "you know", "i mean", "basically", "actually", "literally",
    "sort of", "kind of", "well",
];

static FILLER_PHRASE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    FILLERS
        .iter()
        .filter(|f| f.contains(' '))
        .map(|f| Regex::new(&format!(r"\b{}\b", regex::escape(f))).expect("invalid filler regex"))
        .collect()
});

/// Common learner slips, with a category name.
pub const GRAMMAR_PATTERNS: &[(&str, &str)] = &[
    (r"\b(?:he|she|it) don't\b", "subject-verb agreement"),
    (r"\bmore better\b", "double comparative"),
    (r"\bmost best\b", "double superlative"),
    (r"\bgoed\b", "irregular past tense"),
    (r"\bchilds\b", "irregular plural"),
    (r"\bpeoples\b", "irregular plural"),
    (r"\bdid went\b", "double past"),
    (r"\bdoes goes\b", "double present"),
];

static GRAMMAR_RES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    GRAMMAR_PATTERNS
        .iter()
        .map(|(pattern, name)| {
            let re = Regex::new(&format!("(?i){}", pattern)).expect("invalid grammar regex");
            (re, *name)
        })
        .collect()
});

const BASIC_WORDS: &[&str] = &[
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
    "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
    "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
    "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when", "make",
    "can", "like", "time", "no", "just", "him", "know", "take", "people", "into", "year", "your",
    "good", "some", "could", "them", "see", "other", "than", "then", "now", "look", "only",
    "come", "its", "over", "think", "also", "back", "after", "use", "two", "how", "our", "work",
    "first", "well", "way", "even", "new", "want", "because", "any", "these", "give", "day",
    "most", "us", "is", "are", "was", "were", "am", "been", "has", "had", "did", "does", "went",
    "said", "got", "very", "really", "yes", "too", "much", "many", "more", "lot", "thing",
    "things", "house", "car", "school", "water", "food", "money", "life", "child", "children",
    "world", "hand", "part", "place", "week", "company", "question", "number", "night", "city",
    "play", "small", "big", "large", "next", "young", "old", "important", "few", "bad", "same",
    "sure", "free", "real", "best", "better", "name", "need", "home", "today", "here", "help",
    "every", "family", "friend", "friends", "room", "story", "idea", "month", "right", "study",
    "book", "job", "word", "move", "live", "run", "bring", "happen", "write", "sit", "stand",
    "meet", "learn", "change", "understand", "watch", "stop", "speak", "read", "spend", "walk",
    "love", "buy", "wait", "stay", "feel", "talk", "keep", "let", "put", "mean", "call", "try",
    "ask", "leave", "start", "show", "hear", "find", "tell", "long", "down", "great",
    "different", "little", "last", "still", "always", "never", "sometimes", "often", "usually",
    "something", "nothing", "everything", "someone", "maybe", "again", "before", "where", "why",
    "morning", "evening", "weekend", "yesterday", "tomorrow", "eat", "drink", "sleep", "like",
    "hot", "cold", "happy", "sad", "easy", "difficult", "nice", "fun", "interesting", "music",
    "movie", "game", "dog", "cat", "coffee", "tea", "travel", "trip", "country", "town",
];

const INTERMEDIATE_WORDS: &[&str] = &[
    "achieve", "approach", "aspect", "assume", "available", "benefit", "concept", "context",
    "contribute", "culture", "define", "develop", "economy", "environment", "establish",
    "evaluate", "evidence", "factor", "financial", "focus", "function", "identify", "impact",
    "indicate", "individual", "involved", "major", "method", "occur", "period", "policy",
    "positive", "potential", "previous", "primary", "process", "professional", "project",
    "research", "resource", "response", "result", "role", "significant", "similar", "specific",
    "structure", "technology", "theory", "tradition", "unique", "various", "increase", "reduce",
    "require", "suggest", "affect", "support", "maintain", "obtain", "participate",
    "alternative", "efficient", "global", "perspective", "principle", "strategy", "challenge",
    "colleague", "communicate", "community", "compare", "conflict", "consequence", "critical",
    "debate", "decline", "determine", "diverse", "emerge", "enable", "enhance", "ensure",
    "examine", "feature", "flexible", "generate", "illustrate", "innovation", "investigate",
    "justify", "motivation", "network", "outcome", "priority", "pursue", "relationship",
    "relevant", "resolve", "source", "status", "target", "technique", "transition", "trend",
    "access", "accurate", "acknowledge", "annual", "apparent", "appropriate", "assess",
    "attitude", "background", "behavior", "capital", "characteristic", "collaborate",
    "conclusion", "confirm", "convince", "crucial", "data", "demand", "describe", "digital",
    "dynamic", "eliminate", "emphasize", "engage", "estimate", "eventually", "explore",
    "external", "feedback", "framework", "genuine", "guarantee", "highlight", "insight",
    "interact", "interpret", "introduce", "involve", "issue", "logic", "negative", "organize",
    "pattern", "physical", "position", "predict", "prefer", "promote", "propose", "recognize",
    "recommend", "rely", "review", "schedule", "select", "standard", "transform", "update",
];

static BASIC_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| BASIC_WORDS.iter().copied().collect());
static INTERMEDIATE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| INTERMEDIATE_WORDS.iter().copied().collect());

/// Lowercased word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VocabularyMetrics {
    pub ttr: f64,
    pub unique_words: usize,
    pub total_words: usize,
    pub avg_word_length: f64,
}

pub fn vocabulary_richness(text: &str) -> VocabularyMetrics {
    let words = tokenize(text);
    if words.is_empty() {
        return VocabularyMetrics::default();
    }
    let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
    let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
    VocabularyMetrics {
        ttr: (unique.len() as f64 / words.len() as f64).min(1.0),
        unique_words: unique.len(),
        total_words: words.len(),
        avg_word_length: total_len as f64 / words.len() as f64,
    }
}

/// Sophistication from a three-tier frequency list: basic 0.3, intermediate 0.6, other 1.0.
pub fn word_frequency_score(text: &str) -> f64 {
    let words = tokenize(text);
    if words.len() < 5 {
        return 50.0;
    }
    let alphabetic: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| w.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();
    if alphabetic.is_empty() {
        return 0.0;
    }
    let weighted: f64 = alphabetic
        .iter()
        .map(|w| {
            if BASIC_SET.contains(w) {
                0.3
            } else if INTERMEDIATE_SET.contains(w) {
                0.6
            } else {
                1.0
            }
        })
        .sum();
    (weighted / alphabetic.len() as f64 * 100.0).min(100.0)
}

pub fn is_advanced_word(word: &str) -> bool {
    word.chars().count() >= 8 && !BASIC_SET.contains(word) && !INTERMEDIATE_SET.contains(word)
}

pub fn is_filler(word: &str) -> bool {
    FILLERS.contains(&word)
}

pub fn count_fillers(text: &str) -> usize {
    let lower = text.to_lowercase();
    let single = tokenize(&lower).iter().filter(|w| is_filler(w)).count();
    let phrases: usize = FILLER_PHRASE_RES
        .iter()
        .map(|re| re.find_iter(&lower).count())
        .sum();
    single + phrases
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FluencyMetrics {
    pub filler_ratio: f64,
    pub words_per_minute: f64,
    pub avg_sentence_length: f64,
}

/// `duration_secs` is the speaking time the text was produced in, if known.
pub fn fluency_metrics(text: &str, duration_secs: Option<f64>) -> FluencyMetrics {
    let words = tokenize(text);
    if words.is_empty() {
        return FluencyMetrics::default();
    }
    let words_per_minute = match duration_secs {
        Some(secs) if secs > 0.0 => words.len() as f64 / secs * 60.0,
        _ => 0.0,
    };
    FluencyMetrics {
        filler_ratio: count_fillers(text) as f64 / words.len() as f64,
        words_per_minute,
        avg_sentence_length: words.len() as f64 / sentence_count(text).max(1) as f64,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarIssue {
    pub text: String,
    pub category: &'static str,
}

pub fn grammar_issues(text: &str) -> Vec<GrammarIssue> {
    GRAMMAR_RES
        .iter()
        .flat_map(|(re, category)| {
            re.find_iter(text).map(move |m| GrammarIssue {
                text: m.as_str().to_string(),
                category: *category,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GrammarMetrics {
    pub error_count: usize,
    pub error_ratio: f64,
    /// Flesch-Kincaid grade, clamped to [0, 20]
    pub readability: f64,
}

pub fn grammar_metrics(text: &str) -> GrammarMetrics {
    let words = tokenize(text);
    if words.is_empty() {
        return GrammarMetrics {
            readability: 50.0,
            ..Default::default()
        };
    }
    let error_count = grammar_issues(text).len();
    GrammarMetrics {
        error_count,
        error_ratio: error_count as f64 / words.len() as f64,
        readability: flesch_kincaid_grade(text).clamp(0.0, 20.0),
    }
}

fn sentence_count(text: &str) -> usize {
    SENTENCE_SPLIT_RE
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .count()
}

pub fn flesch_kincaid_grade(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let sentences = sentence_count(text).max(1) as f64;
    let syllables: usize = words.iter().map(|w| count_syllables(w)).sum();
    let n = words.len() as f64;
    0.39 * (n / sentences) + 11.8 * (syllables as f64 / n) - 15.59
}

/// Vowel-group heuristic with a silent trailing "e".
pub fn count_syllables(word: &str) -> usize {
    let word: Vec<char> = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if word.is_empty() {
        return 0;
    }
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0;
    let mut previous_vowel = false;
    for &c in &word {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }
    let len = word.len();
    if len > 2 && word[len - 1] == 'e' && word[len - 2] != 'l' && !is_vowel(word[len - 2]) {
        count -= 1;
    }
    count.max(1)
}
