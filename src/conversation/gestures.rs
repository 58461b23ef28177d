//! Character gestures and facial expressions, and the rule-based gesture trigger.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_GESTURE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Neutral,
    Happy,
    Thinking,
    Encouraging,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 5] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Thinking,
        Expression::Encouraging,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Thinking => "thinking",
            Expression::Encouraging => "encouraging",
            Expression::Surprised => "surprised",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Nod,
    Wave,
    ThumbsUp,
    Explain,
    Listen,
    Shrug,
    ThinkingPose,
    OpenPalms,
    HeadShake,
    LeanForward,
    Celebration,
    Point,
    IdleRest,
}

impl Gesture {
    pub const ALL: [Gesture; 13] = [
        Gesture::Nod,
        Gesture::Wave,
        Gesture::ThumbsUp,
        Gesture::Explain,
        Gesture::Listen,
        Gesture::Shrug,
        Gesture::ThinkingPose,
        Gesture::OpenPalms,
        Gesture::HeadShake,
        Gesture::LeanForward,
        Gesture::Celebration,
        Gesture::Point,
        Gesture::IdleRest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Nod => "nod",
            Gesture::Wave => "wave",
            Gesture::ThumbsUp => "thumbs_up",
            Gesture::Explain => "explain",
            Gesture::Listen => "listen",
            Gesture::Shrug => "shrug",
            Gesture::ThinkingPose => "thinking_pose",
            Gesture::OpenPalms => "open_palms",
            Gesture::HeadShake => "head_shake",
            Gesture::LeanForward => "lean_forward",
            Gesture::Celebration => "celebration",
            Gesture::Point => "point",
            Gesture::IdleRest => "idle_rest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == value)
    }
}

/// Picks gestures from conversation events, at most one per `min_interval`.
#[derive(Debug)]
pub struct GestureController {
    min_interval: Duration,
    last: Option<Instant>,
    // Alternates between equally fitting gestures
    rotation: usize,
}

impl GestureController {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
            rotation: 0,
        }
    }

    pub fn on_session_start(&mut self, now: Instant) -> Option<Gesture> {
        self.trigger(Gesture::Wave, now)
    }

    pub fn on_user_finished_speaking(&mut self, now: Instant) -> Option<Gesture> {
        self.trigger(Gesture::Nod, now)
    }

    /// React to a finished assistant transcript.
    pub fn on_assistant_text(&mut self, text: &str, now: Instant) -> Option<Gesture> {
        let gesture = self.analyze_context(text)?;
        self.trigger(gesture, now)
    }

    pub fn analyze_context(&mut self, text: &str) -> Option<Gesture> {
        let lower = text.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if contains_any(&["think", "well...", "let me"]) {
            Some(Gesture::ThinkingPose)
        } else if contains_any(&["great!", "excellent!", "good job"]) {
            Some(self.alternate(&[Gesture::ThumbsUp, Gesture::Celebration]))
        } else if contains_any(&["don't know", "not sure"]) {
            Some(Gesture::Shrug)
        } else if text.contains('?') {
            Some(Gesture::LeanForward)
        } else if text.split_whitespace().count() > 50 {
            Some(self.alternate(&[Gesture::Explain, Gesture::OpenPalms]))
        } else if lower
            .split(|c: char| !c.is_alphabetic())
            .any(|w| matches!(w, "hello" | "hi" | "goodbye"))
        {
            Some(Gesture::Wave)
        } else {
            None
        }
    }

    fn alternate(&mut self, options: &[Gesture]) -> Gesture {
        let gesture = options[self.rotation % options.len()];
        self.rotation = self.rotation.wrapping_add(1);
        gesture
    }

    fn trigger(&mut self, gesture: Gesture, now: Instant) -> Option<Gesture> {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last = Some(now);
        Some(gesture)
    }
}

impl Default for GestureController {
    fn default() -> Self {
        Self::new(DEFAULT_GESTURE_INTERVAL)
    }
}
