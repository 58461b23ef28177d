//! Messages pushed to the presentation layer, serialized as `{"type": ...}` JSON.

use super::types::{Role, SessionStatus};
use crate::assessment::{ComponentScores, Feedback, ScoreUpdate};
use crate::conversation::{Expression, Gesture, LevelChange, ProficiencyLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Expression,
    Gesture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePayload {
    #[serde(flatten)]
    pub components: ComponentScores,
    pub overall: f64,
    pub level: String,
    pub cefr: String,
    pub toeic_estimate: u32,
    pub ielts_estimate: f64,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    SessionState {
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Transcript {
        role: Role,
        text: String,
    },
    ScoreUpdate(ScorePayload),
    CharacterAction {
        action_type: ActionType,
        value: String,
    },
    AudioLevel {
        level: f32,
    },
    AiSpeaking {
        speaking: bool,
    },
    Feedback(Feedback),
    LevelChange {
        from: ProficiencyLevel,
        to: ProficiencyLevel,
        cefr: String,
    },
}

impl UiMessage {
    pub fn state(status: SessionStatus) -> Self {
        UiMessage::SessionState { status, reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        UiMessage::SessionState {
            status: SessionStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn transcript(role: Role, text: impl Into<String>) -> Self {
        UiMessage::Transcript {
            role,
            text: text.into(),
        }
    }

    pub fn expression(expression: Expression) -> Self {
        UiMessage::CharacterAction {
            action_type: ActionType::Expression,
            value: expression.as_str().to_string(),
        }
    }

    pub fn gesture(gesture: Gesture) -> Self {
        UiMessage::CharacterAction {
            action_type: ActionType::Gesture,
            value: gesture.as_str().to_string(),
        }
    }

    pub fn audio_level(level: f32) -> Self {
        UiMessage::AudioLevel {
            level: level.clamp(0.0, 1.0),
        }
    }

    pub fn score(update: &ScoreUpdate) -> Self {
        UiMessage::ScoreUpdate(ScorePayload {
            components: update.result.components,
            overall: update.result.overall,
            level: update.mapping.level.label().to_string(),
            cefr: update.mapping.level.cefr().to_string(),
            toeic_estimate: update.mapping.toeic,
            ielts_estimate: update.mapping.ielts,
            stale: update.stale,
        })
    }

    pub fn level_change(change: &LevelChange) -> Self {
        UiMessage::LevelChange {
            from: change.from,
            to: change.to,
            cefr: change.to.cefr().to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UiMessage::SessionState { .. } => "session_state",
            UiMessage::Transcript { .. } => "transcript",
            UiMessage::ScoreUpdate(_) => "score_update",
            UiMessage::CharacterAction { .. } => "character_action",
            UiMessage::AudioLevel { .. } => "audio_level",
            UiMessage::AiSpeaking { .. } => "ai_speaking",
            UiMessage::Feedback(_) => "feedback",
            UiMessage::LevelChange { .. } => "level_change",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{AssessmentResult, ScoreMapping};
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(UiMessage::AiSpeaking { speaking: false }).unwrap(),
            json!({"type": "ai_speaking", "speaking": false})
        );
        assert_eq!(
            serde_json::to_value(UiMessage::gesture(Gesture::ThumbsUp)).unwrap(),
            json!({"type": "character_action", "action_type": "gesture", "value": "thumbs_up"})
        );
        assert_eq!(
            serde_json::to_value(UiMessage::failed("device lost")).unwrap(),
            json!({"type": "session_state", "status": "error", "reason": "device lost"})
        );
        assert_eq!(
            serde_json::to_value(UiMessage::state(SessionStatus::Active)).unwrap(),
            json!({"type": "session_state", "status": "active"})
        );
    }

    #[test]
    fn test_score_update_is_flat() {
        let result = AssessmentResult::default();
        let update = ScoreUpdate {
            mapping: ScoreMapping::for_score(result.overall),
            result,
            stale: true,
            model_version: None,
            refresh_attempts: 0,
            refresh_triggered: false,
        };
        let value = serde_json::to_value(UiMessage::score(&update)).unwrap();
        assert_eq!(value["type"], "score_update");
        assert_eq!(value["vocabulary"], 50.0);
        assert_eq!(value["pronunciation_proxy"], 50.0);
        assert_eq!(value["level"], "Intermediate");
        assert_eq!(value["cefr"], "B1");
        assert_eq!(value["stale"], true);
        assert!(value["toeic_estimate"].is_u64());
    }

    #[test]
    fn test_feedback_serializes_corrections() {
        let value = serde_json::to_value(UiMessage::Feedback(Feedback::fallback())).unwrap();
        assert_eq!(value["type"], "feedback");
        assert!(value["corrections"].as_array().unwrap().is_empty());
        assert_eq!(UiMessage::Feedback(Feedback::fallback()).kind(), "feedback");
    }
}
