use crate::assessment::{highlight_utterance, AssessmentResult, ComponentScores, Highlight};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished speech turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<Highlight>,
}

impl Utterance {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
            highlights: Vec::new(),
        }
    }

    /// User utterances get review highlights; assistant ones are stored as-is.
    pub fn annotated(role: Role, text: impl Into<String>) -> Self {
        let mut utterance = Self::new(role, text);
        if role == Role::User {
            utterance.highlights = highlight_utterance(&utterance.text);
        }
        utterance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    Stopping,
    Completed,
    #[serde(rename = "error")]
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub utterances: Vec<Utterance>,
    pub scores: ComponentScores,
    pub score_history: Vec<AssessmentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: None,
            ended_at: None,
            status: SessionStatus::Idle,
            utterances: Vec::new(),
            scores: ComponentScores::default(),
            score_history: Vec::new(),
            failure: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = SessionStatus::Active;
    }

    pub fn append(&mut self, utterance: Utterance) {
        self.utterances.push(utterance);
    }

    pub fn record_scores(&mut self, result: AssessmentResult) {
        self.scores = result.components;
        self.score_history.push(result);
    }

    pub fn user_utterances(&self) -> impl Iterator<Item = &Utterance> {
        self.utterances.iter().filter(|u| u.role == Role::User)
    }

    pub fn duration_secs(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        }
    }

    /// Enter `Stopping` from `Active`; other states are left alone.
    pub fn begin_stopping(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Stopping;
        }
    }

    /// Move to a terminal state. Later calls are ignored.
    pub fn finish(&mut self, status: SessionStatus, failure: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.failure = failure;
        self.ended_at = Some(Utc::now());
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
