use super::types::Session;
use crate::assessment::{score_to_ielts, score_to_toeic, ComponentScores, Feedback};
use crate::audio::{write_wav, ArchivedAudio};
use crate::conversation::ProficiencyLevel;
use crate::{Result, TutorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Receives the finished session once it has stopped.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session, audio: &ArchivedAudio, feedback: Option<&Feedback>) -> Result<()>;
}

/// One line of the cross-session score history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub session_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub utterances: usize,
    pub overall: f64,
    pub level: ProficiencyLevel,
    pub toeic_estimate: u32,
    pub ielts_estimate: f64,
    pub components: ComponentScores,
}

impl ScoreHistoryEntry {
    pub fn for_session(session: &Session) -> Self {
        let overall = session
            .score_history
            .last()
            .map(|r| r.overall)
            .unwrap_or_else(|| session.scores.overall());
        Self {
            session_id: session.id,
            started_at: session.started_at,
            duration_seconds: (session.duration_secs() * 10.0).round() / 10.0,
            utterances: session.utterances.len(),
            overall,
            level: ProficiencyLevel::from_score(overall),
            toeic_estimate: score_to_toeic(overall),
            ielts_estimate: score_to_ielts(overall),
            components: session.scores,
        }
    }
}

#[derive(Serialize)]
struct SessionDocument<'a> {
    #[serde(flatten)]
    session: &'a Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<&'a Feedback>,
}

/// Writes sessions as JSON and recordings as WAV files under one data directory:
/// `sessions/<id>.json`, `recordings/<id>_{input,output,mixed}.wav`, `score_history.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_path(&self, id: Uuid) -> PathBuf {
        self.root.join("sessions").join(format!("{}.json", id))
    }

    pub fn recording_path(&self, id: Uuid, track: &str) -> PathBuf {
        self.root.join("recordings").join(format!("{}_{}.wav", id, track))
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join("score_history.json")
    }

    pub fn load_history(&self) -> Result<Vec<ScoreHistoryEntry>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| TutorError::PersistenceError(format!("Corrupt score history {:?}: {}", path, e)))
    }

    pub fn load_session(&self, id: Uuid) -> Result<Session> {
        let content = fs::read_to_string(self.session_path(id))?;
        serde_json::from_str(&content)
            .map_err(|e| TutorError::PersistenceError(format!("Corrupt session {}: {}", id, e)))
    }

    fn write_all(&self, session: &Session, audio: &ArchivedAudio, feedback: Option<&Feedback>) -> Result<()> {
        fs::create_dir_all(self.root.join("sessions"))?;
        let document = SessionDocument { session, feedback };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| TutorError::PersistenceError(format!("Failed to encode session: {}", e)))?;
        fs::write(self.session_path(session.id), json)?;

        if !audio.is_empty() {
            fs::create_dir_all(self.root.join("recordings"))?;
            for (track, samples) in [
                ("input", &audio.input),
                ("output", &audio.output),
                ("mixed", &audio.mixed),
            ] {
                if !samples.is_empty() {
                    write_wav(self.recording_path(session.id, track), samples, audio.sample_rate)?;
                }
            }
        }

        let mut history = self.load_history()?;
        history.push(ScoreHistoryEntry::for_session(session));
        let json = serde_json::to_string_pretty(&history)
            .map_err(|e| TutorError::PersistenceError(format!("Failed to encode history: {}", e)))?;
        fs::write(self.history_path(), json)?;
        debug!(entries = history.len(), "score history updated");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &Session, audio: &ArchivedAudio, feedback: Option<&Feedback>) -> Result<()> {
        let store = self.clone();
        let session = session.clone();
        let audio = audio.clone();
        let feedback = feedback.cloned();
        let id = session.id;
        tokio::task::spawn_blocking(move || store.write_all(&session, &audio, feedback.as_ref()))
            .await
            .map_err(|e| TutorError::PersistenceError(format!("Persistence task failed: {}", e)))??;
        info!(session_id = %id, root = ?self.root, "session saved");
        Ok(())
    }
}
