//! End-of-session written feedback.

use super::chat::ChatClient;
use super::model_based::format_transcript;
use super::scores::{score_to_ielts, score_to_toeic, AssessmentResult};
use crate::messages::Utterance;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Feedback {
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub advice: Vec<String>,
    #[serde(alias = "example_corrections")]
    pub corrections: Vec<Correction>,
}

impl Feedback {
    /// Used when no feedback could be generated.
    pub fn fallback() -> Self {
        Self {
            summary: "Detailed feedback is not available for this session.".into(),
            advice: vec!["Keep practising regular English conversation.".into()],
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    async fn generate(&self, transcript: &[Utterance], result: &AssessmentResult) -> Result<Feedback>;
}

/// Produce feedback, falling back to the generic text on any failure.
pub async fn feedback_or_fallback(
    provider: &dyn FeedbackProvider,
    transcript: &[Utterance],
    result: &AssessmentResult,
) -> Feedback {
    match provider.generate(transcript, result).await {
        Ok(feedback) => feedback,
        Err(e) => {
            warn!(error = %e, "feedback generation failed");
            Feedback::fallback()
        }
    }
}

fn feedback_prompt(result: &AssessmentResult) -> String {
    let c = &result.components;
    format!(
        "You are an English tutor writing feedback after a speaking practice session.\n\
         Scores (0-100): vocabulary {:.1}, grammar {:.1}, fluency {:.1}, comprehension {:.1}, \
         coherence {:.1}, overall {:.1}. Estimated TOEIC {}, estimated IELTS {:.1}.\n\
         Read the transcript and reply with a JSON object:\n\
         {{\"summary\": \"two or three sentences\", \"strengths\": [\"...\"], \
         \"weaknesses\": [\"...\"], \"advice\": [\"concrete step\"], \
         \"example_corrections\": [{{\"original\": \"...\", \"corrected\": \"...\", \"explanation\": \"...\"}}]}}\n\
         Be encouraging and honest, and pick the improvements that matter most.",
        c.vocabulary,
        c.grammar,
        c.fluency,
        c.comprehension,
        c.coherence,
        result.overall,
        score_to_toeic(result.overall),
        score_to_ielts(result.overall),
    )
}

pub struct ChatFeedback {
    client: ChatClient,
}

impl ChatFeedback {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedbackProvider for ChatFeedback {
    async fn generate(&self, transcript: &[Utterance], result: &AssessmentResult) -> Result<Feedback> {
        let reply = self
            .client
            .complete_json(
                &feedback_prompt(result),
                &format!("Transcript:\n{}", format_transcript(transcript)),
                0.5,
            )
            .await?;
        let feedback: Feedback = serde_json::from_value(reply)?;
        info!(
            strengths = feedback.strengths.len(),
            corrections = feedback.corrections.len(),
            "feedback generated"
        );
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;
    use crate::TutorError;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Broken;

    #[async_trait]
    impl FeedbackProvider for Broken {
        async fn generate(&self, _: &[Utterance], _: &AssessmentResult) -> Result<Feedback> {
            Err(TutorError::ScorerError("down".into()))
        }
    }

    #[test]
    fn test_parse_with_example_corrections() {
        let feedback: Feedback = serde_json::from_value(json!({
            "summary": "Good effort.",
            "strengths": ["clear answers"],
            "example_corrections": [{"original": "He go", "corrected": "He goes"}]
        }))
        .unwrap();
        assert_eq!(feedback.corrections.len(), 1);
        assert_eq!(feedback.corrections[0].corrected, "He goes");
        assert!(feedback.weaknesses.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_on_error() {
        let feedback = feedback_or_fallback(&Broken, &[], &AssessmentResult::default()).await;
        assert_eq!(feedback, Feedback::fallback());
    }

    #[tokio::test]
    async fn test_chat_feedback() {
        let server = MockServer::start().await;
        let content = json!({
            "summary": "Nice talk.",
            "strengths": ["vocabulary"],
            "weaknesses": ["articles"],
            "advice": ["read aloud"],
            "example_corrections": []
        })
        .to_string();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": content}}]
            })))
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "k", "m", Duration::from_secs(5)).unwrap();
        let feedback = ChatFeedback::new(client)
            .generate(&[Utterance::new(Role::User, "I goed home.")], &AssessmentResult::default())
            .await
            .unwrap();
        assert_eq!(feedback.summary, "Nice talk.");
        assert_eq!(feedback.weaknesses, vec!["articles".to_string()]);
    }
}
