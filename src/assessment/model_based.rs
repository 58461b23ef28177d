//! Slow, asynchronous transcript evaluation by a language model.

use super::chat::ChatClient;
use super::scores::{Axis, PartialScores};
use crate::messages::{Role, Utterance};
use crate::{Result, TutorError};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

const EVALUATION_PROMPT: &str = "\
You assess spoken English. The transcript below is a conversation between a learner (User) \
and an AI partner (AI). Rate only the learner, each dimension from 0 to 100:

- comprehension: do they understand and answer what was asked?
- coherence: are their answers organised and on topic?
- pronunciation_proxy: judge from transcription artefacts such as odd spellings or misheard \
words; a clean transcript suggests clear pronunciation
- vocabulary: range and fit of the words they choose
- grammar: accuracy and complexity of their sentences

Reply with a JSON object only:
{\"comprehension\": n, \"coherence\": n, \"pronunciation_proxy\": n, \"vocabulary\": n, \
\"grammar\": n, \"reasoning\": \"one sentence\"}";

const MODEL_AXES: [Axis; 5] = [
    Axis::Comprehension,
    Axis::Coherence,
    Axis::PronunciationProxy,
    Axis::Vocabulary,
    Axis::Grammar,
];

/// Estimator that scores a whole transcript, typically by calling a remote model.
#[async_trait]
pub trait ModelEstimator: Send + Sync {
    async fn evaluate(&self, transcript: &[Utterance]) -> Result<PartialScores>;
}

/// Render a transcript as `User:` / `AI:` lines.
pub fn format_transcript(transcript: &[Utterance]) -> String {
    transcript
        .iter()
        .filter(|u| !u.text.trim().is_empty())
        .map(|u| {
            let speaker = match u.role {
                Role::User => "User",
                Role::Assistant => "AI",
            };
            format!("{}: {}", speaker, u.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the axis values out of the model's JSON reply. Missing or non-numeric
/// fields stay absent.
pub fn parse_model_scores(value: &Value) -> Result<PartialScores> {
    let object = value
        .as_object()
        .ok_or_else(|| TutorError::ScorerError("evaluation is not a JSON object".into()))?;

    let mut scores = PartialScores::new();
    for axis in MODEL_AXES {
        let number = match object.get(axis.name()) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(number) = number.filter(|n| n.is_finite()) {
            scores.set(axis, number);
        }
    }
    if scores.is_empty() {
        return Err(TutorError::ScorerError("evaluation contained no scores".into()));
    }
    Ok(scores)
}

/// Scores transcripts through the chat completions endpoint.
pub struct ChatEvaluator {
    client: ChatClient,
}

impl ChatEvaluator {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelEstimator for ChatEvaluator {
    async fn evaluate(&self, transcript: &[Utterance]) -> Result<PartialScores> {
        let formatted = format_transcript(transcript);
        if formatted.is_empty() {
            return Ok(PartialScores::new());
        }
        let reply = self
            .client
            .complete_json(EVALUATION_PROMPT, &format!("Transcript:\n{}", formatted), 0.3)
            .await?;
        let scores = parse_model_scores(&reply)?;
        info!(model = self.client.model(), "model evaluation complete");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_model_scores() {
        let scores = parse_model_scores(&json!({
            "comprehension": 80,
            "coherence": "65",
            "pronunciation_proxy": 120,
            "grammar": null,
            "reasoning": "fine"
        }))
        .unwrap();

        assert_eq!(scores.get(Axis::Comprehension), Some(80.0));
        assert_eq!(scores.get(Axis::Coherence), Some(65.0));
        assert_eq!(scores.get(Axis::PronunciationProxy), Some(100.0));
        assert_eq!(scores.get(Axis::Grammar), None);
        assert_eq!(scores.get(Axis::Fluency), None);
    }

    #[test]
    fn test_parse_rejects_empty_evaluation() {
        assert!(parse_model_scores(&json!({"reasoning": "none"})).is_err());
        assert!(parse_model_scores(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_format_transcript() {
        let transcript = vec![
            Utterance::new(Role::Assistant, "Hello!"),
            Utterance::new(Role::User, "  "),
            Utterance::new(Role::User, "Hi, I am Ken."),
        ];
        assert_eq!(format_transcript(&transcript), "AI: Hello!\nUser: Hi, I am Ken.");
    }

    #[tokio::test]
    async fn test_chat_evaluator_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"temperature": 0.3, "response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"comprehension\": 70, \"coherence\": 60}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "k", "gpt-4o-mini", Duration::from_secs(5)).unwrap();
        let evaluator = ChatEvaluator::new(client);
        let scores = evaluator
            .evaluate(&[Utterance::new(Role::User, "I like travelling.")])
            .await
            .unwrap();
        assert_eq!(scores.get(Axis::Comprehension), Some(70.0));
        assert_eq!(scores.get(Axis::Coherence), Some(60.0));
    }
}
