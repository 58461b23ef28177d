//! End-to-end session scenarios
//!
//! Sessions run against the loopback realtime service with detached audio
//! endpoints, so no network or sound hardware is needed.

use async_trait::async_trait;
use parlance::assessment::{AssessmentResult, Feedback, FeedbackProvider, ModelEstimator, PartialScores};
use parlance::audio::pcm::encode_base64_pcm16;
use parlance::audio::{AudioFrame, AudioSink, AudioSource, BoundedAudioChannel, Direction};
use parlance::messages::FileSessionStore;
use parlance::realtime::{loopback, LoopbackServer};
use parlance::utils::UiReceiver;
use parlance::{
    Result, Role, SessionBuilder, SessionConfig, SessionHandle, SessionStatus, TutorError, UiMessage, Utterance,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LIMIT: Duration = Duration::from_secs(10);

struct CountingModel {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelEstimator for CountingModel {
    async fn evaluate(&self, _transcript: &[Utterance]) -> Result<PartialScores> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PartialScores::new())
    }
}

struct CannedFeedback;

#[async_trait]
impl FeedbackProvider for CannedFeedback {
    async fn generate(&self, transcript: &[Utterance], _result: &AssessmentResult) -> Result<Feedback> {
        Ok(Feedback {
            summary: format!("{} turns reviewed", transcript.len()),
            strengths: vec!["Clear answers".into()],
            ..Default::default()
        })
    }
}

struct BrokenFeedback;

#[async_trait]
impl FeedbackProvider for BrokenFeedback {
    async fn generate(&self, _transcript: &[Utterance], _result: &AssessmentResult) -> Result<Feedback> {
        Err(TutorError::ScorerError("service unavailable".into()))
    }
}

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default().without_storage().without_feedback();
    config.scoring.tick_interval_ms = 20;
    config.ui_channel_capacity = 4096;
    config
}

struct Running {
    handle: SessionHandle,
    server: LoopbackServer,
    ui: UiReceiver,
    capture: BoundedAudioChannel,
}

async fn start(builder: impl FnOnce(SessionBuilder) -> SessionBuilder, config: SessionConfig) -> Running {
    let (connector, server) = loopback();
    let source = AudioSource::detached(config.audio.capture_capacity());
    let capture = source.channel().clone();
    let sink = AudioSink::detached(config.audio.playback_capacity());
    let base = SessionBuilder::new(config)
        .with_connector(Arc::new(connector))
        .with_audio(source, sink)
        .without_default_services();
    let mut handle = builder(base).start().await.expect("session starts");
    let ui = handle.ui_receiver().expect("UI receiver");
    Running {
        handle,
        server,
        ui,
        capture,
    }
}

async fn expect_ui(ui: &mut UiReceiver, pred: impl Fn(&UiMessage) -> bool) -> UiMessage {
    loop {
        let message = tokio::time::timeout(LIMIT, ui.recv())
            .await
            .expect("timed out waiting for UI message")
            .expect("UI channel closed");
        if pred(&message) {
            return message;
        }
    }
}

fn user_said(server: &LoopbackServer, text: &str) {
    server.push(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": text
    }));
}

fn audio_delta(server: &LoopbackServer, samples: usize) {
    server.push(json!({
        "type": "response.audio.delta",
        "delta": encode_base64_pcm16(&vec![0.25; samples])
    }));
}

#[tokio::test]
async fn test_barge_in_cancels_and_mutes_playback() {
    let mut run = start(|b| b, test_config()).await;

    run.server
        .push(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    expect_ui(&mut run.ui, |m| *m == UiMessage::AiSpeaking { speaking: true }).await;
    audio_delta(&run.server, 480);

    run.server.push(json!({"type": "input_audio_buffer.speech_started"}));
    expect_ui(&mut run.ui, |m| *m == UiMessage::AiSpeaking { speaking: false }).await;
    assert!(run.server.wait_for("response.cancel", 1, LIMIT).await);

    // A late delta from the cancelled response must not reach playback
    audio_delta(&run.server, 960);
    user_said(&run.server, "Sorry, can I ask something?");
    expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Transcript { role: Role::User, .. })).await;

    let report = run.handle.stop().await.unwrap();
    assert_eq!(report.barge_ins, 1);
    assert_eq!(report.audio.output.len(), 480, "only pre-interruption audio is played");
    assert_eq!(run.server.count_received("response.cancel"), 1);
}

#[tokio::test]
async fn test_final_state_survives_unread_audio_levels() {
    let mut config = test_config();
    config.ui_channel_capacity = 256;
    config.scoring.model_every_utterances = 1;
    config.scoring.model_min_utterances = 1;
    let calls = Arc::new(AtomicUsize::new(0));
    let model = Arc::new(CountingModel { calls: calls.clone() });
    let mut run = start(|b| b.with_estimator(model), config).await;

    run.server
        .push(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    for _ in 0..400 {
        audio_delta(&run.server, 240);
    }
    run.server.push(json!({"type": "response.done", "response": {}}));
    user_said(&run.server, "That was a long answer.");

    // The model sees the transcript only after every earlier event was routed
    tokio::time::timeout(LIMIT, async {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transcript reaches the scorer");

    let report = run.handle.stop().await.unwrap();
    assert!(report.ui_dropped > 0, "audio levels beyond the cap are dropped");
    assert_eq!(report.session.utterances.len(), 1);

    expect_ui(&mut run.ui, |m| *m == UiMessage::AiSpeaking { speaking: false }).await;
    expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Transcript { .. })).await;
    expect_ui(&mut run.ui, |m| *m == UiMessage::state(SessionStatus::Completed)).await;
}

#[tokio::test]
async fn test_sixty_one_utterances_trigger_six_refreshes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = Arc::new(CountingModel { calls: calls.clone() });
    let mut run = start(|b| b.with_estimator(model), test_config()).await;

    for i in 1..=61 {
        user_said(&run.server, &format!("This is my answer number {}.", i));
    }
    expect_ui(&mut run.ui, |m| {
        matches!(m, UiMessage::Transcript { text, .. } if text == "This is my answer number 61.")
    })
    .await;

    let report = run.handle.stop().await.unwrap();
    assert_eq!(report.session.user_utterances().count(), 61);
    assert_eq!(report.model_refresh_attempts, 6);
    assert!(calls.load(Ordering::SeqCst) <= 6);
}

#[tokio::test]
async fn test_full_session_is_persisted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()));
    let mut run = start(
        |b| b.with_feedback(Arc::new(CannedFeedback)).with_store(store.clone()),
        test_config(),
    )
    .await;

    for seq in 0..5 {
        run.capture
            .push(AudioFrame::new(seq, Direction::Capture, vec![0.1; 2400]));
    }
    assert!(run.server.wait_for("input_audio_buffer.append", 5, LIMIT).await);

    run.server
        .push(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    audio_delta(&run.server, 1200);
    run.server.push(json!({
        "type": "response.audio_transcript.done",
        "transcript": "Hello! What did you do last weekend?"
    }));
    run.server.push(json!({"type": "response.done", "response": {}}));
    user_said(&run.server, "I goed to the beach with my friends and we swimmed a lot.");
    user_said(&run.server, "Um, the weather was, like, really nice.");
    user_said(&run.server, "Afterwards we had dinner at a small restaurant.");

    let score = expect_ui(&mut run.ui, |m| match m {
        UiMessage::ScoreUpdate(payload) => payload.overall != 50.0,
        _ => false,
    })
    .await;
    if let UiMessage::ScoreUpdate(payload) = score {
        assert!(payload.toeic_estimate >= 10 && payload.toeic_estimate <= 990);
        assert!(!payload.cefr.is_empty());
    }

    let report = run.handle.stop().await.unwrap();
    assert_eq!(report.session.status, SessionStatus::Completed);
    assert_eq!(report.session.utterances.len(), 4);
    assert_eq!(report.session.utterances[0].role, Role::Assistant);
    assert!(!report.session.utterances[1].highlights.is_empty());
    assert_eq!(report.audio.input.len(), 5 * 2400);
    assert_eq!(report.audio.output.len(), 1200);
    assert_eq!(report.audio.mixed.len(), 5 * 2400);
    assert_eq!(report.feedback.as_ref().unwrap().summary, "4 turns reviewed");
    assert!(!report.session.score_history.is_empty());

    let feedback = expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Feedback(_))).await;
    assert_eq!(feedback, UiMessage::Feedback(report.feedback.clone().unwrap()));
    expect_ui(&mut run.ui, |m| *m == UiMessage::state(SessionStatus::Completed)).await;

    let saved = store.load_session(report.session.id).unwrap();
    assert_eq!(saved.status, SessionStatus::Completed);
    assert_eq!(saved.utterances.len(), 4);
    assert!(store.recording_path(report.session.id, "input").exists());
    assert_eq!(store.load_history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_feedback_falls_back_on_failure() {
    let mut run = start(|b| b.with_feedback(Arc::new(BrokenFeedback)), test_config()).await;
    user_said(&run.server, "I think I am ready to finish now.");
    expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Transcript { .. })).await;

    let report = run.handle.stop().await.unwrap();
    assert_eq!(report.feedback, Some(Feedback::fallback()));
}

#[tokio::test]
async fn test_force_stop_skips_feedback() {
    let mut run = start(|b| b.with_feedback(Arc::new(CannedFeedback)), test_config()).await;
    user_said(&run.server, "Hello there, nice to meet you.");
    expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Transcript { .. })).await;

    let report = run.handle.force_stop().await.unwrap();
    assert_eq!(report.session.status, SessionStatus::Completed);
    assert!(report.feedback.is_none());
    assert!(!run.server.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnect_fails_session() {
    let mut config = test_config();
    config.scoring.tick_interval_ms = 1_000;
    let mut run = start(|b| b, config).await;

    user_said(&run.server, "Before the connection dropped.");
    expect_ui(&mut run.ui, |m| matches!(m, UiMessage::Transcript { .. })).await;
    run.server.refuse_next(100);
    run.server.drop_connection();

    let report = tokio::time::timeout(Duration::from_secs(120), run.handle.wait())
        .await
        .expect("session ends on its own")
        .unwrap();
    assert_eq!(report.session.status, SessionStatus::Failed);
    assert!(report.session.failure.is_some());
    assert_eq!(report.session.utterances.len(), 1, "partial session is kept");

    let state = expect_ui(&mut run.ui, |m| {
        matches!(m, UiMessage::SessionState { status: SessionStatus::Failed, .. })
    })
    .await;
    assert!(matches!(state, UiMessage::SessionState { reason: Some(_), .. }));
}

#[tokio::test]
async fn test_level_change_updates_instructions() {
    let mut config = test_config();
    config.scoring.model_every_utterances = 3;
    let strong = PartialScores::new()
        .with(parlance::assessment::Axis::Vocabulary, 100.0)
        .with(parlance::assessment::Axis::Grammar, 100.0)
        .with(parlance::assessment::Axis::Comprehension, 100.0)
        .with(parlance::assessment::Axis::Coherence, 100.0)
        .with(parlance::assessment::Axis::PronunciationProxy, 100.0);
    let mut run = start(|b| b.with_estimator(Arc::new(FixedModel(strong))), config).await;

    for text in [
        "Nevertheless, the committee's comprehensive proposal demonstrated remarkable foresight.",
        "Consequently, sophisticated infrastructure investments substantially accelerated regional prosperity.",
        "Furthermore, meticulous documentation facilitated transparent accountability throughout.",
    ] {
        user_said(&run.server, text);
    }

    let change = expect_ui(&mut run.ui, |m| matches!(m, UiMessage::LevelChange { .. })).await;
    if let UiMessage::LevelChange { from, to, .. } = change {
        assert!(to > from, "strong answers should raise the level");
    }
    assert!(run.server.wait_for("session.update", 2, LIMIT).await);
    run.handle.stop().await.unwrap();
}

struct FixedModel(PartialScores);

#[async_trait]
impl ModelEstimator for FixedModel {
    async fn evaluate(&self, _transcript: &[Utterance]) -> Result<PartialScores> {
        Ok(self.0)
    }
}
