//! Routing of protocol events to playback, the session record and the UI.
//!
//! [`EventRouter`] is the only writer of the session transcript. It owns the
//! playback sink while the session runs and hands both back when the event
//! loop exits.

use crate::audio::pcm::audio_level;
use crate::audio::{ArchiveTap, AudioSink, Direction, PushOutcome};
use crate::conversation::{Expression, Gesture, GestureController};
use crate::messages::{Role, Session, UiMessage, Utterance};
use crate::realtime::tools::{END_SESSION, PLAY_GESTURE, SET_EXPRESSION};
use crate::realtime::{ProtocolEvent, ProtocolHandle};
use crate::utils::UiSender;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interrupts the assistant's current response.
pub trait ResponseControl: Send + Sync {
    fn cancel_response(&self);
}

impl ResponseControl for ProtocolHandle {
    fn cancel_response(&self) {
        ProtocolHandle::cancel_response(self)
    }
}

/// What the supervisor should do after an event was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The assistant asked to end the session and its last turn has finished.
    EndRequested,
    /// The connection is gone for good.
    Fatal(String),
}

pub struct EventRouter {
    control: Arc<dyn ResponseControl>,
    sink: AudioSink,
    ui: UiSender,
    tap: Option<ArchiveTap>,
    session: Session,
    transcript_tx: Option<mpsc::UnboundedSender<Utterance>>,
    gestures: GestureController,
    ai_speaking: bool,
    // Set on barge-in; playback resumes with the next response
    muted: bool,
    end_pending: bool,
    barge_ins: u64,
}

impl EventRouter {
    pub fn new(control: Arc<dyn ResponseControl>, sink: AudioSink, ui: UiSender, session: Session) -> Self {
        Self {
            control,
            sink,
            ui,
            tap: None,
            session,
            transcript_tx: None,
            gestures: GestureController::new(crate::conversation::gestures::DEFAULT_GESTURE_INTERVAL),
            ai_speaking: false,
            muted: false,
            end_pending: false,
            barge_ins: 0,
        }
    }

    pub fn with_archive(mut self, tap: ArchiveTap) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Forward every finished utterance, e.g. to the scoring loop.
    pub fn with_transcript_sink(mut self, tx: mpsc::UnboundedSender<Utterance>) -> Self {
        self.transcript_tx = Some(tx);
        self
    }

    pub fn with_gestures(mut self, gestures: GestureController) -> Self {
        self.gestures = gestures;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sink(&self) -> &AudioSink {
        &self.sink
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn barge_ins(&self) -> u64 {
        self.barge_ins
    }

    pub fn greet(&mut self, now: Instant) {
        if let Some(gesture) = self.gestures.on_session_start(now) {
            self.ui.send(UiMessage::gesture(gesture));
        }
    }

    pub fn into_parts(self) -> (Session, AudioSink) {
        (self.session, self.sink)
    }

    pub fn handle(&mut self, event: ProtocolEvent, now: Instant) -> Flow {
        match event {
            ProtocolEvent::AudioDelta { samples } => {
                self.on_audio(samples);
                Flow::Continue
            }
            ProtocolEvent::TranscriptDelta { .. } => Flow::Continue,
            ProtocolEvent::TranscriptDone { role, text } => {
                self.on_transcript(role, text, now);
                Flow::Continue
            }
            ProtocolEvent::TurnStarted { response_id } => {
                debug!(%response_id, "assistant turn started");
                self.muted = false;
                self.set_speaking(true);
                Flow::Continue
            }
            ProtocolEvent::TurnDone => {
                self.set_speaking(false);
                if self.end_pending {
                    info!("assistant finished its closing turn");
                    return Flow::EndRequested;
                }
                Flow::Continue
            }
            ProtocolEvent::SpeechStarted => {
                self.on_speech_started();
                Flow::Continue
            }
            ProtocolEvent::SpeechStopped => Flow::Continue,
            ProtocolEvent::ToolCallRequested { name, arguments, .. } => self.on_tool_call(&name, &arguments),
            ProtocolEvent::ToolResultAcknowledged { call_id } => {
                debug!(%call_id, "tool result acknowledged");
                Flow::Continue
            }
            ProtocolEvent::SessionCreated | ProtocolEvent::SessionUpdated => Flow::Continue,
            ProtocolEvent::Error { code, message } => {
                warn!(code = ?code, %message, "realtime service reported an error");
                Flow::Continue
            }
            ProtocolEvent::Reconnecting { reason } => {
                warn!(%reason, "realtime connection lost, reconnecting");
                if self.ai_speaking {
                    self.sink.flush();
                    self.set_speaking(false);
                }
                Flow::Continue
            }
            ProtocolEvent::Reconnected { attempts } => {
                info!(attempts, "realtime connection restored");
                Flow::Continue
            }
            ProtocolEvent::ConnectionClosed { reason, fatal } => {
                if fatal {
                    Flow::Fatal(reason)
                } else {
                    debug!(%reason, "realtime connection closed");
                    Flow::Continue
                }
            }
        }
    }

    fn on_audio(&mut self, samples: Vec<f32>) {
        if self.muted || samples.is_empty() {
            return;
        }
        let level = audio_level(&samples);
        let archived = self.tap.is_some().then(|| samples.clone());
        match self.sink.play(samples) {
            PushOutcome::Queued | PushOutcome::Evicted => {}
            PushOutcome::Rejected | PushOutcome::Closed => {
                debug!("playback rejected audio delta");
                return;
            }
        }
        if let (Some(tap), Some(samples)) = (&self.tap, archived) {
            tap.record_samples(Direction::Playback, &samples);
        }
        self.ui.send(UiMessage::audio_level(level));
    }

    fn on_transcript(&mut self, role: Role, text: String, now: Instant) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let utterance = Utterance::annotated(role, text);
        self.ui.send(UiMessage::transcript(role, text));
        if let Some(tx) = &self.transcript_tx {
            let _ = tx.send(utterance.clone());
        }
        self.session.append(utterance);

        let gesture = match role {
            Role::User => self.gestures.on_user_finished_speaking(now),
            Role::Assistant => self.gestures.on_assistant_text(text, now),
        };
        if let Some(gesture) = gesture {
            self.ui.send(UiMessage::gesture(gesture));
        }
    }

    /// Barge-in: the user talks over the assistant.
    fn on_speech_started(&mut self) {
        if !self.ai_speaking {
            return;
        }
        self.barge_ins += 1;
        self.control.cancel_response();
        let flushed = self.sink.flush();
        self.muted = true;
        self.set_speaking(false);
        info!(flushed, "user interrupted the assistant");
    }

    fn on_tool_call(&mut self, name: &str, arguments: &str) -> Flow {
        let args: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
        match name {
            SET_EXPRESSION => {
                if let Some(expression) = args["expression"].as_str().and_then(Expression::parse) {
                    self.ui.send(UiMessage::expression(expression));
                }
            }
            PLAY_GESTURE => {
                if let Some(gesture) = args["gesture"].as_str().and_then(Gesture::parse) {
                    self.ui.send(UiMessage::gesture(gesture));
                }
            }
            END_SESSION => {
                info!(reason = ?args["farewell_reason"].as_str(), "assistant requested end of session");
                if !self.ai_speaking {
                    return Flow::EndRequested;
                }
                self.end_pending = true;
            }
            _ => {}
        }
        Flow::Continue
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.ai_speaking != speaking {
            self.ai_speaking = speaking;
            self.ui.send(UiMessage::AiSpeaking { speaking });
        }
    }
}

/// Signals raised by the session loops towards the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    EndRequested,
    Fatal(String),
}

/// Drive the router until cancelled or the client's event stream ends.
pub async fn run_event_loop(
    mut router: EventRouter,
    mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
    signals: mpsc::UnboundedSender<LoopSignal>,
    cancel: CancellationToken,
) -> EventRouter {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("protocol event stream ended");
                    break;
                };
                match router.handle(event, Instant::now()) {
                    Flow::Continue => {}
                    Flow::EndRequested => {
                        let _ = signals.send(LoopSignal::EndRequested);
                    }
                    Flow::Fatal(reason) => {
                        let _ = signals.send(LoopSignal::Fatal(reason));
                    }
                }
            }
        }
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SessionStatus;
    use crate::utils::{ui_channel, UiReceiver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingControl {
        cancels: AtomicUsize,
    }

    impl ResponseControl for CountingControl {
        fn cancel_response(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn router() -> (EventRouter, Arc<CountingControl>, UiReceiver) {
        let control = Arc::new(CountingControl::default());
        let (ui, rx) = ui_channel(64);
        let mut session = Session::new();
        session.start();
        let router = EventRouter::new(control.clone(), AudioSink::detached(16), ui, session);
        (router, control, rx)
    }

    fn drain(rx: &mut UiReceiver) -> Vec<UiMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn audio() -> ProtocolEvent {
        ProtocolEvent::AudioDelta {
            samples: vec![0.25; 240],
        }
    }

    fn turn() -> ProtocolEvent {
        ProtocolEvent::TurnStarted {
            response_id: "resp_1".into(),
        }
    }

    #[test]
    fn test_barge_in_cancels_and_mutes() {
        let (mut router, control, mut rx) = router();
        let now = Instant::now();
        router.handle(turn(), now);
        router.handle(audio(), now);
        router.handle(audio(), now);
        assert_eq!(router.sink().channel().len(), 2);
        drain(&mut rx);

        router.handle(ProtocolEvent::SpeechStarted, now);
        assert_eq!(control.cancels.load(Ordering::SeqCst), 1);
        assert!(router.sink().channel().is_empty());
        assert_eq!(drain(&mut rx), vec![UiMessage::AiSpeaking { speaking: false }]);

        // Late deltas from the cancelled response are not played
        router.handle(audio(), now);
        assert!(router.sink().channel().is_empty());

        router.handle(turn(), now);
        router.handle(audio(), now);
        assert_eq!(router.sink().channel().len(), 1);
        assert_eq!(router.barge_ins(), 1);
    }

    #[tokio::test]
    async fn test_rejected_playback_is_not_archived() {
        let (ui, mut rx) = ui_channel(64);
        let (archiver, tap) = crate::audio::AudioArchiver::spawn(24_000);
        let mut session = Session::new();
        session.start();
        let mut router = EventRouter::new(
            Arc::new(CountingControl::default()),
            AudioSink::detached(2),
            ui,
            session,
        )
        .with_archive(tap);
        let now = Instant::now();
        router.handle(turn(), now);
        for _ in 0..3 {
            router.handle(audio(), now);
        }
        assert_eq!(router.sink().channel().len(), 2);
        drop(router);

        let archived = archiver.finish().await.unwrap();
        assert_eq!(archived.output.len(), 2 * 240);
        let levels = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, UiMessage::AudioLevel { .. }))
            .count();
        assert_eq!(levels, 2);
    }

    #[test]
    fn test_speech_while_idle_is_not_barge_in() {
        let (mut router, control, mut rx) = router();
        router.handle(ProtocolEvent::SpeechStarted, Instant::now());
        assert_eq!(control.cancels.load(Ordering::SeqCst), 0);
        assert!(!router.is_muted());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_transcripts_are_recorded_and_forwarded() {
        let (router, _control, mut rx) = router();
        let (tx, mut forwarded) = mpsc::unbounded_channel();
        let mut router = router.with_transcript_sink(tx);
        let now = Instant::now();

        router.handle(
            ProtocolEvent::TranscriptDone {
                role: Role::User,
                text: " Um, I goed to the park. ".into(),
            },
            now,
        );
        router.handle(
            ProtocolEvent::TranscriptDone {
                role: Role::Assistant,
                text: String::new(),
            },
            now,
        );

        assert_eq!(router.session().utterances.len(), 1);
        let utterance = forwarded.try_recv().unwrap();
        assert_eq!(utterance.text, "Um, I goed to the park.");
        assert!(!utterance.highlights.is_empty());
        assert!(forwarded.try_recv().is_err());

        let messages = drain(&mut rx);
        assert_eq!(messages[0], UiMessage::transcript(Role::User, "Um, I goed to the park."));
        assert_eq!(messages[1], UiMessage::gesture(Gesture::Nod));
    }

    #[test]
    fn test_tool_calls_drive_character() {
        let (mut router, _control, mut rx) = router();
        let call = |name: &str, arguments: &str| ProtocolEvent::ToolCallRequested {
            call_id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        };

        router.handle(call(SET_EXPRESSION, r#"{"expression":"happy"}"#), Instant::now());
        router.handle(call(PLAY_GESTURE, r#"{"gesture":"wave"}"#), Instant::now());
        router.handle(call(PLAY_GESTURE, r#"{"gesture":"moonwalk"}"#), Instant::now());
        router.handle(call("unknown", "{}"), Instant::now());

        assert_eq!(
            drain(&mut rx),
            vec![UiMessage::expression(Expression::Happy), UiMessage::gesture(Gesture::Wave)]
        );
    }

    #[test]
    fn test_end_session_waits_for_turn_done() {
        let (mut router, _control, _rx) = router();
        let end = ProtocolEvent::ToolCallRequested {
            call_id: "call_9".into(),
            name: END_SESSION.into(),
            arguments: r#"{"farewell_reason":"time is up"}"#.into(),
        };

        router.handle(turn(), Instant::now());
        assert_eq!(router.handle(end.clone(), Instant::now()), Flow::Continue);
        assert_eq!(router.handle(ProtocolEvent::TurnDone, Instant::now()), Flow::EndRequested);

        let (mut idle, _control, _rx) = self::router();
        assert_eq!(idle.handle(end, Instant::now()), Flow::EndRequested);
    }

    #[test]
    fn test_fatal_close() {
        let (mut router, _control, _rx) = router();
        let flow = router.handle(
            ProtocolEvent::ConnectionClosed {
                reason: "reconnect attempts exhausted".into(),
                fatal: true,
            },
            Instant::now(),
        );
        assert_eq!(flow, Flow::Fatal("reconnect attempts exhausted".into()));
        assert_eq!(router.session().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_event_loop_returns_router() {
        let (router, _control, _rx) = router();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_event_loop(router, events_rx, signals_tx, cancel.clone()));
        events_tx.send(turn()).unwrap();
        events_tx
            .send(ProtocolEvent::ToolCallRequested {
                call_id: "c".into(),
                name: END_SESSION.into(),
                arguments: "{}".into(),
            })
            .unwrap();
        events_tx.send(ProtocolEvent::TurnDone).unwrap();

        assert_eq!(signals_rx.recv().await, Some(LoopSignal::EndRequested));
        cancel.cancel();
        let router = task.await.unwrap();
        assert!(!router.is_ai_speaking());
    }
}
