//! Session orchestrator
//!
//! Owns one conversation: audio endpoints, the protocol client, the scorer and
//! the strategy. Three loops run while the session is active:
//! audio-send (capture -> protocol client), event (protocol events -> playback,
//! transcript, UI) and score-tick (scorer -> UI and strategy). A supervisor
//! task waits for a stop command or a fatal signal and tears everything down.

use super::config::SessionConfig;
use super::event_loop::{run_event_loop, EventRouter, LoopSignal};
use crate::assessment::{
    feedback_or_fallback, AssessmentResult, ChatClient, ChatEvaluator, ChatFeedback, Feedback, FeedbackProvider,
    HybridScorer, ModelEstimator, ScoreUpdate, ScorerSettings,
};
use crate::audio::{ArchiveTap, ArchivedAudio, AudioArchiver, AudioSink, AudioSource};
use crate::conversation::{ConversationStrategy, ProficiencyLevel};
use crate::messages::{FileSessionStore, Session, SessionStatus, SessionStore, UiMessage, Utterance};
use crate::realtime::{
    character_tools, ClientSettings, Connector, ProtocolClient, ProtocolHandle, SendOutcome, SessionParams,
    WsConnector,
};
use crate::utils::{ui_channel, UiReceiver, UiSender};
use crate::{Result, TutorError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a forced stop lets the loops react to cancellation before aborting them.
const FORCE_STOP_GRACE: Duration = Duration::from_millis(50);

/// Commands accepted by a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Stop gracefully: drain devices and generate feedback
    Stop,

    /// Stop now: abort the loops and skip feedback
    ForceStop,
}

/// Why the session is being torn down
#[derive(Debug, Clone, PartialEq, Eq)]
enum StopCause {
    Requested { force: bool },
    EndedByAssistant,
    Fatal(String),
}

/// Everything a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub audio: ArchivedAudio,
    pub feedback: Option<Feedback>,
    pub final_scores: AssessmentResult,
    pub model_refresh_attempts: u64,
    pub barge_ins: u64,
    pub ui_dropped: u64,
}

/// Handle to a running session
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    ui: Option<UiReceiver>,
    supervisor: JoinHandle<Result<SessionReport>>,
    protocol: ProtocolHandle,
}

impl SessionHandle {
    /// Take the UI message stream. Returns `None` after the first call.
    pub fn ui_receiver(&mut self) -> Option<UiReceiver> {
        self.ui.take()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// The live protocol client, for manual turn control.
    pub fn protocol(&self) -> &ProtocolHandle {
        &self.protocol
    }

    pub async fn stop(self) -> Result<SessionReport> {
        let _ = self.commands.send(SessionCommand::Stop);
        self.join().await
    }

    pub async fn force_stop(self) -> Result<SessionReport> {
        let _ = self.commands.send(SessionCommand::ForceStop);
        self.join().await
    }

    /// Wait for the session to end on its own (assistant ended it or a fatal error).
    pub async fn wait(self) -> Result<SessionReport> {
        self.join().await
    }

    async fn join(self) -> Result<SessionReport> {
        // Keep the command sender alive until the supervisor is done
        let Self {
            commands: _commands,
            supervisor,
            ..
        } = self;
        supervisor
            .await
            .map_err(|e| TutorError::InvalidState(format!("Session supervisor failed: {}", e)))?
    }
}

/// Builder for a session
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    audio: Option<(AudioSource, AudioSink)>,
    estimator: Option<Arc<dyn ModelEstimator>>,
    feedback: Option<Arc<dyn FeedbackProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    default_services: bool,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            connector: None,
            audio: None,
            estimator: None,
            feedback: None,
            store: None,
            default_services: true,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_audio(mut self, source: AudioSource, sink: AudioSink) -> Self {
        self.audio = Some((source, sink));
        self
    }

    /// Use channel-only endpoints sized from the config.
    pub fn with_detached_audio(self) -> Self {
        let source = AudioSource::detached(self.config.audio.capture_capacity());
        let sink = AudioSink::detached(self.config.audio.playback_capacity());
        self.with_audio(source, sink)
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn ModelEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackProvider>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Do not create the networked evaluator, feedback provider or file store
    /// from the config; only explicitly supplied ones are used.
    pub fn without_default_services(mut self) -> Self {
        self.default_services = false;
        self
    }

    fn resolve_services(&mut self) {
        if !self.default_services {
            return;
        }
        let scoring = &self.config.scoring;
        if self.estimator.is_none() || (self.feedback.is_none() && scoring.generate_feedback) {
            match self.config.api_key() {
                Ok(key) => {
                    let timeout = Duration::from_millis(scoring.request_timeout_ms);
                    match ChatClient::new(&scoring.api_base, key, &scoring.evaluation_model, timeout) {
                        Ok(client) => {
                            if self.estimator.is_none() {
                                self.estimator = Some(Arc::new(ChatEvaluator::new(client.clone())));
                            }
                            if self.feedback.is_none() && scoring.generate_feedback {
                                self.feedback = Some(Arc::new(ChatFeedback::new(client)));
                            }
                        }
                        Err(e) => warn!(error = %e, "model scoring disabled"),
                    }
                }
                Err(_) => debug!("no API key, model scoring and feedback disabled"),
            }
        }
        if self.store.is_none() && self.config.storage.enabled {
            self.store = Some(Arc::new(FileSessionStore::new(&self.config.storage.data_dir)));
        }
    }

    /// Open devices, connect and start the session loops.
    pub async fn start(mut self) -> Result<SessionHandle> {
        self.config.validate()?;
        self.resolve_services();

        let connector: Arc<dyn Connector> = match self.connector.take() {
            Some(connector) => connector,
            None => Arc::new(WsConnector::from_config(&self.config.realtime)?),
        };

        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let (mut source, mut sink) = match self.audio.take() {
            Some(endpoints) => endpoints,
            None => open_devices(&self.config, device_tx.clone())?,
        };

        let mut strategy = ConversationStrategy::new(ProficiencyLevel::Intermediate);
        strategy.set_context(self.config.context.clone());
        let params = SessionParams::from_config(&self.config.realtime, strategy.instructions());
        let mut client = ProtocolClient::new(connector, params, ClientSettings::from(&self.config.realtime))
            .with_tools(character_tools());
        let events = client.event_stream();

        let protocol = match client.connect().await {
            Ok(protocol) => protocol,
            Err(e) => {
                error!(error = %e, "session failed to start");
                let _ = source.stop(Duration::ZERO);
                let _ = sink.stop(Duration::ZERO);
                return Err(e);
            }
        };

        let (ui, ui_rx) = ui_channel(self.config.ui_channel_capacity);

        let (archiver, tap) = AudioArchiver::spawn(self.config.audio.sample_rate);
        let mut session = Session::new();
        session.start();
        info!(session_id = %session.id, "session started");
        ui.send(UiMessage::state(SessionStatus::Active));
        let (status_tx, status_rx) = watch::channel(SessionStatus::Active);

        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let fallback = session.clone();
        let mut router = EventRouter::new(Arc::new(protocol.clone()), sink, ui.clone(), session)
            .with_archive(tap.clone())
            .with_transcript_sink(utterance_tx);
        router.greet(std::time::Instant::now());

        let scorer = HybridScorer::new(ScorerSettings::from(&self.config.scoring), self.estimator.take());
        let score_state = ScoreLoop {
            scorer,
            strategy,
            protocol: protocol.clone(),
            ui: ui.clone(),
            transcript: Vec::new(),
            started,
            last: None,
        };

        let loops = SessionLoops {
            audio: tokio::spawn(run_audio_send_loop(source, protocol.clone(), tap, cancel.clone())),
            events: tokio::spawn(run_event_loop(router, events, signal_tx, cancel.clone())),
            scores: tokio::spawn(run_score_loop(
                score_state,
                utterance_rx,
                self.config.scoring.tick_interval(),
                cancel.clone(),
            )),
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            config: self.config,
            protocol: protocol.clone(),
            ui,
            status: status_tx,
            cancel,
            archiver,
            feedback: self.feedback,
            store: self.store,
            fallback,
            started,
            device_tx,
        };
        let supervisor = tokio::spawn(supervisor.run(loops, command_rx, signal_rx, device_rx));

        Ok(SessionHandle {
            commands: command_tx,
            status: status_rx,
            ui: Some(ui_rx),
            supervisor,
            protocol,
        })
    }
}

#[cfg(feature = "audio-io")]
fn open_devices(
    config: &SessionConfig,
    errors: mpsc::UnboundedSender<TutorError>,
) -> Result<(AudioSource, AudioSink)> {
    use crate::audio::{CaptureParams, PlaybackParams};

    let audio = &config.audio;
    let startup_timeout = Duration::from_millis(audio.device_startup_timeout_ms);
    let source = AudioSource::open(
        CaptureParams {
            device_index: audio.input_device,
            sample_rate: audio.sample_rate,
            frame_samples: audio.frame_samples(),
            startup_timeout,
        },
        audio.capture_capacity(),
        errors.clone(),
    )?;
    let sink = AudioSink::open(
        PlaybackParams {
            device_index: audio.output_device,
            sample_rate: audio.sample_rate,
            startup_timeout,
        },
        audio.playback_capacity(),
        errors,
    );
    match sink {
        Ok(sink) => Ok((source, sink)),
        Err(e) => {
            let mut source = source;
            let _ = source.stop(Duration::ZERO);
            Err(e)
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn open_devices(
    config: &SessionConfig,
    _errors: mpsc::UnboundedSender<TutorError>,
) -> Result<(AudioSource, AudioSink)> {
    warn!("built without audio-io, using detached audio endpoints");
    Ok((
        AudioSource::detached(config.audio.capture_capacity()),
        AudioSink::detached(config.audio.playback_capacity()),
    ))
}

/// Forward captured frames to the protocol client. Capture continues during
/// barge-in; only playback is muted.
async fn run_audio_send_loop(
    source: AudioSource,
    protocol: ProtocolHandle,
    tap: ArchiveTap,
    cancel: CancellationToken,
) -> AudioSource {
    let mut saturated = 0u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = source.channel().pull() => frame,
        };
        let Some(frame) = frame else {
            debug!("capture channel closed");
            break;
        };
        tap.record(&frame);
        match protocol.send_audio(&frame.samples) {
            SendOutcome::Queued | SendOutcome::Inactive => {}
            SendOutcome::Saturated => {
                saturated += 1;
                if saturated == 1 || saturated % 50 == 0 {
                    debug!(saturated, "outgoing audio queue full, dropping chunk");
                }
            }
            SendOutcome::Closed => {
                debug!("protocol client closed, audio-send loop exiting");
                break;
            }
        }
    }
    source
}

struct ScoreLoop {
    scorer: HybridScorer,
    strategy: ConversationStrategy,
    protocol: ProtocolHandle,
    ui: UiSender,
    transcript: Vec<Utterance>,
    started: Instant,
    last: Option<ScoreUpdate>,
}

impl ScoreLoop {
    fn on_utterance(&mut self, utterance: Utterance) {
        self.transcript.push(utterance);
        self.scorer.observe(&self.transcript, self.started.elapsed());
    }

    fn tick(&mut self) {
        let update = self.scorer.update(&self.transcript, self.started.elapsed());
        self.ui.send(UiMessage::score(&update));
        if let Some(change) = self.strategy.update(update.result.overall) {
            self.ui.send(UiMessage::level_change(&change));
            if let Err(e) = self.protocol.update_instructions(self.strategy.instructions()) {
                warn!(error = %e, "failed to update session instructions");
            }
        }
        self.last = Some(update);
    }
}

async fn run_score_loop(
    mut state: ScoreLoop,
    mut utterances: mpsc::UnboundedReceiver<Utterance>,
    interval: Duration,
    cancel: CancellationToken,
) -> ScoreLoop {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(utterance) = utterances.recv() => state.on_utterance(utterance),
            _ = ticker.tick() => {
                while let Ok(utterance) = utterances.try_recv() {
                    state.on_utterance(utterance);
                }
                state.tick();
            }
        }
    }
    // Utterances routed just before cancellation
    while let Ok(utterance) = utterances.try_recv() {
        state.on_utterance(utterance);
    }
    state
}

struct SessionLoops {
    audio: JoinHandle<AudioSource>,
    events: JoinHandle<EventRouter>,
    scores: JoinHandle<ScoreLoop>,
}

async fn join_loop<T>(name: &str, mut task: JoinHandle<T>, limit: Duration) -> Option<T> {
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(task = name, error = %e, "session loop failed");
            None
        }
        Err(_) => {
            warn!(task = name, "session loop did not stop in time, aborting");
            task.abort();
            None
        }
    }
}

struct Supervisor {
    config: SessionConfig,
    protocol: ProtocolHandle,
    ui: UiSender,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    archiver: AudioArchiver,
    feedback: Option<Arc<dyn FeedbackProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    // Used when the event loop cannot hand its session back
    fallback: Session,
    started: Instant,
    // Held so the device error channel stays open for detached endpoints
    device_tx: mpsc::UnboundedSender<TutorError>,
}

impl Supervisor {
    async fn run(
        self,
        loops: SessionLoops,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut signals: mpsc::UnboundedReceiver<LoopSignal>,
        mut device_errors: mpsc::UnboundedReceiver<TutorError>,
    ) -> Result<SessionReport> {
        let cause = tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::ForceStop) => StopCause::Requested { force: true },
                Some(SessionCommand::Stop) | None => StopCause::Requested { force: false },
            },
            Some(signal) = signals.recv() => match signal {
                LoopSignal::EndRequested => StopCause::EndedByAssistant,
                LoopSignal::Fatal(reason) => StopCause::Fatal(reason),
            },
            Some(e) = device_errors.recv() => {
                error!(error = %e, "audio device failed");
                StopCause::Fatal(e.user_message())
            }
        };
        info!(cause = ?cause, "stopping session");
        self.shutdown(loops, cause).await
    }

    async fn shutdown(self, loops: SessionLoops, cause: StopCause) -> Result<SessionReport> {
        let force = matches!(cause, StopCause::Requested { force: true });
        let _ = self.status.send(SessionStatus::Stopping);
        self.ui.send(UiMessage::state(SessionStatus::Stopping));

        self.cancel.cancel();
        let limit = if force { FORCE_STOP_GRACE } else { self.config.stop_timeout() };
        let router = join_loop("event", loops.events, limit).await;
        let source = join_loop("audio-send", loops.audio, limit).await;
        let score_loop = join_loop("score-tick", loops.scores, limit).await;

        self.protocol.close(self.config.stop_timeout()).await;

        let drain = if force { Duration::ZERO } else { self.config.drain_timeout() };
        let barge_ins = router.as_ref().map_or(0, |r| r.barge_ins());
        let (mut session, sink) = match router {
            Some(router) => {
                let (session, sink) = router.into_parts();
                (session, Some(sink))
            }
            None => {
                let mut session = self.fallback.clone();
                if let Some(state) = &score_loop {
                    session.utterances = state.transcript.clone();
                }
                (session, None)
            }
        };
        session.begin_stopping();
        stop_devices(source, sink, drain).await;

        let audio = match self.archiver.finish().await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "audio archive incomplete");
                ArchivedAudio {
                    sample_rate: self.config.audio.sample_rate,
                    ..Default::default()
                }
            }
        };

        let (final_scores, model_refresh_attempts) = match score_loop {
            Some(mut state) => {
                state.scorer.shutdown();
                let final_update = state.scorer.final_update(&session.utterances, self.started.elapsed());
                for result in state.scorer.history() {
                    session.record_scores(result.clone());
                }
                (final_update.result, state.scorer.refresh_attempts())
            }
            None => (AssessmentResult::default(), 0),
        };

        let feedback = match (&self.feedback, force) {
            (Some(provider), false) if session.user_utterances().next().is_some() => {
                let feedback = feedback_or_fallback(provider.as_ref(), &session.utterances, &final_scores).await;
                self.ui.send(UiMessage::Feedback(feedback.clone()));
                Some(feedback)
            }
            _ => None,
        };

        let failure = match &cause {
            StopCause::Fatal(reason) => Some(reason.clone()),
            _ => None,
        };
        let status = if failure.is_some() {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        session.finish(status, failure.clone());

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&session, &audio, feedback.as_ref()).await {
                error!(session_id = %session.id, error = %e, "failed to persist session");
            }
        }

        let _ = self.status.send(status);
        match failure {
            Some(reason) => self.ui.send(UiMessage::failed(reason)),
            None => self.ui.send(UiMessage::state(SessionStatus::Completed)),
        }
        drop(self.device_tx);

        info!(
            session_id = %session.id,
            status = session.status.as_str(),
            utterances = session.utterances.len(),
            overall = final_scores.overall,
            "session finished"
        );
        Ok(SessionReport {
            barge_ins,
            ui_dropped: self.ui.dropped(),
            session,
            audio,
            feedback,
            final_scores,
            model_refresh_attempts,
        })
    }
}

async fn stop_devices(source: Option<AudioSource>, sink: Option<AudioSink>, drain: Duration) {
    let result = tokio::task::spawn_blocking(move || {
        if let Some(mut source) = source {
            if let Err(e) = source.stop(drain) {
                warn!(error = %e, "failed to stop audio source");
            }
        }
        if let Some(mut sink) = sink {
            if let Err(e) = sink.stop(drain) {
                warn!(error = %e, "failed to stop audio sink");
            }
        }
    })
    .await;
    if let Err(e) = result {
        warn!(error = %e, "device shutdown task failed");
    }
}
