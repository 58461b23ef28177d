//! Realtime protocol client.
//!
//! A single actor task owns the transport. It reads frames in wire order and
//! runs every registered handler for an event before reading the next frame.
//! Callers talk to it through a cloneable [`ProtocolHandle`]. Audio goes over a
//! bounded queue and reports saturation instead of waiting; control commands
//! go over an unbounded queue so a cancel is never lost behind audio.
//!
//! On a transport failure while active the actor reconnects with exponential
//! backoff, re-sends the session configuration and a short context summary,
//! and reports `Reconnected`. After the last failed attempt it reports a fatal
//! `ConnectionClosed` and stops.

use super::events::{decode, EventKind, ProtocolEvent};
use super::messages::{context_summary, ClientMessage, SessionParams, ToolDeclaration};
use super::tools::{ToolHandler, ToolRegistry};
use super::transport::{Connector, Transport};
use crate::integration::config::RealtimeConfig;
use crate::messages::Role;
use crate::{Result, TutorError};
use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    SessionConfiguring,
    Active,
    Reconnecting,
    Closing,
}

/// Result of handing an audio chunk to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The outgoing queue is full; the chunk was not sent.
    Saturated,
    /// Not in the active state (connecting or reconnecting); the chunk was not sent.
    Inactive,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub max_reconnect_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub send_queue: usize,
    /// Send `response.create` after answering a tool call.
    pub resume_after_tool_call: bool,
    /// Transcribed utterances replayed after a reconnect.
    pub context_utterances: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for ClientSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            attempt_timeout: config.reconnect_attempt_timeout(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            send_queue: config.send_queue,
            resume_after_tool_call: config.resume_after_tool_call,
            context_utterances: config.context_utterances,
        }
    }
}

impl ClientSettings {
    /// Delays before each reconnect attempt: base, 2x base, 4x base ... capped.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_reconnect_attempts)
            .build()
    }
}

pub type EventHandler = Box<dyn FnMut(&ProtocolEvent) + Send>;

enum Control {
    Commit,
    RequestResponse,
    CancelResponse,
    UpdateParams(Box<SessionParams>),
    UpdateInstructions(String),
    RegisterTool(ToolDeclaration, Arc<dyn ToolHandler>),
    ToolResult { call_id: String, output: Value, resume: bool },
}

enum Exit {
    Shutdown,
    Failed(String),
}

/// Configures handlers and tools, then connects.
pub struct ProtocolClient {
    connector: Arc<dyn Connector>,
    params: SessionParams,
    tools: ToolRegistry,
    handlers: HashMap<EventKind, Vec<EventHandler>>,
    any_handlers: Vec<EventHandler>,
    settings: ClientSettings,
}

impl ProtocolClient {
    pub fn new(connector: Arc<dyn Connector>, params: SessionParams, settings: ClientSettings) -> Self {
        Self {
            connector,
            params,
            tools: ToolRegistry::new(),
            handlers: HashMap::new(),
            any_handlers: Vec::new(),
            settings,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Run `handler` for every event of `kind`, in wire order.
    pub fn on(&mut self, kind: EventKind, handler: impl FnMut(&ProtocolEvent) + Send + 'static) -> &mut Self {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    pub fn on_any(&mut self, handler: impl FnMut(&ProtocolEvent) + Send + 'static) -> &mut Self {
        self.any_handlers.push(Box::new(handler));
        self
    }

    /// Forward every event into a channel.
    pub fn event_stream(&mut self) -> mpsc::UnboundedReceiver<ProtocolEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_any(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Open the connection and complete the configuration handshake, failing
    /// with `ConnectError` on timeout or rejection.
    pub async fn connect(self) -> Result<ProtocolHandle> {
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(self.settings.send_queue.max(1));
        let shutdown = CancellationToken::new();

        let mut actor = Actor {
            connector: self.connector,
            params: self.params,
            tools: self.tools,
            handlers: self.handlers,
            any_handlers: self.any_handlers,
            settings: self.settings,
            state: state_tx,
            control_rx,
            audio_rx,
            shutdown: shutdown.clone(),
            response_in_flight: false,
            recent: VecDeque::new(),
        };

        let limit = actor.settings.connect_timeout;
        let transport = match tokio::time::timeout(limit, actor.establish(false)).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                actor.set_state(ClientState::Disconnected);
                return Err(TutorError::ConnectError(e.to_string()));
            }
            Err(_) => {
                actor.set_state(ClientState::Disconnected);
                return Err(TutorError::ConnectError(format!(
                    "no session acknowledgement within {:?}",
                    limit
                )));
            }
        };
        actor.set_state(ClientState::Active);
        info!("realtime session active");

        let task = tokio::spawn(actor.run(transport));
        Ok(ProtocolHandle {
            control: control_tx,
            audio: audio_tx,
            state: state_rx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
            saturated: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// Cloneable handle to a connected client.
#[derive(Clone)]
pub struct ProtocolHandle {
    control: mpsc::UnboundedSender<Control>,
    audio: mpsc::Sender<String>,
    state: watch::Receiver<ClientState>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    saturated: Arc<AtomicU64>,
}

impl ProtocolHandle {
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.state() == ClientState::Disconnected
    }

    /// Number of audio chunks rejected because the queue was full.
    pub fn saturated_count(&self) -> u64 {
        self.saturated.load(Ordering::Relaxed)
    }

    /// Queue captured audio without waiting.
    pub fn send_audio(&self, samples: &[f32]) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Closed;
        }
        if self.state() != ClientState::Active {
            return SendOutcome::Inactive;
        }
        let message = match ClientMessage::append_audio(samples).to_json() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to encode audio chunk");
                return SendOutcome::Closed;
            }
        };
        match self.audio.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.saturated.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Saturated
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    fn control(&self, command: Control) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(TutorError::InvalidState("protocol client is closed".into()));
        }
        self.control
            .send(command)
            .map_err(|_| TutorError::InvalidState("protocol client is closed".into()))
    }

    pub fn commit_audio(&self) -> Result<()> {
        self.control(Control::Commit)
    }

    pub fn request_response(&self) -> Result<()> {
        self.control(Control::RequestResponse)
    }

    /// Cancel the response in flight. A no-op when there is none or the client is closed.
    pub fn cancel_response(&self) {
        let _ = self.control(Control::CancelResponse);
    }

    pub fn update_instructions(&self, instructions: impl Into<String>) -> Result<()> {
        self.control(Control::UpdateInstructions(instructions.into()))
    }

    pub fn update_params(&self, params: SessionParams) -> Result<()> {
        self.control(Control::UpdateParams(Box::new(params)))
    }

    /// Add a tool and re-send the session configuration.
    pub fn register_tool(&self, declaration: ToolDeclaration, handler: Arc<dyn ToolHandler>) -> Result<()> {
        self.control(Control::RegisterTool(declaration, handler))
    }

    /// Answer a tool call handled outside the registry.
    pub fn send_tool_result(&self, call_id: impl Into<String>, output: Value, resume: bool) -> Result<()> {
        self.control(Control::ToolResult {
            call_id: call_id.into(),
            output,
            resume,
        })
    }

    /// Stop the actor and wait for it to finish, aborting it after `limit`.
    pub async fn close(&self, limit: Duration) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(limit, &mut task).await.is_err() {
                warn!("protocol client did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for ProtocolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandle")
            .field("state", &self.state())
            .field("saturated", &self.saturated_count())
            .finish()
    }
}

async fn send_message(transport: &mut Box<dyn Transport>, message: &ClientMessage) -> Result<()> {
    debug!(kind = message.type_name(), "sending");
    transport.send(message.to_json()?).await
}

struct Actor {
    connector: Arc<dyn Connector>,
    params: SessionParams,
    tools: ToolRegistry,
    handlers: HashMap<EventKind, Vec<EventHandler>>,
    any_handlers: Vec<EventHandler>,
    settings: ClientSettings,
    state: watch::Sender<ClientState>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    audio_rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
    response_in_flight: bool,
    recent: VecDeque<(Role, String)>,
}

impl Actor {
    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
    }

    fn dispatch(&mut self, event: &ProtocolEvent) {
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
        for handler in self.any_handlers.iter_mut() {
            handler(event);
        }
    }

    fn session_update(&self) -> ClientMessage {
        let mut session = self.params.clone();
        session.tools = self.tools.declarations();
        ClientMessage::SessionUpdate { session }
    }

    /// Connect, send the configuration and wait for its acknowledgement.
    async fn establish(&mut self, reconnecting: bool) -> Result<Box<dyn Transport>> {
        if !reconnecting {
            self.set_state(ClientState::Connecting);
        }
        let mut transport = self.connector.connect().await?;
        if !reconnecting {
            self.set_state(ClientState::SessionConfiguring);
        }
        let update = self.session_update();
        send_message(&mut transport, &update).await?;

        loop {
            let text = match transport.recv().await {
                Some(frame) => frame?,
                None => return Err(TutorError::TransportError("closed during handshake".into())),
            };
            match decode(&text) {
                Ok(Some(event)) => {
                    self.dispatch(&event);
                    match event {
                        ProtocolEvent::SessionUpdated => return Ok(transport),
                        ProtocolEvent::Error { message, .. } => {
                            return Err(TutorError::ConnectError(format!("handshake rejected: {}", message)))
                        }
                        _ => {}
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dropping malformed event during handshake"),
            }
        }
    }

    async fn run(mut self, mut transport: Box<dyn Transport>) {
        loop {
            match self.serve(&mut transport).await {
                Exit::Shutdown => {
                    self.set_state(ClientState::Closing);
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "transport close failed");
                    }
                    self.dispatch(&ProtocolEvent::ConnectionClosed {
                        reason: "closed".into(),
                        fatal: false,
                    });
                    break;
                }
                Exit::Failed(reason) => match self.reconnect(reason).await {
                    Some(fresh) => transport = fresh,
                    None => break,
                },
            }
        }
        self.response_in_flight = false;
        self.set_state(ClientState::Disconnected);
        info!("realtime client stopped");
    }

    async fn serve(&mut self, transport: &mut Box<dyn Transport>) -> Exit {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Exit::Shutdown,
                command = self.control_rx.recv() => {
                    let Some(command) = command else {
                        return Exit::Shutdown;
                    };
                    if let Err(e) = self.handle_control(command, transport).await {
                        return Exit::Failed(e.to_string());
                    }
                }
                // Mic audio ahead of incoming frames
                Some(audio) = self.audio_rx.recv() => {
                    if let Err(e) = transport.send(audio).await {
                        return Exit::Failed(e.to_string());
                    }
                }
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.handle_frame(&text, transport).await {
                            return Exit::Failed(e.to_string());
                        }
                    }
                    Some(Err(e)) => return Exit::Failed(e.to_string()),
                    None => return Exit::Failed("connection closed by server".into()),
                },
            }
        }
    }

    async fn handle_control(&mut self, command: Control, transport: &mut Box<dyn Transport>) -> Result<()> {
        match command {
            Control::Commit => send_message(transport, &ClientMessage::CommitAudio).await,
            Control::RequestResponse => {
                self.response_in_flight = true;
                send_message(transport, &ClientMessage::CreateResponse).await
            }
            Control::CancelResponse => {
                if !self.response_in_flight {
                    debug!("cancel requested with no response in flight");
                    return Ok(());
                }
                self.response_in_flight = false;
                send_message(transport, &ClientMessage::CancelResponse).await
            }
            Control::UpdateParams(params) => {
                self.params = *params;
                let update = self.session_update();
                send_message(transport, &update).await
            }
            Control::UpdateInstructions(instructions) => {
                self.params.instructions = instructions;
                let update = self.session_update();
                send_message(transport, &update).await
            }
            Control::RegisterTool(declaration, handler) => {
                info!(tool = %declaration.name, "registering tool");
                self.tools.register(declaration, handler);
                let update = self.session_update();
                send_message(transport, &update).await
            }
            Control::ToolResult { call_id, output, resume } => {
                send_message(transport, &ClientMessage::tool_output(call_id, &output)).await?;
                if resume {
                    self.response_in_flight = true;
                    send_message(transport, &ClientMessage::CreateResponse).await?;
                }
                Ok(())
            }
        }
    }

    /// Malformed events are dropped; only transport failures are returned.
    async fn handle_frame(&mut self, text: &str, transport: &mut Box<dyn Transport>) -> Result<()> {
        let event = match decode(text) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "dropping malformed event");
                return Ok(());
            }
        };

        match &event {
            ProtocolEvent::TurnStarted { .. } => self.response_in_flight = true,
            ProtocolEvent::TurnDone => self.response_in_flight = false,
            ProtocolEvent::TranscriptDone { role, text } if !text.trim().is_empty() => {
                self.recent.push_back((*role, text.trim().to_string()));
                while self.recent.len() > self.settings.context_utterances {
                    self.recent.pop_front();
                }
            }
            ProtocolEvent::Error { code, message } => {
                warn!(code = ?code, message = %message, "server reported error");
            }
            _ => {}
        }

        self.dispatch(&event);

        if let ProtocolEvent::ToolCallRequested {
            call_id,
            name,
            arguments,
        } = event
        {
            let output = self.tools.invoke(&name, &arguments).await;
            debug!(tool = %name, call_id = %call_id, "tool call answered");
            send_message(transport, &ClientMessage::tool_output(call_id, &output)).await?;
            if self.settings.resume_after_tool_call {
                self.response_in_flight = true;
                send_message(transport, &ClientMessage::CreateResponse).await?;
            }
        }
        Ok(())
    }

    async fn reconnect(&mut self, reason: String) -> Option<Box<dyn Transport>> {
        warn!(reason = %reason, "realtime connection lost");
        self.set_state(ClientState::Reconnecting);
        self.response_in_flight = false;
        self.dispatch(&ProtocolEvent::Reconnecting { reason: reason.clone() });

        let mut attempts = 0;
        for delay in self.settings.backoff() {
            attempts += 1;
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            info!(attempt = attempts, delay_ms = delay.as_millis() as u64, "reconnecting");

            let limit = self.settings.attempt_timeout;
            let shutdown = self.shutdown.clone();
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return None,
                outcome = tokio::time::timeout(limit, self.establish(true)) => outcome,
            };
            match outcome {
                Ok(Ok(mut transport)) => {
                    let recent: Vec<_> = self.recent.iter().cloned().collect();
                    if let Err(e) = send_message(&mut transport, &context_summary(&recent)).await {
                        warn!(attempt = attempts, error = %e, "context restore failed");
                        continue;
                    }
                    // Audio queued while offline is stale
                    while self.audio_rx.try_recv().is_ok() {}
                    self.set_state(ClientState::Active);
                    info!(attempts, "realtime connection restored");
                    self.dispatch(&ProtocolEvent::Reconnected { attempts });
                    return Some(transport);
                }
                Ok(Err(e)) => warn!(attempt = attempts, error = %e, "reconnect attempt failed"),
                Err(_) => warn!(attempt = attempts, "reconnect attempt timed out"),
            }
        }

        error!(attempts, "giving up on realtime connection");
        self.dispatch(&ProtocolEvent::ConnectionClosed {
            reason: format!("reconnect failed after {} attempts: {}", attempts, reason),
            fatal: true,
        });
        None
    }
}
