//! In-process stand-in for the realtime service.
//!
//! [`loopback`] returns a connector for the protocol client and a server handle
//! for the caller. The server acknowledges every `session.update`, records every
//! client message, can refuse connection attempts and can drop the live
//! connection. Headless runs and the scenario tests drive sessions through it.

use super::transport::{Connector, Transport};
use crate::{Result, TutorError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

enum ServerFrame {
    Text(String),
    Reset,
}

struct LoopbackState {
    refuse_next: usize,
    auto_ack: bool,
    connect_attempts: Vec<Instant>,
    connections: usize,
    received: Vec<Value>,
    current: Option<mpsc::UnboundedSender<ServerFrame>>,
}

type Shared = Arc<Mutex<LoopbackState>>;

pub fn loopback() -> (LoopbackConnector, LoopbackServer) {
    let shared = Arc::new(Mutex::new(LoopbackState {
        refuse_next: 0,
        auto_ack: true,
        connect_attempts: Vec::new(),
        connections: 0,
        received: Vec::new(),
        current: None,
    }));
    (
        LoopbackConnector {
            shared: shared.clone(),
        },
        LoopbackServer { shared },
    )
}

#[derive(Clone)]
pub struct LoopbackConnector {
    shared: Shared,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let mut state = self.shared.lock();
        state.connect_attempts.push(Instant::now());
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(TutorError::TransportError("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections += 1;
        state.current = Some(tx.clone());
        Ok(Box::new(LoopbackTransport {
            shared: self.shared.clone(),
            to_client: tx,
            from_server: rx,
        }))
    }
}

struct LoopbackTransport {
    shared: Shared,
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_server: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        let value: Value = serde_json::from_str(&text)?;
        let mut state = self.shared.lock();
        let is_current = state
            .current
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&self.to_client));
        if !is_current {
            return Err(TutorError::TransportError("connection reset".into()));
        }
        let ack = state.auto_ack && value["type"] == "session.update";
        state.received.push(value);
        if ack {
            let _ = self
                .to_client
                .send(ServerFrame::Text(json!({"type": "session.updated"}).to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        match self.from_server.recv().await? {
            ServerFrame::Text(text) => Some(Ok(text)),
            ServerFrame::Reset => Some(Err(TutorError::TransportError("connection reset".into()))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state
            .current
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&self.to_client))
        {
            state.current = None;
        }
        Ok(())
    }
}

/// Test-side handle to the loopback service.
#[derive(Clone)]
pub struct LoopbackServer {
    shared: Shared,
}

impl LoopbackServer {
    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.shared.lock().refuse_next = n;
    }

    /// Stop acknowledging session configuration, so handshakes time out.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.shared.lock().auto_ack = enabled;
    }

    /// Deliver a server event on the live connection. Returns false when none is open.
    pub fn push(&self, event: Value) -> bool {
        match &self.shared.lock().current {
            Some(tx) => tx.send(ServerFrame::Text(event.to_string())).is_ok(),
            None => false,
        }
    }

    pub fn push_raw(&self, text: impl Into<String>) -> bool {
        match &self.shared.lock().current {
            Some(tx) => tx.send(ServerFrame::Text(text.into())).is_ok(),
            None => false,
        }
    }

    /// Simulate a transport failure on the live connection.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.shared.lock().current.take() {
            let _ = tx.send(ServerFrame::Reset);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().current.is_some()
    }

    pub fn connections(&self) -> usize {
        self.shared.lock().connections
    }

    /// Instants of every connection attempt, refused ones included.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.shared.lock().connect_attempts.clone()
    }

    pub fn received(&self) -> Vec<Value> {
        self.shared.lock().received.clone()
    }

    pub fn received_types(&self) -> Vec<String> {
        self.shared
            .lock()
            .received
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count_received(&self, message_type: &str) -> usize {
        self.shared
            .lock()
            .received
            .iter()
            .filter(|v| v["type"] == message_type)
            .count()
    }

    /// Poll until at least `count` messages of `message_type` arrived.
    pub async fn wait_for(&self, message_type: &str, count: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.count_received(message_type) >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
