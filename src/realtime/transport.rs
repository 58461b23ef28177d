//! Duplex text-frame transport under the protocol client.

use crate::integration::config::RealtimeConfig;
use crate::{Result, TutorError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame. `None` once the peer has closed the stream.
    /// Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens fresh transports; called once per connect or reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// Builds `<url>?model=<model>`.
pub fn realtime_url(base: &str, model: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}model={}", base, separator, model)
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Result<Self> {
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TutorError::ConfigError("realtime API key is not set".into()))?;
        Ok(Self::new(realtime_url(&config.url, &config.model), key))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TutorError::ConfigError(format!("invalid realtime URL: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| TutorError::ConfigError(format!("invalid API key: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TutorError::TransportError(format!("connect: {}", e)))?;
        info!(status = %response.status(), "realtime websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TutorError::TransportError(format!("send: {}", e)))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed websocket");
                    return None;
                }
                // Ping/pong are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(TutorError::TransportError(format!("read: {}", e)))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TutorError::TransportError(format!("close: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url() {
        assert_eq!(
            realtime_url("wss://api.openai.com/v1/realtime", "gpt-4o-realtime-preview"),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(realtime_url("ws://localhost/rt?x=1", "m"), "ws://localhost/rt?x=1&model=m");
    }

    #[test]
    fn test_connector_requires_key() {
        let config = RealtimeConfig::default();
        assert!(matches!(WsConnector::from_config(&config), Err(TutorError::ConfigError(_))));
        let config = RealtimeConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(WsConnector::from_config(&config).is_ok());
    }
}
