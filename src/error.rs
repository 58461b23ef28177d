use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TutorError {
    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connect error: {0}")]
    ConnectError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Tool invocation error: {0}")]
    ToolInvocationError(String),

    #[error("Scorer error: {0}")]
    ScorerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for TutorError {
    fn from(e: std::io::Error) -> Self {
        TutorError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for TutorError {
    fn from(e: serde_json::Error) -> Self {
        TutorError::ProtocolError(e.to_string())
    }
}

impl TutorError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Retried by the reconnect state machine
            TutorError::TransportError(_) => true,
            // The offending event is dropped
            TutorError::ProtocolError(_) => true,
            // Becomes an error payload in the tool result
            TutorError::ToolInvocationError(_) => true,
            // Previous model scores stay authoritative
            TutorError::ScorerError(_) => true,
            TutorError::PersistenceError(_) => true,
            TutorError::DeviceError(_) => false,
            TutorError::ConnectError(_) => false,
            TutorError::ConfigError(_) => false,
            TutorError::ChannelError(_) => false,
            TutorError::IOError(_) => false,
            TutorError::InvalidState(_) => false,
        }
    }

    /// Errors that terminate a running session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TutorError::DeviceError(_) | TutorError::ConnectError(_)
        )
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            TutorError::DeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            TutorError::TransportError(_) => {
                "Connection to the conversation partner was interrupted.".to_string()
            }
            TutorError::ConnectError(_) => {
                "Could not connect to the conversation partner. Please try again.".to_string()
            }
            TutorError::ProtocolError(_) => {
                "Received an unexpected message from the server.".to_string()
            }
            TutorError::ToolInvocationError(_) => {
                "A character action could not be performed.".to_string()
            }
            TutorError::ScorerError(_) => {
                "Detailed scoring is temporarily unavailable.".to_string()
            }
            TutorError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            TutorError::ChannelError(_) => {
                "Internal communication error. Please restart the session.".to_string()
            }
            TutorError::PersistenceError(_) => {
                "The session could not be saved.".to_string()
            }
            TutorError::IOError(_) => "File system error occurred.".to_string(),
            TutorError::InvalidState(_) => {
                "The session is not in a state that allows this action.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;
