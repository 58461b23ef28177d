//! Server events and their decoded form.

use crate::audio::pcm::decode_base64_pcm16;
use crate::messages::Role;
use crate::Result;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
struct ResponseRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ItemRef {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    call_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

/// Raw wire shape; only the fields the session uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseRef,
    },
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    AssistantTranscriptDelta { delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    UserTranscriptDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        #[serde(default)]
        item: ItemRef,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorBody,
    },
    #[serde(other)]
    Unknown,
}

/// Closed set of event tags handlers register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AudioDelta,
    TranscriptDelta,
    TranscriptDone,
    TurnStarted,
    TurnDone,
    SpeechStarted,
    SpeechStopped,
    ToolCallRequested,
    ToolResultAcknowledged,
    SessionCreated,
    SessionUpdated,
    Error,
    Reconnecting,
    Reconnected,
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    AudioDelta { samples: Vec<f32> },
    TranscriptDelta { role: Role, text: String },
    TranscriptDone { role: Role, text: String },
    TurnStarted { response_id: String },
    TurnDone,
    SpeechStarted,
    SpeechStopped,
    ToolCallRequested { call_id: String, name: String, arguments: String },
    ToolResultAcknowledged { call_id: String },
    SessionCreated,
    SessionUpdated,
    Error { code: Option<String>, message: String },
    /// The connection dropped and a reconnect is under way.
    Reconnecting { reason: String },
    Reconnected { attempts: usize },
    ConnectionClosed { reason: String, fatal: bool },
}

impl ProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProtocolEvent::AudioDelta { .. } => EventKind::AudioDelta,
            ProtocolEvent::TranscriptDelta { .. } => EventKind::TranscriptDelta,
            ProtocolEvent::TranscriptDone { .. } => EventKind::TranscriptDone,
            ProtocolEvent::TurnStarted { .. } => EventKind::TurnStarted,
            ProtocolEvent::TurnDone => EventKind::TurnDone,
            ProtocolEvent::SpeechStarted => EventKind::SpeechStarted,
            ProtocolEvent::SpeechStopped => EventKind::SpeechStopped,
            ProtocolEvent::ToolCallRequested { .. } => EventKind::ToolCallRequested,
            ProtocolEvent::ToolResultAcknowledged { .. } => EventKind::ToolResultAcknowledged,
            ProtocolEvent::SessionCreated => EventKind::SessionCreated,
            ProtocolEvent::SessionUpdated => EventKind::SessionUpdated,
            ProtocolEvent::Error { .. } => EventKind::Error,
            ProtocolEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ProtocolEvent::Reconnected { .. } => EventKind::Reconnected,
            ProtocolEvent::ConnectionClosed { .. } => EventKind::ConnectionClosed,
        }
    }
}

/// Decode one text frame. `Ok(None)` for event types the session does not use.
pub fn decode(text: &str) -> Result<Option<ProtocolEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let event = match message {
        ServerMessage::SessionCreated {} => ProtocolEvent::SessionCreated,
        ServerMessage::SessionUpdated {} => ProtocolEvent::SessionUpdated,
        ServerMessage::ResponseCreated { response } => ProtocolEvent::TurnStarted {
            response_id: response.id,
        },
        ServerMessage::ResponseDone {} => ProtocolEvent::TurnDone,
        ServerMessage::AudioDelta { delta } => ProtocolEvent::AudioDelta {
            samples: decode_base64_pcm16(&delta)?,
        },
        ServerMessage::AssistantTranscriptDelta { delta } => ProtocolEvent::TranscriptDelta {
            role: Role::Assistant,
            text: delta,
        },
        ServerMessage::AssistantTranscriptDone { transcript } => ProtocolEvent::TranscriptDone {
            role: Role::Assistant,
            text: transcript,
        },
        ServerMessage::UserTranscriptDelta { delta } => ProtocolEvent::TranscriptDelta {
            role: Role::User,
            text: delta,
        },
        ServerMessage::UserTranscriptDone { transcript } => ProtocolEvent::TranscriptDone {
            role: Role::User,
            text: transcript,
        },
        ServerMessage::SpeechStarted {} => ProtocolEvent::SpeechStarted,
        ServerMessage::SpeechStopped {} => ProtocolEvent::SpeechStopped,
        ServerMessage::FunctionCallDone {
            call_id,
            name,
            arguments,
        } => ProtocolEvent::ToolCallRequested {
            call_id,
            name,
            arguments,
        },
        ServerMessage::ItemCreated { item } => match (item.kind.as_str(), item.call_id) {
            ("function_call_output", Some(call_id)) => ProtocolEvent::ToolResultAcknowledged { call_id },
            _ => return Ok(None),
        },
        ServerMessage::Error { error } => ProtocolEvent::Error {
            code: error.code.or(error.kind),
            message: error.message,
        },
        ServerMessage::Unknown => {
            debug!("ignoring unhandled server event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_base64_pcm16;
    use serde_json::json;

    fn decode_value(value: serde_json::Value) -> Option<ProtocolEvent> {
        decode(&value.to_string()).unwrap()
    }

    #[test]
    fn test_decode_transcripts() {
        assert_eq!(
            decode_value(json!({"type": "response.audio_transcript.done", "transcript": "Hello!"})),
            Some(ProtocolEvent::TranscriptDone {
                role: Role::Assistant,
                text: "Hello!".into()
            })
        );
        assert_eq!(
            decode_value(json!({
                "type": "conversation.item.input_audio_transcription.completed",
                "item_id": "item_1",
                "transcript": "I like cats."
            })),
            Some(ProtocolEvent::TranscriptDone {
                role: Role::User,
                text: "I like cats.".into()
            })
        );
    }

    #[test]
    fn test_decode_audio_delta() {
        let delta = encode_base64_pcm16(&[0.0, 0.5, -0.5]);
        match decode_value(json!({"type": "response.audio.delta", "response_id": "r", "delta": delta})) {
            Some(ProtocolEvent::AudioDelta { samples }) => assert_eq!(samples.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_turns_and_tools() {
        assert_eq!(
            decode_value(json!({"type": "response.created", "response": {"id": "resp_1"}})),
            Some(ProtocolEvent::TurnStarted {
                response_id: "resp_1".into()
            })
        );
        assert_eq!(
            decode_value(json!({"type": "response.done", "response": {"status": "completed"}})),
            Some(ProtocolEvent::TurnDone)
        );
        assert_eq!(
            decode_value(json!({
                "type": "response.function_call_arguments.done",
                "call_id": "call_1",
                "name": "play_gesture",
                "arguments": "{\"gesture\":\"nod\"}"
            }))
            .map(|e| e.kind()),
            Some(EventKind::ToolCallRequested)
        );
        assert_eq!(
            decode_value(json!({
                "type": "conversation.item.created",
                "item": {"type": "function_call_output", "call_id": "call_1"}
            })),
            Some(ProtocolEvent::ToolResultAcknowledged {
                call_id: "call_1".into()
            })
        );
        assert_eq!(
            decode_value(json!({"type": "conversation.item.created", "item": {"type": "message"}})),
            None
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(decode_value(json!({"type": "rate_limits.updated", "rate_limits": []})), None);
        assert!(decode("{not json").is_err());
        assert!(decode(&json!({"type": "response.audio.delta", "delta": "%%%"}).to_string()).is_err());
    }

    #[test]
    fn test_error_event() {
        assert_eq!(
            decode_value(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "code": "bad_value", "message": "nope"}
            })),
            Some(ProtocolEvent::Error {
                code: Some("bad_value".into()),
                message: "nope".into()
            })
        );
    }
}
