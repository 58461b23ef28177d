//! Client-to-server messages.

use crate::audio::pcm::encode_base64_pcm16;
use crate::integration::config::RealtimeConfig;
use crate::messages::Role;
use serde::Serialize;
use serde_json::Value;

/// Function the remote model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function",
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionParams {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Body of `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParams {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    pub input_audio_transcription: TranscriptionParams,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDeclaration>,
    pub tool_choice: &'static str,
    pub temperature: f64,
}

impl SessionParams {
    pub fn from_config(config: &RealtimeConfig, instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["text", "audio"],
            instructions: instructions.into(),
            voice: config.voice.clone(),
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            input_audio_transcription: TranscriptionParams {
                model: config.transcription_model.clone(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad",
                threshold: config.vad_threshold,
                prefix_padding_ms: config.vad_prefix_padding_ms,
                silence_duration_ms: config.vad_silence_duration_ms,
            },
            tools: Vec::new(),
            tool_choice: "auto",
            temperature: config.temperature,
        }
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self::from_config(&RealtimeConfig::default(), String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
    Message { role: &'static str, content: Vec<ContentPart> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParams },
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    CommitAudio,
    #[serde(rename = "response.create")]
    CreateResponse,
    #[serde(rename = "response.cancel")]
    CancelResponse,
    #[serde(rename = "conversation.item.create")]
    CreateItem { item: ConversationItem },
}

impl ClientMessage {
    pub fn append_audio(samples: &[f32]) -> Self {
        ClientMessage::AppendAudio {
            audio: encode_base64_pcm16(samples),
        }
    }

    pub fn tool_output(call_id: impl Into<String>, output: &Value) -> Self {
        ClientMessage::CreateItem {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.to_string(),
            },
        }
    }

    /// Injects text into the conversation without audio.
    pub fn text_item(role: &'static str, text: impl Into<String>) -> Self {
        ClientMessage::CreateItem {
            item: ConversationItem::Message {
                role,
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::SessionUpdate { .. } => "session.update",
            ClientMessage::AppendAudio { .. } => "input_audio_buffer.append",
            ClientMessage::CommitAudio => "input_audio_buffer.commit",
            ClientMessage::CreateResponse => "response.create",
            ClientMessage::CancelResponse => "response.cancel",
            ClientMessage::CreateItem { .. } => "conversation.item.create",
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub const RECONNECT_NOTICE: &str =
    "[Connection was temporarily lost and has been restored. Continuing conversation.]";

/// System item restoring conversational context after a reconnect.
pub fn context_summary(recent: &[(Role, String)]) -> ClientMessage {
    let mut text = String::from(RECONNECT_NOTICE);
    if !recent.is_empty() {
        text.push_str("\nRecent conversation:");
        for (role, line) in recent {
            let speaker = match role {
                Role::User => "User",
                Role::Assistant => "AI",
            };
            text.push_str(&format!("\n{}: {}", speaker, line));
        }
    }
    ClientMessage::text_item("system", text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_update_shape() {
        let message = ClientMessage::SessionUpdate {
            session: SessionParams::from_config(&RealtimeConfig::default(), "Be kind."),
        };
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["modalities"], json!(["text", "audio"]));
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["silence_duration_ms"], 1000);
        assert_eq!(value["session"]["tool_choice"], "auto");
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["temperature"], json!(0.8));
        assert_eq!(value["session"]["turn_detection"]["threshold"], json!(0.3));
    }

    #[test]
    fn test_unit_messages() {
        assert_eq!(
            ClientMessage::CancelResponse.to_json().unwrap(),
            r#"{"type":"response.cancel"}"#
        );
        assert_eq!(ClientMessage::CommitAudio.type_name(), "input_audio_buffer.commit");
    }

    #[test]
    fn test_tool_output_references_call() {
        let value = serde_json::to_value(ClientMessage::tool_output("call_9", &json!({"status": "ok"}))).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_9");
        assert_eq!(value["item"]["output"], r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_context_summary() {
        let summary = context_summary(&[(Role::User, "I like tea.".into()), (Role::Assistant, "Why?".into())]);
        let value = serde_json::to_value(summary).unwrap();
        assert_eq!(value["item"]["role"], "system");
        let text = value["item"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with(RECONNECT_NOTICE));
        assert!(text.ends_with("User: I like tea.\nAI: Why?"));
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
    }
}
