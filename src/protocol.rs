//! Wire protocol for the duplex agent connection
//!
//! Every message is a JSON text frame `{"type": ..., "payload": {...}}`.
//!
//! | type            | direction    | payload                          |
//! |-----------------|--------------|----------------------------------|
//! | `START_SESSION` | client→peer  | `{apiKey}`                       |
//! | `STOP_SESSION`  | client→peer  | `{}`                             |
//! | `SEND_AUDIO`    | client→peer  | `{data}` base64 PCM16 mono       |
//! | `SEND_VIDEO`    | client→peer  | `{data}` base64 JPEG             |
//! | `TOOL_RESPONSE` | client→peer  | `{callId, result}`               |
//! | `STATUS`        | peer→client  | `{status}`                       |
//! | `ERROR`         | peer→client  | `{error}`                        |
//! | `TRANSCRIPTION` | peer→client  | `{sender: USER\|MODEL, text}`     |
//! | `TURN_COMPLETE` | peer→client  | `{}`                             |
//! | `MODEL_TURN`    | peer→client  | `{}`                             |
//! | `AI_STATE`      | peer→client  | `{state}`                        |
//! | `TOOL_CALL`     | peer→client  | `{tool, args, callId}`           |
//! | `AUDIO_OUTPUT`  | peer→client  | `{data}` base64 PCM16 mono       |
//!
//! Inbound messages without a `payload` object are read from their
//! top-level fields instead.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::audio::AudioFrame;
use crate::codec;
use crate::error::ProtocolError;

/// Name of the tool that starts tracking an object
pub const HIGHLIGHT_OBJECT_TOOL: &str = "highlightObject";

/// Argument of [`HIGHLIGHT_OBJECT_TOOL`] naming the object
pub const OBJECT_NAME_ARG: &str = "object_name";

/// Status value the peer sends once the agent session is live
pub const STATUS_CONNECTED: &str = "connected";

/// Who spoke a transcribed utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Speaker {
    User,
    Model,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "USER"),
            Speaker::Model => write!(f, "MODEL"),
        }
    }
}

/// Observed state of the remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    UsingTool,
}

impl AiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiState::Idle => "idle",
            AiState::Listening => "listening",
            AiState::Processing => "processing",
            AiState::Speaking => "speaking",
            AiState::UsingTool => "using_tool",
        }
    }
}

impl fmt::Display for AiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages written by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    StartSession {
        #[serde(rename = "apiKey")]
        api_key: String,
    },
    StopSession {},
    SendAudio {
        data: String,
    },
    SendVideo {
        data: String,
    },
    ToolResponse {
        #[serde(rename = "callId")]
        call_id: String,
        result: String,
    },
}

impl ClientMessage {
    /// `SEND_AUDIO` carrying one captured frame
    pub fn audio(frame: &AudioFrame) -> Self {
        ClientMessage::SendAudio {
            data: codec::encode_base64(frame.pcm()),
        }
    }

    /// `SEND_VIDEO` carrying one JPEG
    pub fn video(jpeg: &[u8]) -> Self {
        ClientMessage::SendVideo {
            data: codec::encode_base64(jpeg),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::StartSession { .. } => "START_SESSION",
            ClientMessage::StopSession {} => "STOP_SESSION",
            ClientMessage::SendAudio { .. } => "SEND_AUDIO",
            ClientMessage::SendVideo { .. } => "SEND_VIDEO",
            ClientMessage::ToolResponse { .. } => "TOOL_RESPONSE",
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A tool invocation requested by the agent. Answered by exactly one
/// `TOOL_RESPONSE` with the same `call_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

impl ToolCall {
    /// String argument by name, if present and a string
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// Messages read from the peer
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Status { status: String },
    Error { error: String },
    Transcription { sender: Speaker, text: String },
    TurnComplete,
    ModelTurn,
    AiState { state: AiState },
    ToolCall(ToolCall),
    /// PCM16 mono at the output rate, already base64-decoded
    AudioOutput { data: Bytes },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: Value,
}

#[derive(Deserialize)]
struct TranscriptionPayload {
    sender: Speaker,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AiStatePayload {
    state: AiState,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    tool: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
    #[serde(rename = "callId")]
    call_id: String,
}

#[derive(Deserialize)]
struct DataPayload {
    data: String,
}

impl ServerMessage {
    /// Decode one JSON text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = envelope.kind.as_str();
        let payload = match envelope.payload {
            Some(Value::Null) | None => Value::Object(envelope.rest),
            Some(payload) => payload,
        };

        let message = match kind {
            "STATUS" => {
                let p: StatusPayload = parse_payload(kind, payload)?;
                ServerMessage::Status { status: p.status }
            }
            "ERROR" => {
                let p: ErrorPayload = parse_payload(kind, payload)?;
                let error = match p.error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                ServerMessage::Error { error }
            }
            "TRANSCRIPTION" => {
                let p: TranscriptionPayload = parse_payload(kind, payload)?;
                ServerMessage::Transcription {
                    sender: p.sender,
                    text: p.text,
                }
            }
            "TURN_COMPLETE" => ServerMessage::TurnComplete,
            "MODEL_TURN" => ServerMessage::ModelTurn,
            "AI_STATE" => {
                let p: AiStatePayload = parse_payload(kind, payload)?;
                ServerMessage::AiState { state: p.state }
            }
            "TOOL_CALL" => {
                let p: ToolCallPayload = parse_payload(kind, payload)?;
                ServerMessage::ToolCall(ToolCall {
                    call_id: p.call_id,
                    name: p.tool,
                    args: p.args.unwrap_or_default(),
                })
            }
            "AUDIO_OUTPUT" => {
                let p: DataPayload = parse_payload(kind, payload)?;
                let data = codec::decode_base64(&p.data).map_err(|e| ProtocolError::InvalidPayload {
                    kind: kind.to_string(),
                    reason: e.to_string(),
                })?;
                ServerMessage::AudioOutput { data }
            }
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Status { .. } => "STATUS",
            ServerMessage::Error { .. } => "ERROR",
            ServerMessage::Transcription { .. } => "TRANSCRIPTION",
            ServerMessage::TurnComplete => "TURN_COMPLETE",
            ServerMessage::ModelTurn => "MODEL_TURN",
            ServerMessage::AiState { .. } => "AI_STATE",
            ServerMessage::ToolCall(_) => "TOOL_CALL",
            ServerMessage::AudioOutput { .. } => "AUDIO_OUTPUT",
        }
    }
}

fn parse_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_shape() {
        let msg = ClientMessage::StartSession {
            api_key: "secret".into(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "START_SESSION", "payload": {"apiKey": "secret"}})
        );

        let value: Value =
            serde_json::from_str(&ClientMessage::StopSession {}.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "STOP_SESSION", "payload": {}}));

        let msg = ClientMessage::ToolResponse {
            call_id: "c1".into(),
            result: "ok".into(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "TOOL_RESPONSE", "payload": {"callId": "c1", "result": "ok"}})
        );
    }

    #[test]
    fn test_audio_message_is_base64_pcm() {
        let frame = AudioFrame::new(Bytes::from_static(&[1, 0, 2, 0]), 0);
        match ClientMessage::audio(&frame) {
            ClientMessage::SendAudio { data } => assert_eq!(data, "AQACAA=="),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_transcription() {
        let msg = ServerMessage::decode(
            r#"{"type":"TRANSCRIPTION","payload":{"sender":"USER","text":"Hi"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Transcription {
                sender: Speaker::User,
                text: "Hi".into()
            }
        );
    }

    #[test]
    fn test_decode_without_payload() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"TURN_COMPLETE"}"#).unwrap(),
            ServerMessage::TurnComplete
        );
        assert_eq!(
            ServerMessage::decode(r#"{"type":"TURN_COMPLETE","payload":{}}"#).unwrap(),
            ServerMessage::TurnComplete
        );
        // Top-level fields, as older bridges sent them
        assert_eq!(
            ServerMessage::decode(r#"{"type":"STATUS","status":"connected"}"#).unwrap(),
            ServerMessage::Status {
                status: "connected".into()
            }
        );
    }

    #[test]
    fn test_decode_tool_call() {
        let msg = ServerMessage::decode(
            r#"{"type":"TOOL_CALL","payload":{"tool":"highlightObject","args":{"object_name":"mug"},"callId":"42"}}"#,
        )
        .unwrap();
        let ServerMessage::ToolCall(call) = msg else {
            panic!("expected tool call");
        };
        assert_eq!(call.call_id, "42");
        assert_eq!(call.name, HIGHLIGHT_OBJECT_TOOL);
        assert_eq!(call.str_arg(OBJECT_NAME_ARG), Some("mug"));
    }

    #[test]
    fn test_decode_audio_output() {
        let msg =
            ServerMessage::decode(r#"{"type":"AUDIO_OUTPUT","payload":{"data":"AQACAA=="}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ServerMessage::AudioOutput {
                data: Bytes::from_static(&[1, 0, 2, 0])
            }
        );
    }

    #[test]
    fn test_decode_ai_state_and_error() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"AI_STATE","payload":{"state":"using_tool"}}"#)
                .unwrap(),
            ServerMessage::AiState {
                state: AiState::UsingTool
            }
        );
        assert_eq!(
            ServerMessage::decode(r#"{"type":"ERROR","payload":{"error":{"code":7}}}"#).unwrap(),
            ServerMessage::Error {
                error: r#"{"code":7}"#.into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_messages() {
        assert!(matches!(
            ServerMessage::decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"BOGUS","payload":{}}"#),
            Err(ProtocolError::UnknownType(t)) if t == "BOGUS"
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"AI_STATE","payload":{"state":"dancing"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"AUDIO_OUTPUT","payload":{"data":"%%%"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }
}
