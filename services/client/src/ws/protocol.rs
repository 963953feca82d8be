//! Defines the JSON message protocol between this client and the session backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Inbound acknowledgment that a voice session is ready.
pub const SESSION_READY: &str = "session_ready";
/// Inbound application-level error report.
pub const ERROR: &str = "error";
/// Inbound speech-to-text update.
pub const TRANSCRIPT: &str = "transcript";
/// Inbound audio chunk carried in a text frame (base64 `data`).
pub const AUDIO_CHUNK: &str = "audio_chunk";

/// How aggressively the backend should clean up captured audio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementLevel {
    Off,
    Low,
    #[default]
    Medium,
    High,
}

/// Parameters of a voice stream, sent with `start_session`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub language: String,
    pub voice: String,
    pub sample_rate: u32,
    pub enhancement_level: EnhancementLevel,
    pub emotion_detection: bool,
    pub rag_enabled: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: "default".to_string(),
            sample_rate: 24000,
            enhancement_level: EnhancementLevel::default(),
            emotion_detection: false,
            rag_enabled: false,
        }
    }
}

/// What a connection attempt is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// A text chat identified by its chat id.
    Chat { chat_id: String },
    /// A bidirectional voice stream.
    Voice(VoiceConfig),
}

impl SessionTarget {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::Chat {
            chat_id: chat_id.into(),
        }
    }

    pub fn voice(config: VoiceConfig) -> Self {
        Self::Voice(config)
    }

    /// Voice sessions need a `start_session`/`session_ready` exchange before
    /// they are usable; chat sessions are usable as soon as the socket opens.
    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::Voice(_))
    }
}

/// Where the backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// Streaming socket URL for `target`, authenticated with `token`.
    pub fn socket_url(&self, target: &SessionTarget, token: &str) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}", self.host))?;
        match target {
            SessionTarget::Chat { chat_id } => {
                url.set_path("/ws/chat");
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.push(chat_id);
                }
            }
            SessionTarget::Voice(_) => url.set_path("/ws/voice/stream"),
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }

    /// Liveness probe URL.
    pub fn health_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        let mut url = Url::parse(&format!("{scheme}://{}", self.host))?;
        url.set_path("/health");
        Ok(url)
    }
}

/// Control messages sent from this client to the backend.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the voice pipeline; answered by `session_ready`.
    StartSession { config: VoiceConfig },
    /// Closes the voice pipeline before a deliberate disconnect.
    StopSession,
    /// A user chat message.
    Message { content: String },
}

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// The declared `type`, when the message is an object carrying one.
    pub kind: Option<String>,
    pub body: Value,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let body: Value = serde_json::from_str(text)?;
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self { kind, body })
    }

    /// Deserialize the whole message into a typed payload.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// A `transcript` message.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TranscriptUpdate {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

/// An `audio_chunk` message.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioChunkMessage {
    pub message_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Base64-encoded audio bytes.
    pub data: String,
}

/// Reduce an error report from the backend to a single readable string.
///
/// Accepts `{"message": ".."}`, `{"error": ".."}`, `{"error": {"message": ".."}}`
/// and `{"detail": ".."}`; anything else is rendered as JSON.
pub fn normalize_error(body: &Value) -> String {
    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

    text(body.get("message"))
        .or_else(|| text(body.get("error")))
        .or_else(|| text(body.get("error").and_then(|e| e.get("message"))))
        .or_else(|| text(body.get("detail")))
        .unwrap_or_else(|| match body.get("error") {
            Some(error) if !error.is_null() => error.to_string(),
            _ => body.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_socket_url() {
        let endpoint = Endpoint::new("api.example.com", true);
        let url = endpoint
            .socket_url(&SessionTarget::chat("42"), "s3cret token")
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws/chat/42");
        assert_eq!(url.query(), Some("token=s3cret+token"));
    }

    #[test]
    fn test_voice_socket_url() {
        let endpoint = Endpoint::new("localhost:8000", false);
        let url = endpoint
            .socket_url(&SessionTarget::voice(VoiceConfig::default()), "abc")
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/voice/stream?token=abc");
    }

    #[test]
    fn test_health_url() {
        assert_eq!(
            Endpoint::new("localhost:8000", false).health_url().unwrap().as_str(),
            "http://localhost:8000/health"
        );
        assert_eq!(
            Endpoint::new("api.example.com", true).health_url().unwrap().as_str(),
            "https://api.example.com/health"
        );
    }

    #[test]
    fn test_start_session_serialization() {
        let message = ClientMessage::StartSession {
            config: VoiceConfig {
                language: "de-DE".to_string(),
                voice: "nova".to_string(),
                sample_rate: 16000,
                enhancement_level: EnhancementLevel::High,
                emotion_detection: true,
                rag_enabled: false,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "start_session",
                "config": {
                    "language": "de-DE",
                    "voice": "nova",
                    "sample_rate": 16000,
                    "enhancement_level": "high",
                    "emotion_detection": true,
                    "rag_enabled": false
                }
            })
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::StopSession).unwrap(),
            json!({"type": "stop_session"})
        );
    }

    #[test]
    fn test_inbound_parse() {
        let message = InboundMessage::parse(r#"{"type":"transcript","text":"hi"}"#).unwrap();
        assert_eq!(message.kind.as_deref(), Some(TRANSCRIPT));
        let transcript: TranscriptUpdate = message.decode().unwrap();
        assert_eq!(transcript.text, "hi");
        assert!(!transcript.is_final);

        let untyped = InboundMessage::parse("[1, 2]").unwrap();
        assert!(untyped.kind.is_none());

        assert!(InboundMessage::parse("{not json").is_err());
    }

    #[test]
    fn test_normalize_error_shapes() {
        assert_eq!(normalize_error(&json!({"type": "error", "message": "a"})), "a");
        assert_eq!(normalize_error(&json!({"type": "error", "error": "b"})), "b");
        assert_eq!(
            normalize_error(&json!({"type": "error", "error": {"message": "c", "code": 4}})),
            "c"
        );
        assert_eq!(normalize_error(&json!({"detail": "d"})), "d");
        assert_eq!(
            normalize_error(&json!({"error": {"code": 4}})),
            r#"{"code":4}"#
        );
        assert_eq!(normalize_error(&json!({"type": "error"})), r#"{"type":"error"}"#);
    }
}
