//! JSON frames exchanged with the live voice endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

// ======================== Outbound ========================

/// First frame of every session.
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(model: &str, voice: &str, instruction: String) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart { text: instruction }],
                },
            },
        }
    }

    pub fn instruction(&self) -> &str {
        self.setup
            .system_instruction
            .parts
            .first()
            .map(|p| p.text.as_str())
            .unwrap_or("")
    }
}

/// One captured block, already PCM16-encoded and base64'd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaBlob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage<'a> {
    pub realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput<'a> {
    pub audio: &'a MediaBlob,
}

pub fn realtime_input_json(blob: &MediaBlob) -> serde_json::Result<String> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput { audio: blob },
    })
}

// ======================== Inbound ========================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ServerError>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub struct ServerError {
    pub message: Option<String>,
}

/// What a single server frame means to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Raw PCM16 LE bytes of one chunk of remote speech.
    Audio(Vec<u8>),
    Interrupted,
    TurnComplete,
    Error(String),
}

/// Parses one server frame. A frame may carry several events; audio parts
/// come out in the order they appear. Undecodable base64 parts are skipped.
pub fn parse_server_message(text: &str) -> anyhow::Result<Vec<ServerEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = msg.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    match STANDARD.decode(inline.data.as_bytes()) {
                        Ok(bytes) => events.push(ServerEvent::Audio(bytes)),
                        Err(e) => log::warn!(
                            "Skipping undecodable audio part ({:?}): {}",
                            inline.mime_type,
                            e
                        ),
                    }
                }
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(err) = msg.error {
        events.push(ServerEvent::Error(
            err.message.unwrap_or_else(|| "Unknown server error".to_string()),
        ));
    }

    Ok(events)
}
