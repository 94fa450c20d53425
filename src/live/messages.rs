use serde::{Deserialize, Serialize};

use crate::audio::MediaBlob;

/// Message sent from the client to the Live API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

/// First message on every connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model resource name (`models/<id>`)
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: AudioTranscriptionConfig,
    pub output_audio_transcription: AudioTranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; carries no options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioTranscriptionConfig {}

/// Streamed microphone audio
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

impl Setup {
    /// Audio-only session with transcription in both directions
    pub fn audio(model: &str, voice: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
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
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                    inline_data: None,
                }],
            },
            input_audio_transcription: AudioTranscriptionConfig::default(),
            output_audio_transcription: AudioTranscriptionConfig::default(),
        }
    }
}

/// Message received from the Live API
///
/// Exactly one field is normally present; unknown message kinds
/// deserialize to all-`None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// The parts of one server message the session cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveMessage {
    /// Fragment of the user's speech transcript
    pub input_text: Option<String>,
    /// Fragment of the assistant's speech transcript
    pub output_text: Option<String>,
    pub turn_complete: bool,
    /// The user spoke over the assistant; queued speech is stale
    pub interrupted: bool,
    /// Base64 PCM audio fragment
    pub audio: Option<String>,
}

impl From<ServerContent> for LiveMessage {
    fn from(content: ServerContent) -> Self {
        let audio = content.model_turn.and_then(|turn| {
            turn.parts
                .into_iter()
                .find_map(|part| part.inline_data)
                .map(|blob| blob.data)
        });

        Self {
            input_text: content.input_transcription.and_then(|t| t.text),
            output_text: content.output_transcription.and_then(|t| t.text),
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
            audio,
        }
    }
}

/// Events delivered by an open session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Setup acknowledged; audio may flow
    Opened,
    Message(LiveMessage),
    Error(String),
    /// Remote close (with reason, if any) or end of stream
    Closed(Option<String>),
}
