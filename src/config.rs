use anyhow::Result;
use serde::Deserialize;

/// Persona prompt sent with every session setup
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Liana, a friendly and helpful AI assistant. \
You are an expert in both English and Persian (Farsi). Respond to the user in the language they use. \
Keep your answers concise and conversational.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Display name for the assistant's transcript entries
    pub name: String,
    pub system_instruction: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Liana".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint of the bidirectional streaming API
    pub endpoint: String,
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Seconds allowed for the channel handshake
    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Zephyr".to_string(),
            api_key_env: "API_KEY".to_string(),
            connect_timeout_secs: 15,
        }
    }
}

impl LiveConfig {
    /// Read the API key from the process environment
    ///
    /// Empty values count as missing.
    pub fn credential(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Microphone rate sent to the model
    pub input_sample_rate: u32,
    /// Rate of synthesized speech received from the model
    pub output_sample_rate: u32,
    /// Samples per outbound frame
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `LIANA__SECTION__KEY`
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LIANA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
