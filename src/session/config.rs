use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::config::Config;
use crate::live::Setup;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API key, if the environment provided one
    pub credential: Option<String>,

    /// Name of the environment variable the key comes from (for messages)
    pub credential_var: String,

    pub model: String,

    /// Prebuilt voice for synthesized speech
    pub voice: String,

    pub system_instruction: String,

    /// Sample rate of outbound microphone audio
    pub input_sample_rate: u32,

    /// Sample rate of inbound synthesized audio
    pub output_sample_rate: u32,

    /// Samples per outbound frame
    pub frame_size: usize,

    /// Upper bound on the channel handshake
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&Config::default(), None)
    }
}

impl SessionConfig {
    /// Build from loaded settings, reading the credential from the environment
    pub fn from_config(config: &Config) -> Self {
        Self::from_settings(config, config.live.credential())
    }

    fn from_settings(config: &Config, credential: Option<String>) -> Self {
        Self {
            credential,
            credential_var: config.live.api_key_env.clone(),
            model: config.live.model.clone(),
            voice: config.live.voice.clone(),
            system_instruction: config.assistant.system_instruction.clone(),
            input_sample_rate: config.audio.input_sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            frame_size: config.audio.frame_size,
            connect_timeout: Duration::from_secs(config.live.connect_timeout_secs.max(1)),
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn setup(&self) -> Setup {
        Setup::audio(&self.model, &self.voice, &self.system_instruction)
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.input_sample_rate,
            frame_size: self.frame_size,
            ..AudioBackendConfig::default()
        }
    }
}
