use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One fixed-size block of captured audio (mono, normalized f32)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Frame length in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

/// Configuration for audio capture backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate delivered to the session (device audio is resampled)
    pub target_sample_rate: u32,
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Frames buffered between the capture thread and the session
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Live API input rate
            frame_size: 4096,
            channel_capacity: 8,
        }
    }
}

impl AudioBackendConfig {
    /// Duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> u64 {
        if self.target_sample_rate == 0 {
            return 0;
        }
        self.frame_size as u64 * 1000 / u64::from(self.target_sample_rate)
    }
}

/// Audio capture backend trait
///
/// Creating a backend acquires the input (device permission, file open);
/// `start` begins delivering frames and `stop` releases the input.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio. Calling it on a stopped backend is a no-op.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(source: &AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = config;
                    anyhow::bail!(
                        "Microphone capture requires the `cpal-audio` feature; use --input-wav instead"
                    )
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::WavFileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file input, followed by silence
    File(PathBuf),
}
