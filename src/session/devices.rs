use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioOutput, AudioOutputFactory, AudioSink,
    AudioSource, SourceId, WavOutput,
};

/// Opens the input and output side of a session
#[async_trait::async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Acquire the capture device (the permission step)
    fn open_input(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;

    /// Open the playback clock; finished sources are reported on `ended_tx`
    async fn open_output(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// Devices chosen on the command line
///
/// A WAV sink is created by the first session and appended to by every
/// later one, so the file holds the whole run.
#[derive(Debug)]
pub struct SystemDevices {
    pub input: AudioSource,
    pub output: AudioSink,
    output_written: AtomicBool,
}

impl SystemDevices {
    pub fn new(input: AudioSource, output: AudioSink) -> Self {
        Self {
            input,
            output,
            output_written: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl DeviceProvider for SystemDevices {
    fn open_input(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(&self.input, config)
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        match &self.output {
            AudioSink::File(path) if self.output_written.load(Ordering::SeqCst) => {
                Ok(Box::new(WavOutput::append(path, sample_rate, ended_tx)?))
            }
            sink => {
                let output = AudioOutputFactory::create(sink, sample_rate, ended_tx).await?;
                self.output_written.store(true, Ordering::SeqCst);
                Ok(output)
            }
        }
    }
}
