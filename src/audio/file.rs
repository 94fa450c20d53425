use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::chunk::FrameChunker;
use super::resample::{downmix_to_mono, LinearResampler};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    bail!("Unsupported bit depth: {}", spec.bits_per_sample);
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        if spec.channels == 0 || spec.sample_rate == 0 {
            bail!("WAV file has an invalid format: {}Hz, {} channels", spec.sample_rate, spec.channels);
        }

        let duration_seconds =
            samples.len() as f64 / (f64::from(spec.sample_rate) * f64::from(spec.channels));

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        LinearResampler::new(self.sample_rate, target_rate).process(&mono)
    }
}

/// Capture backend that streams a WAV file in real time
///
/// Once the file is exhausted it keeps sending silent frames, so the remote
/// side can detect the end of speech and reply.
pub struct WavFileBackend {
    config: AudioBackendConfig,
    path: String,
    samples: Arc<Vec<f32>>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavFileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;
        let samples = file.to_mono(config.target_sample_rate);

        info!(
            "WAV input ready: {} ({} samples at {}Hz)",
            file.path,
            samples.len(),
            config.target_sample_rate
        );

        Ok(Self {
            config,
            path: file.path,
            samples: Arc::new(samples),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for WavFileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let samples = Arc::clone(&self.samples);
        let running = Arc::clone(&self.running);
        let frame_size = self.config.frame_size.max(1);
        let sample_rate = self.config.target_sample_rate;
        let period = Duration::from_millis(self.config.frame_duration_ms().max(1));

        running.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut chunker = FrameChunker::new(frame_size, sample_rate);
            let mut queued = chunker.push(&samples);
            if chunker.pending_len() > 0 {
                let pad = vec![0.0; frame_size - chunker.pending_len()];
                queued.extend(chunker.push(&pad));
            }
            let file_frames = queued.len();
            let mut queued = queued.into_iter();
            let silence = vec![0.0f32; frame_size];

            let mut ticker = tokio::time::interval(period);
            let mut sent = 0usize;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                let frame = match queued.next() {
                    Some(frame) => frame,
                    None => {
                        if sent == file_frames {
                            debug!("WAV input exhausted, sending silence");
                        }
                        chunker.push(&silence).remove(0)
                    }
                };

                if tx.send(frame).await.is_err() {
                    break;
                }
                sent += 1;
            }

            debug!("WAV capture task stopped after {} frames", sent);
        });

        self.task = Some(task);
        info!("WAV capture started: {}", self.path);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("WAV capture task failed: {}", e);
                }
            }
            info!("WAV capture stopped: {}", self.path);
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
